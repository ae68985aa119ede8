//! Plain data records shared by the engine and the data sources.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds between the Unix epoch and the platform epoch (2015-01-01).
pub const PLATFORM_EPOCH_MS: i64 = 1_420_070_400_000;

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }
    };
}

snowflake!(
    /// Channel identifier.
    ChannelId
);
snowflake!(
    /// User identifier.
    UserId
);
snowflake!(
    /// Message identifier. Ordered by creation time.
    MessageId
);

impl MessageId {
    /// Smallest id the platform could assign at `ts`, truncated to the millisecond.
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self::from_millis(ts.timestamp_millis())
    }

    /// Exclusive `before` cursor for `ts`.
    ///
    /// Ids only carry whole milliseconds, so a `ts` with a sub-millisecond
    /// part rounds up: a message stamped in the same millisecond is still
    /// strictly older than `ts` and must sort below the cursor.
    pub fn cursor_before(ts: DateTime<Utc>) -> Self {
        let ms = ts.timestamp_millis();
        if ts.timestamp_subsec_nanos() % 1_000_000 == 0 {
            Self::from_millis(ms)
        } else {
            Self::from_millis(ms.saturating_add(1))
        }
    }

    fn from_millis(ms: i64) -> Self {
        let since_epoch = ms.saturating_sub(PLATFORM_EPOCH_MS).max(0);
        Self((since_epoch as u64) << 22)
    }

    /// Creation time encoded in the id.
    pub fn timestamp(self) -> DateTime<Utc> {
        let ms = (self.0 >> 22) as i64 + PLATFORM_EPOCH_MS;
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }
}

/// A file attached to a message. Bytes are fetched lazily through the data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
}

/// An attachment whose payload has been downloaded and is ready to re-upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Immutable record of a message in a channel's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub author_display_name: String,
    pub author_tag: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Identity line that prefixes a relocated copy, e.g. `"Ada (ada#0001):"`.
    pub fn author_line(&self) -> String {
        format!("{} ({}):", self.author_display_name, self.author_tag)
    }

    /// Attachments that can actually be carried over (non-empty URL).
    pub fn carried_attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.iter().filter(|a| !a.url.trim().is_empty())
    }
}

/// Outgoing message composed for the destination channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: String,
    pub files: Vec<AttachmentFile>,
}

impl OutgoingMessage {
    /// Author identity line, newline, then the original text.
    pub fn relocated(original: &Message, files: Vec<AttachmentFile>) -> Self {
        Self {
            content: format!("{}\n{}", original.author_line(), original.content),
            files,
        }
    }
}

/// Terminal report of a successful migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationResult {
    pub moved_count: usize,
    pub source_channel: ChannelId,
    pub destination_channel: ChannelId,
}

/// A single message the purge could not delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeFailure {
    pub message_id: MessageId,
    pub reason: String,
}

/// Outcome of a completed purge. `failures` lists per-item delete errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub channel: ChannelId,
    pub deleted_count: usize,
    pub failures: Vec<PurgeFailure>,
}

impl PurgeReport {
    /// Whether every matching message was deleted.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
