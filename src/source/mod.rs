//! Channel data source: the narrow interface the engine talks to.
//!
//! The engine never sees platform types; it only needs paged history
//! reads, sends, deletes, and attachment downloads.

pub mod discord;
pub mod memory;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::model::{Attachment, AttachmentFile, ChannelId, Message, MessageId, OutgoingMessage};

pub use discord::DiscordSource;
pub use memory::MemorySource;

/// Read/write access to channel histories.
#[async_trait]
pub trait ChannelDataSource: Send + Sync {
    /// Source identifier for logs (e.g. "discord").
    fn name(&self) -> &str;

    /// Human-readable channel name, used in summaries.
    async fn channel_name(&self, channel: ChannelId) -> Result<String, TransportError>;

    /// One page of history, newest first, containing at most `limit`
    /// messages whose id is strictly below `before` (when given).
    async fn history_page(
        &self,
        channel: ChannelId,
        before: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>, TransportError>;

    /// Post a message. Returns the created message once the platform accepted it.
    async fn send(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> Result<Message, TransportError>;

    /// Delete a message. Deleting a message that is already gone succeeds.
    async fn delete(&self, channel: ChannelId, message: MessageId) -> Result<(), TransportError>;

    /// Download an attachment's payload.
    async fn fetch_attachment(
        &self,
        attachment: &Attachment,
    ) -> Result<AttachmentFile, TransportError>;
}
