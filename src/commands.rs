//! Move and purge requests, and the text sent back to whoever asked.
//!
//! Validation happens here, before any job starts, so a rejected request
//! is always "nothing happened".

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, ParseError, PolicyError, PurgeError};
use crate::model::{ChannelId, PurgeReport, UserId};
use crate::policy::{Action, SelectionPolicy};
use crate::time_window;

pub const INVALID_ACTION_REPLY: &str = "Invalid action. Use '-all', '-last <xy-time>', or '-from_user'.";
pub const MISSING_PERIOD_REPLY: &str = "Please specify a time period for '-last'.";
pub const MISSING_USER_REPLY: &str = "Please specify a user for '-from_user'.";
pub const INVALID_PERIOD_REPLY: &str =
    "Invalid time period format. Use '<number> days' or '<number> hours'.";

/// Relocate messages from one channel to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub source_channel: ChannelId,
    pub destination_channel: ChannelId,
    /// `all`, `last`, or `from_user`, optionally with a leading `-`.
    pub action: String,
    pub time_period: Option<String>,
    pub user_id: Option<UserId>,
}

impl MoveRequest {
    /// Request moving everything.
    pub fn all(source_channel: ChannelId, destination_channel: ChannelId) -> Self {
        Self {
            source_channel,
            destination_channel,
            action: Action::All.as_str().to_string(),
            time_period: None,
            user_id: None,
        }
    }

    /// Build the selection policy this request asks for.
    pub fn policy(&self) -> Result<SelectionPolicy, PolicyError> {
        let action: Action = self.action.parse()?;
        SelectionPolicy::from_request(action, self.time_period.as_deref(), self.user_id)
    }
}

/// Delete messages older than a time period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeRequest {
    pub channel: ChannelId,
    pub time_period: String,
}

impl PurgeRequest {
    /// Check the time period parses before any work starts.
    pub fn validate(&self) -> Result<(), ParseError> {
        time_window::parse(&self.time_period).map(|_| ())
    }
}

/// User-facing text for a rejected move request.
pub fn policy_error_reply(err: &PolicyError) -> String {
    match err {
        PolicyError::InvalidAction { .. } => INVALID_ACTION_REPLY.to_string(),
        PolicyError::MissingParameter { field: "user_id", .. } => MISSING_USER_REPLY.to_string(),
        PolicyError::MissingParameter { .. } => MISSING_PERIOD_REPLY.to_string(),
        PolicyError::InvalidParameter { .. } => INVALID_PERIOD_REPLY.to_string(),
    }
}

pub fn move_summary(moved: usize, source_name: &str, destination_name: &str) -> String {
    format!("Moved {moved} messages from {source_name} to {destination_name}.")
}

/// Text for a migration that stopped early, distinguishing partial runs
/// from runs that changed nothing.
pub fn move_failure_summary(err: &MigrationError, source_name: &str, destination_name: &str) -> String {
    match err.moved() {
        0 => format!("No messages were moved from {source_name} to {destination_name}: {err}"),
        n => format!(
            "Moved {n} messages from {source_name} to {destination_name} before stopping: {err}"
        ),
    }
}

pub fn purge_summary(report: &PurgeReport, channel_name: &str, time_period: &str) -> String {
    let mut text = format!(
        "Deleted {} messages from {channel_name} older than {time_period}.",
        report.deleted_count
    );
    if !report.is_complete() {
        text.push_str(&format!(
            " {} messages could not be deleted.",
            report.failures.len()
        ));
    }
    text
}

pub fn purge_failure_summary(err: &PurgeError, channel_name: &str) -> String {
    match err {
        PurgeError::Parse(_) => INVALID_PERIOD_REPLY.to_string(),
        _ if err.deleted() == 0 => format!("No messages were deleted from {channel_name}: {err}"),
        _ => format!(
            "Deleted {} messages from {channel_name} before stopping: {err}",
            err.deleted()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::model::{MessageId, PurgeFailure};

    fn request(action: &str, time_period: Option<&str>, user: Option<u64>) -> MoveRequest {
        MoveRequest {
            source_channel: ChannelId(1),
            destination_channel: ChannelId(2),
            action: action.to_string(),
            time_period: time_period.map(String::from),
            user_id: user.map(UserId),
        }
    }

    #[test]
    fn move_request_builds_policies() {
        assert_eq!(request("-all", None, None).policy().unwrap(), SelectionPolicy::All);
        assert_eq!(
            request("-from_user", None, Some(5)).policy().unwrap(),
            SelectionPolicy::FromUser(UserId(5))
        );
        assert!(matches!(
            request("last", Some("2 days"), None).policy().unwrap(),
            SelectionPolicy::LastWindow(_)
        ));
    }

    #[test]
    fn rejected_requests_map_to_replies() {
        let reply = |r: MoveRequest| policy_error_reply(&r.policy().unwrap_err());
        assert_eq!(reply(request("-move", None, None)), INVALID_ACTION_REPLY);
        assert_eq!(reply(request("-last", None, None)), MISSING_PERIOD_REPLY);
        assert_eq!(reply(request("-last", Some("soon"), None)), INVALID_PERIOD_REPLY);
        assert_eq!(reply(request("-from_user", None, None)), MISSING_USER_REPLY);
    }

    #[test]
    fn purge_request_validates_period() {
        let ok = PurgeRequest {
            channel: ChannelId(1),
            time_period: "7 days".into(),
        };
        assert!(ok.validate().is_ok());
        let bad = PurgeRequest {
            channel: ChannelId(1),
            time_period: "7".into(),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn summaries_match_reply_format() {
        assert_eq!(
            move_summary(3, "general", "archive"),
            "Moved 3 messages from general to archive."
        );
        let report = PurgeReport {
            channel: ChannelId(1),
            deleted_count: 4,
            failures: vec![],
        };
        assert_eq!(
            purge_summary(&report, "general", "7 days"),
            "Deleted 4 messages from general older than 7 days."
        );
    }

    #[test]
    fn failure_summaries_say_whether_anything_happened() {
        let none = MigrationError::Scan {
            source: TransportError::Forbidden("Missing Access".into()),
        };
        assert!(move_failure_summary(&none, "a", "b").starts_with("No messages were moved"));

        let some = MigrationError::Cancelled { moved: 2 };
        assert!(move_failure_summary(&some, "a", "b").starts_with("Moved 2 messages"));

        let report = PurgeReport {
            channel: ChannelId(1),
            deleted_count: 1,
            failures: vec![PurgeFailure {
                message_id: MessageId(9),
                reason: "boom".into(),
            }],
        };
        assert!(purge_summary(&report, "x", "1 day").ends_with("1 messages could not be deleted."));
    }
}
