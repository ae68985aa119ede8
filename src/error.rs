//! Error types for Channel Mover.

use std::time::Duration;

use crate::model::MessageId;

/// Top-level error type for the binary edge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Time period error: {0}")]
    Parse(#[from] ParseError),

    #[error("Request error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Purge error: {0}")]
    Purge(#[from] PurgeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Why a time-period expression was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorReason {
    Malformed,
    UnknownUnit,
}

impl std::fmt::Display for ParseErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => f.write_str("malformed"),
            Self::UnknownUnit => f.write_str("unknown unit"),
        }
    }
}

/// A time-period expression such as `"7 days"` could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid time period {input:?}: {reason}")]
pub struct ParseError {
    pub input: String,
    pub reason: ParseErrorReason,
}

impl ParseError {
    pub fn malformed(input: &str) -> Self {
        Self {
            input: input.to_string(),
            reason: ParseErrorReason::Malformed,
        }
    }

    pub fn unknown_unit(input: &str) -> Self {
        Self {
            input: input.to_string(),
            reason: ParseErrorReason::UnknownUnit,
        }
    }
}

/// A request could not be turned into a selection policy.
///
/// Always raised before any scanning starts, so nothing has happened yet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("Invalid action {value:?}")]
    InvalidAction { value: String },

    #[error("Missing required parameter '{field}' for action '{action}'")]
    MissingParameter {
        field: &'static str,
        action: &'static str,
    },

    #[error("Invalid value for '{field}': {source}")]
    InvalidParameter {
        field: &'static str,
        #[source]
        source: ParseError,
    },
}

impl PolicyError {
    /// Name of the request field that caused the failure.
    pub fn field(&self) -> &str {
        match self {
            Self::InvalidAction { .. } => "action",
            Self::MissingParameter { field, .. } | Self::InvalidParameter { field, .. } => field,
        }
    }
}

/// Network or platform failure talking to the channel data source.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Platform returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Failed to decode platform response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether the target no longer exists. Deleting such a message is not fatal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the request is worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Http(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

/// Which part of a single copy-then-delete step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStage {
    FetchAttachment,
    Send,
    Delete,
}

impl std::fmt::Display for StepStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchAttachment => f.write_str("attachment fetch"),
            Self::Send => f.write_str("send"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// A migration stopped before the whole batch was moved.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Scanning source history failed: {source}")]
    Scan {
        #[source]
        source: TransportError,
    },

    #[error("Migration aborted at {stage} of message {message_id} after moving {moved}: {source}")]
    Step {
        moved: usize,
        message_id: MessageId,
        stage: StepStage,
        #[source]
        source: TransportError,
    },

    #[error("Migration cancelled after moving {moved}")]
    Cancelled { moved: usize },
}

impl MigrationError {
    /// Number of messages fully moved (copied and deleted) before the failure.
    pub fn moved(&self) -> usize {
        match self {
            Self::Scan { .. } => 0,
            Self::Step { moved, .. } | Self::Cancelled { moved } => *moved,
        }
    }
}

/// A purge could not run to completion.
#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Scanning history failed after deleting {deleted}: {source}")]
    Scan {
        deleted: usize,
        #[source]
        source: TransportError,
    },

    #[error("Purge cancelled after deleting {deleted}")]
    Cancelled { deleted: usize },
}

impl PurgeError {
    /// Number of messages deleted before the purge stopped.
    pub fn deleted(&self) -> usize {
        match self {
            Self::Parse(_) => 0,
            Self::Scan { deleted, .. } | Self::Cancelled { deleted } => *deleted,
        }
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_reason_renders() {
        let err = ParseError::unknown_unit("5 fortnights");
        assert_eq!(err.reason.to_string(), "unknown unit");
        assert!(err.to_string().contains("5 fortnights"));
    }

    #[test]
    fn policy_error_names_field() {
        let err = PolicyError::MissingParameter {
            field: "time_period",
            action: "last",
        };
        assert_eq!(err.field(), "time_period");
        assert_eq!(
            PolicyError::InvalidAction { value: "x".into() }.field(),
            "action"
        );
    }

    #[test]
    fn not_found_is_not_retryable() {
        let err = TransportError::NotFound("message".into());
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert!(TransportError::Status { status: 502, body: String::new() }.is_retryable());
        assert!(!TransportError::Forbidden("no".into()).is_retryable());
    }

    #[test]
    fn migration_error_reports_progress() {
        let err = MigrationError::Step {
            moved: 2,
            message_id: MessageId(7),
            stage: StepStage::Send,
            source: TransportError::Http("boom".into()),
        };
        assert_eq!(err.moved(), 2);
        assert!(err.to_string().contains("after moving 2"));
        assert_eq!(
            MigrationError::Scan { source: TransportError::Http("x".into()) }.moved(),
            0
        );
    }
}
