//! Selection policies: which messages a migration acts upon.

use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::PolicyError;
use crate::model::{Message, UserId};
use crate::time_window;

/// Action named in a move request. A leading `-` is accepted (`-all`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    #[default]
    All,
    Last,
    FromUser,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Last => "last",
            Self::FromUser => "from_user",
        }
    }
}

impl FromStr for Action {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        match name.strip_prefix('-').unwrap_or(name) {
            "all" => Ok(Self::All),
            "last" => Ok(Self::Last),
            "from_user" => Ok(Self::FromUser),
            _ => Err(PolicyError::InvalidAction {
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateless predicate over messages, built once per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionPolicy {
    All,
    LastWindow(TimeDelta),
    FromUser(UserId),
}

impl SelectionPolicy {
    /// Build a policy from request parameters, validating that the
    /// parameter each action needs is present.
    pub fn from_request(
        action: Action,
        time_period: Option<&str>,
        user: Option<UserId>,
    ) -> Result<Self, PolicyError> {
        match action {
            Action::All => Ok(Self::All),
            Action::Last => {
                let text = time_period
                    .filter(|t| !t.trim().is_empty())
                    .ok_or(PolicyError::MissingParameter {
                        field: "time_period",
                        action: "last",
                    })?;
                let window = time_window::parse(text).map_err(|source| {
                    PolicyError::InvalidParameter {
                        field: "time_period",
                        source,
                    }
                })?;
                Ok(Self::LastWindow(window))
            }
            Action::FromUser => user.map(Self::FromUser).ok_or(PolicyError::MissingParameter {
                field: "user_id",
                action: "from_user",
            }),
        }
    }

    /// Whether `message` is selected, evaluated at instant `now`.
    pub fn matches(&self, message: &Message, now: DateTime<Utc>) -> bool {
        match self {
            Self::All => true,
            Self::LastWindow(window) => now - message.created_at <= *window,
            Self::FromUser(author) => message.author_id == *author,
        }
    }

    /// Whether a miss on a newest-first scan means every older message will
    /// miss too, so the scan can stop early.
    pub fn is_monotonic(&self) -> bool {
        matches!(self, Self::LastWindow(_))
    }
}
