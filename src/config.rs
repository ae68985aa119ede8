//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default REST endpoint of the chat platform.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Largest page the history endpoint will return.
pub const MAX_PAGE_SIZE: usize = 100;

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bot token used for every platform call.
    pub token: SecretString,
    /// REST base URL, without trailing slash.
    pub api_base: String,
    /// Messages requested per history page (1..=100).
    pub page_size: usize,
    /// Extra attempts for rate-limited or transiently failing requests.
    pub max_retries: u32,
    /// Delay between retries when the platform does not say how long to wait.
    pub retry_backoff: Duration,
}

impl Config {
    /// Build a config with defaults for everything but the token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            api_base: DEFAULT_API_BASE.to_string(),
            page_size: MAX_PAGE_SIZE,
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Read configuration from environment variables.
    ///
    /// `DISCORD_TOKEN` is required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = std::env::var("DISCORD_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("DISCORD_TOKEN".to_string()))?;

        let mut config = Self::new(token);

        if let Ok(base) = std::env::var("DISCORD_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }

        if let Some(size) = parse_var::<usize>("CHANNEL_MOVER_PAGE_SIZE")? {
            config.page_size = size.clamp(1, MAX_PAGE_SIZE);
        }

        if let Some(retries) = parse_var::<u32>("CHANNEL_MOVER_MAX_RETRIES")? {
            config.max_retries = retries;
        }

        if let Some(ms) = parse_var::<u64>("CHANNEL_MOVER_RETRY_BACKOFF_MS")? {
            config.retry_backoff = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn parse_var<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        Err(_) => Ok(None),
    }
}
