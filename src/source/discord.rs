//! Discord channel data source: talks to the REST API directly.
//!
//! Only the handful of endpoints the engine needs: paged message history,
//! create message (multipart when files are carried), delete message,
//! channel lookup, and CDN attachment downloads.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::{Config, MAX_PAGE_SIZE};
use crate::error::TransportError;
use crate::model::{
    Attachment, AttachmentFile, ChannelId, Message, MessageId, OutgoingMessage, UserId,
};
use crate::source::ChannelDataSource;

/// Maximum message length accepted by the create-message endpoint.
const DISCORD_MAX_MESSAGE_LENGTH: usize = 2000;

/// Longest server-requested wait we honour, in seconds.
const MAX_RETRY_AFTER_SECS: f64 = 3600.0;

/// Whether a request may be repeated after an ambiguous failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Safe to repeat on rate limits, 5xx, and connection errors.
    Idempotent,
    /// Only repeat when the platform said it did not process the request (429).
    RateLimitOnly,
}

/// Discord REST data source.
pub struct DiscordSource {
    token: SecretString,
    api_base: String,
    max_retries: u32,
    retry_backoff: Duration,
    client: reqwest::Client,
}

impl DiscordSource {
    pub fn new(config: &Config) -> Self {
        Self {
            token: config.token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token.expose_secret())
    }

    /// Send a request built by `build`, retrying per `retry`.
    ///
    /// `build` is called once per attempt because multipart bodies cannot be
    /// cloned.
    async fn execute<F>(&self, retry: Retry, build: F) -> Result<reqwest::Response, TransportError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let result = match build().send().await {
                Ok(resp) => check_status(resp).await,
                Err(e) => Err(TransportError::from(e)),
            };

            let err = match result {
                Ok(resp) => return Ok(resp),
                Err(err) => err,
            };

            let may_retry = match retry {
                Retry::Idempotent => err.is_retryable(),
                Retry::RateLimitOnly => matches!(err, TransportError::RateLimited { .. }),
            };
            if !may_retry || attempt >= self.max_retries {
                return Err(err);
            }

            attempt += 1;
            let delay = match &err {
                TransportError::RateLimited {
                    retry_after: Some(after),
                } => *after,
                _ => self.retry_backoff,
            };
            tracing::warn!(
                error = %err,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Discord request failed; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

// ── ChannelDataSource implementation ────────────────────────────────

#[async_trait]
impl ChannelDataSource for DiscordSource {
    fn name(&self) -> &str {
        "discord"
    }

    async fn channel_name(&self, channel: ChannelId) -> Result<String, TransportError> {
        let url = self.api_url(&format!("channels/{channel}"));
        let resp = self
            .execute(Retry::Idempotent, || {
                self.client
                    .get(&url)
                    .header("Authorization", self.auth_header())
            })
            .await?;

        let wire: WireChannel = resp.json().await?;
        Ok(wire.name.unwrap_or_else(|| channel.to_string()))
    }

    async fn history_page(
        &self,
        channel: ChannelId,
        before: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>, TransportError> {
        let url = self.api_url(&format!("channels/{channel}/messages"));
        let mut query = vec![("limit", limit.clamp(1, MAX_PAGE_SIZE).to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }

        let resp = self
            .execute(Retry::Idempotent, || {
                self.client
                    .get(&url)
                    .header("Authorization", self.auth_header())
                    .query(&query)
            })
            .await?;

        let wire: Vec<WireMessage> = resp.json().await?;
        tracing::debug!(channel = %channel, count = wire.len(), "Fetched history page");
        wire.into_iter().map(Message::try_from).collect()
    }

    async fn send(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> Result<Message, TransportError> {
        let url = self.api_url(&format!("channels/{channel}/messages"));
        let content = truncate_content(&message.content, DISCORD_MAX_MESSAGE_LENGTH);
        let payload = serde_json::json!({
            "content": content,
            // Relocated text must not re-ping anyone it mentions.
            "allowed_mentions": { "parse": [] },
            "attachments": message
                .files
                .iter()
                .enumerate()
                .map(|(i, f)| serde_json::json!({ "id": i, "filename": f.filename }))
                .collect::<Vec<_>>(),
        });

        let resp = if message.files.is_empty() {
            self.execute(Retry::RateLimitOnly, || {
                self.client
                    .post(&url)
                    .header("Authorization", self.auth_header())
                    .json(&payload)
            })
            .await?
        } else {
            self.execute(Retry::RateLimitOnly, || {
                let mut form = Form::new().text("payload_json", payload.to_string());
                for (i, file) in message.files.iter().enumerate() {
                    let part = Part::bytes(file.bytes.clone()).file_name(file.filename.clone());
                    form = form.part(format!("files[{i}]"), part);
                }
                self.client
                    .post(&url)
                    .header("Authorization", self.auth_header())
                    .multipart(form)
            })
            .await?
        };

        let wire: WireMessage = resp.json().await?;
        let created = Message::try_from(wire)?;
        tracing::debug!(channel = %channel, message_id = %created.id, "Message sent");
        Ok(created)
    }

    async fn delete(&self, channel: ChannelId, message: MessageId) -> Result<(), TransportError> {
        let url = self.api_url(&format!("channels/{channel}/messages/{message}"));
        let result = self
            .execute(Retry::Idempotent, || {
                self.client
                    .delete(&url)
                    .header("Authorization", self.auth_header())
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!(channel = %channel, message_id = %message, "Message already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_attachment(
        &self,
        attachment: &Attachment,
    ) -> Result<AttachmentFile, TransportError> {
        // CDN URLs are signed; no bot authorization header.
        let resp = self
            .execute(Retry::Idempotent, || self.client.get(&attachment.url))
            .await?;
        let bytes = resp.bytes().await?;
        Ok(AttachmentFile {
            filename: attachment.filename.clone(),
            bytes: bytes.to_vec(),
        })
    }
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireChannel {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    username: String,
    #[serde(default)]
    discriminator: Option<String>,
    #[serde(default)]
    global_name: Option<String>,
}

impl WireUser {
    /// `name#1234` for legacy accounts, plain username otherwise.
    fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if d != "0" && !d.is_empty() => format!("{}#{d}", self.username),
            _ => self.username.clone(),
        }
    }

    fn display_name(&self) -> String {
        self.global_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.username.clone())
    }
}

#[derive(Debug, Deserialize)]
struct WireAttachment {
    #[serde(default)]
    url: String,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    channel_id: String,
    author: WireUser,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
    timestamp: DateTime<Utc>,
}

fn snowflake(field: &str, raw: &str) -> Result<u64, TransportError> {
    raw.parse()
        .map_err(|_| TransportError::Decode(format!("invalid {field} snowflake {raw:?}")))
}

impl TryFrom<WireMessage> for Message {
    type Error = TransportError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            id: MessageId(snowflake("message id", &wire.id)?),
            channel_id: ChannelId(snowflake("channel id", &wire.channel_id)?),
            author_id: UserId(snowflake("author id", &wire.author.id)?),
            author_display_name: wire.author.display_name(),
            author_tag: wire.author.tag(),
            content: wire.content,
            attachments: wire
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    url: a.url,
                    filename: a.filename,
                })
                .collect(),
            created_at: wire.timestamp,
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Map non-success statuses onto transport errors.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let header_retry = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok());
    let body = resp.text().await.unwrap_or_default();

    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let body_retry = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("retry_after").and_then(serde_json::Value::as_f64));
            TransportError::RateLimited {
                retry_after: body_retry
                    .or(header_retry)
                    .filter(|s| s.is_finite() && *s >= 0.0)
                    .map(|s| Duration::from_secs_f64(s.min(MAX_RETRY_AFTER_SECS))),
            }
        }
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => TransportError::Forbidden(body),
        StatusCode::NOT_FOUND => TransportError::NotFound(body),
        _ => TransportError::Status {
            status: status.as_u16(),
            body,
        },
    })
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `…`.
fn truncate_content(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

// ── Tests ───────────────────────────────────────────────────────────
