//! In-memory data source for tests and dry runs.
//!
//! Keeps every channel as a chronologically ordered vector and records each
//! side effect in an event log, so callers can assert on call ordering.
//! Failures can be injected per operation.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::model::{
    Attachment, AttachmentFile, ChannelId, Message, MessageId, OutgoingMessage, UserId,
};
use crate::source::ChannelDataSource;

/// Side effect observed by the in-memory source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    HistoryPage {
        channel: ChannelId,
        before: Option<MessageId>,
        returned: usize,
    },
    FetchAttachment {
        url: String,
    },
    Send {
        channel: ChannelId,
        created: MessageId,
    },
    Delete {
        channel: ChannelId,
        message: MessageId,
    },
}

#[derive(Default)]
struct State {
    channels: HashMap<ChannelId, Vec<Message>>,
    names: HashMap<ChannelId, String>,
    payloads: HashMap<String, Vec<u8>>,
    events: Vec<SourceEvent>,
    sends: usize,
    deletes: usize,
    history_calls: usize,
    fail_send_at: Option<usize>,
    fail_history_at: Option<usize>,
    fail_delete: HashSet<MessageId>,
    fail_attachment: HashSet<String>,
    cancel_on_send: Option<(usize, CancellationToken)>,
    cancel_on_delete: Option<(usize, CancellationToken)>,
    last_id: u64,
}

impl State {
    fn next_id(&mut self) -> MessageId {
        let candidate = MessageId::from_timestamp(Utc::now()).0;
        self.last_id = candidate.max(self.last_id + 1);
        MessageId(self.last_id)
    }
}

/// Author identity used for messages the source creates on `send`.
pub const RELAY_USER: UserId = UserId(1);

/// Data source backed by process memory.
#[derive(Default)]
pub struct MemorySource {
    state: Mutex<State>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message into its channel, keeping chronological order.
    pub async fn insert(&self, message: Message) {
        let mut state = self.state.lock().await;
        state.last_id = state.last_id.max(message.id.0);
        let channel = state.channels.entry(message.channel_id).or_default();
        let pos = channel.partition_point(|m| m.id < message.id);
        channel.insert(pos, message);
    }

    /// Register the payload served for an attachment URL.
    pub async fn put_payload(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.state.lock().await.payloads.insert(url.into(), bytes);
    }

    pub async fn set_channel_name(&self, channel: ChannelId, name: impl Into<String>) {
        self.state.lock().await.names.insert(channel, name.into());
    }

    /// Make the `n`th call to `send` (1-based) fail.
    pub async fn fail_send_at(&self, n: usize) {
        self.state.lock().await.fail_send_at = Some(n);
    }

    /// Make the `n`th history page request (1-based) fail.
    pub async fn fail_history_at(&self, n: usize) {
        self.state.lock().await.fail_history_at = Some(n);
    }

    /// Make deleting this message fail.
    pub async fn fail_delete_of(&self, message: MessageId) {
        self.state.lock().await.fail_delete.insert(message);
    }

    /// Make downloading this URL fail.
    pub async fn fail_attachment(&self, url: impl Into<String>) {
        self.state.lock().await.fail_attachment.insert(url.into());
    }

    /// Cancel `token` once the `n`th send (1-based) has gone through.
    pub async fn cancel_on_send(&self, n: usize, token: CancellationToken) {
        self.state.lock().await.cancel_on_send = Some((n, token));
    }

    /// Cancel `token` once the `n`th delete (1-based) has gone through.
    pub async fn cancel_on_delete(&self, n: usize, token: CancellationToken) {
        self.state.lock().await.cancel_on_delete = Some((n, token));
    }

    /// Messages currently in a channel, oldest first.
    pub async fn messages(&self, channel: ChannelId) -> Vec<Message> {
        self.state
            .lock()
            .await
            .channels
            .get(&channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Every side effect so far, in call order.
    pub async fn events(&self) -> Vec<SourceEvent> {
        self.state.lock().await.events.clone()
    }
}

#[async_trait]
impl ChannelDataSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn channel_name(&self, channel: ChannelId) -> Result<String, TransportError> {
        let state = self.state.lock().await;
        Ok(state
            .names
            .get(&channel)
            .cloned()
            .unwrap_or_else(|| channel.to_string()))
    }

    async fn history_page(
        &self,
        channel: ChannelId,
        before: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>, TransportError> {
        let mut state = self.state.lock().await;
        state.history_calls += 1;
        if state.fail_history_at == Some(state.history_calls) {
            return Err(TransportError::Http("injected history failure".into()));
        }

        let page: Vec<Message> = state
            .channels
            .get(&channel)
            .map(|messages| {
                messages
                    .iter()
                    .rev()
                    .filter(|m| before.is_none_or(|b| m.id < b))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        state.events.push(SourceEvent::HistoryPage {
            channel,
            before,
            returned: page.len(),
        });
        Ok(page)
    }

    async fn send(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> Result<Message, TransportError> {
        let mut state = self.state.lock().await;
        state.sends += 1;
        if state.fail_send_at == Some(state.sends) {
            return Err(TransportError::Forbidden("injected send failure".into()));
        }

        let id = state.next_id();
        let created = Message {
            id,
            channel_id: channel,
            author_id: RELAY_USER,
            author_display_name: "relay".into(),
            author_tag: "relay".into(),
            content: message.content,
            attachments: message
                .files
                .iter()
                .map(|f| Attachment {
                    url: format!("memory://{}/{}/{}", channel, id, f.filename),
                    filename: f.filename.clone(),
                })
                .collect(),
            created_at: id.timestamp(),
        };

        for (attachment, file) in created.attachments.iter().zip(message.files) {
            state.payloads.insert(attachment.url.clone(), file.bytes);
        }
        state.channels.entry(channel).or_default().push(created.clone());
        state.events.push(SourceEvent::Send {
            channel,
            created: id,
        });
        if let Some((n, token)) = &state.cancel_on_send {
            if *n == state.sends {
                token.cancel();
            }
        }
        Ok(created)
    }

    async fn delete(&self, channel: ChannelId, message: MessageId) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.fail_delete.contains(&message) {
            return Err(TransportError::Status {
                status: 500,
                body: "injected delete failure".into(),
            });
        }

        if let Some(messages) = state.channels.get_mut(&channel) {
            messages.retain(|m| m.id != message);
        }
        state.events.push(SourceEvent::Delete { channel, message });
        state.deletes += 1;
        if let Some((n, token)) = &state.cancel_on_delete {
            if *n == state.deletes {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn fetch_attachment(
        &self,
        attachment: &Attachment,
    ) -> Result<AttachmentFile, TransportError> {
        let mut state = self.state.lock().await;
        if state.fail_attachment.contains(&attachment.url) {
            return Err(TransportError::NotFound(attachment.url.clone()));
        }

        let bytes = state
            .payloads
            .get(&attachment.url)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(attachment.url.clone()))?;
        state.events.push(SourceEvent::FetchAttachment {
            url: attachment.url.clone(),
        });
        Ok(AttachmentFile {
            filename: attachment.filename.clone(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn msg(channel: u64, minutes_ago: i64) -> Message {
        let created_at = Utc::now() - TimeDelta::minutes(minutes_ago);
        Message {
            id: MessageId::from_timestamp(created_at),
            channel_id: ChannelId(channel),
            author_id: UserId(9),
            author_display_name: "nine".into(),
            author_tag: "nine".into(),
            content: format!("{minutes_ago}m ago"),
            attachments: vec![],
            created_at,
        }
    }

    #[tokio::test]
    async fn history_is_newest_first_and_respects_cursor() {
        let source = MemorySource::new();
        for m in [30, 20, 10] {
            source.insert(msg(1, m)).await;
        }

        let page = source.history_page(ChannelId(1), None, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "10m ago");
        assert_eq!(page[1].content, "20m ago");

        let rest = source
            .history_page(ChannelId(1), Some(page[1].id), 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].content, "30m ago");
    }

    #[tokio::test]
    async fn delete_of_missing_message_is_ok() {
        let source = MemorySource::new();
        source.delete(ChannelId(1), MessageId(12345)).await.unwrap();
    }

    #[tokio::test]
    async fn sent_attachments_can_be_fetched_back() {
        let source = MemorySource::new();
        let created = source
            .send(
                ChannelId(2),
                OutgoingMessage {
                    content: "x".into(),
                    files: vec![AttachmentFile {
                        filename: "a.txt".into(),
                        bytes: b"abc".to_vec(),
                    }],
                },
            )
            .await
            .unwrap();

        let file = source.fetch_attachment(&created.attachments[0]).await.unwrap();
        assert_eq!(file.bytes, b"abc");
    }

    #[tokio::test]
    async fn injected_send_failure_hits_only_that_call() {
        let source = MemorySource::new();
        source.fail_send_at(2).await;
        let out = || OutgoingMessage {
            content: "x".into(),
            files: vec![],
        };
        assert!(source.send(ChannelId(2), out()).await.is_ok());
        assert!(source.send(ChannelId(2), out()).await.is_err());
        assert!(source.send(ChannelId(2), out()).await.is_ok());
        assert_eq!(source.messages(ChannelId(2)).await.len(), 2);
    }
}
