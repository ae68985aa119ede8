//! Migration engine: copy-then-delete relocation of selected messages.
//!
//! A run has two phases:
//! - **Scan**: walk the full source history (newest first), keeping every
//!   message the policy selects.
//! - **Replay**: walk the batch oldest first, one message at a time:
//!   download attachments, post the copy, then delete the original.
//!
//! A failed step stops the run. Everything before it is fully moved,
//! everything after it is untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{MigrationError, StepStage, TransportError};
use crate::model::{AttachmentFile, ChannelId, Message, MigrationResult, OutgoingMessage};
use crate::policy::SelectionPolicy;
use crate::scanner::HistoryScanner;
use crate::source::ChannelDataSource;

/// Moves messages between two channels of the same data source.
#[derive(Clone)]
pub struct MigrationEngine {
    source: Arc<dyn ChannelDataSource>,
    scanner: HistoryScanner,
}

impl MigrationEngine {
    pub fn new(source: Arc<dyn ChannelDataSource>, page_size: usize) -> Self {
        let scanner = HistoryScanner::new(Arc::clone(&source), page_size);
        Self { source, scanner }
    }

    /// Move every message in `from` selected by `policy` into `to`.
    pub async fn migrate(
        &self,
        from: ChannelId,
        to: ChannelId,
        policy: &SelectionPolicy,
        cancel: &CancellationToken,
    ) -> Result<MigrationResult, MigrationError> {
        self.migrate_at(from, to, policy, Utc::now(), cancel).await
    }

    /// Same as [`migrate`](Self::migrate), evaluating the policy at `now`.
    pub async fn migrate_at(
        &self,
        from: ChannelId,
        to: ChannelId,
        policy: &SelectionPolicy,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<MigrationResult, MigrationError> {
        tracing::info!(
            source = %from,
            destination = %to,
            policy = ?policy,
            backend = self.source.name(),
            "Starting migration"
        );

        let mut batch = self.collect_batch(from, policy, now, cancel).await?;
        batch.reverse();

        if cancel.is_cancelled() {
            return Err(MigrationError::Cancelled { moved: 0 });
        }

        let total = batch.len();
        tracing::info!(source = %from, matched = total, "Replaying batch");

        for (moved, message) in batch.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(source = %from, moved, remaining = total - moved, "Migration cancelled");
                return Err(MigrationError::Cancelled { moved });
            }

            self.move_one(message, to).await.map_err(|(stage, source)| {
                tracing::error!(
                    source_channel = %from,
                    message_id = %message.id,
                    %stage,
                    error = %source,
                    moved,
                    "Migration step failed; aborting remaining batch"
                );
                MigrationError::Step {
                    moved,
                    message_id: message.id,
                    stage,
                    source,
                }
            })?;
        }

        tracing::info!(source = %from, destination = %to, moved = total, "Migration complete");
        Ok(MigrationResult {
            moved_count: total,
            source_channel: from,
            destination_channel: to,
        })
    }

    /// Scan the source and keep matches in the order received (newest first).
    async fn collect_batch(
        &self,
        from: ChannelId,
        policy: &SelectionPolicy,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, MigrationError> {
        let mut stream = self.scanner.scan(from, None);
        let mut batch = Vec::new();

        while let Some(item) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(MigrationError::Cancelled { moved: 0 });
            }
            let message = item.map_err(|source| MigrationError::Scan { source })?;
            if policy.matches(&message, now) {
                batch.push(message);
            } else if policy.is_monotonic() {
                // Newest-first: everything older misses the window too.
                break;
            }
        }

        Ok(batch)
    }

    /// One atomic step: fetch attachments, send the copy, delete the original.
    async fn move_one(
        &self,
        message: &Message,
        to: ChannelId,
    ) -> Result<(), (StepStage, TransportError)> {
        let mut files: Vec<AttachmentFile> = Vec::new();
        for attachment in message.carried_attachments() {
            let file = self
                .source
                .fetch_attachment(attachment)
                .await
                .map_err(|e| (StepStage::FetchAttachment, e))?;
            files.push(file);
        }

        let copy = OutgoingMessage::relocated(message, files);
        let created = self
            .source
            .send(to, copy)
            .await
            .map_err(|e| (StepStage::Send, e))?;

        self.source
            .delete(message.channel_id, message.id)
            .await
            .map_err(|e| (StepStage::Delete, e))?;

        tracing::debug!(
            original = %message.id,
            copy = %created.id,
            destination = %to,
            "Message moved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::model::{MessageId, UserId};
    use crate::source::MemorySource;

    const FROM: ChannelId = ChannelId(10);
    const TO: ChannelId = ChannelId(20);

    fn at(now: DateTime<Utc>, minutes_ago: i64, author: u64) -> Message {
        let created_at = now - TimeDelta::minutes(minutes_ago);
        Message {
            id: MessageId::from_timestamp(created_at),
            channel_id: FROM,
            author_id: UserId(author),
            author_display_name: format!("user{author}"),
            author_tag: format!("user{author}"),
            content: format!("{minutes_ago} minutes ago"),
            attachments: vec![],
            created_at,
        }
    }

    #[tokio::test]
    async fn window_policy_stops_at_first_miss() {
        let now = Utc::now();
        let source = Arc::new(MemorySource::new());
        for minutes in [300, 240, 180, 20, 10] {
            source.insert(at(now, minutes, 1)).await;
        }
        let engine = MigrationEngine::new(source.clone(), 2);

        let result = engine
            .migrate_at(
                FROM,
                TO,
                &SelectionPolicy::LastWindow(TimeDelta::hours(1)),
                now,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.moved_count, 2);
        assert_eq!(source.messages(FROM).await.len(), 3);
        let moved: Vec<String> = source
            .messages(TO)
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(
            moved,
            vec!["user1 (user1):\n20 minutes ago", "user1 (user1):\n10 minutes ago"]
        );
    }

    #[tokio::test]
    async fn cancelled_before_start_moves_nothing() {
        let now = Utc::now();
        let source = Arc::new(MemorySource::new());
        source.insert(at(now, 5, 1)).await;
        let engine = MigrationEngine::new(source.clone(), 100);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .migrate(FROM, TO, &SelectionPolicy::All, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::Cancelled { moved: 0 }));
        assert_eq!(source.messages(FROM).await.len(), 1);
        assert!(source.messages(TO).await.is_empty());
    }

    #[tokio::test]
    async fn cancel_between_steps_keeps_channels_consistent() {
        let now = Utc::now();
        let source = Arc::new(MemorySource::new());
        for minutes in [40, 30, 20, 10] {
            source.insert(at(now, minutes, 1)).await;
        }
        let cancel = CancellationToken::new();
        source.cancel_on_send(2, cancel.clone()).await;
        let engine = MigrationEngine::new(source.clone(), 100);

        let err = engine
            .migrate(FROM, TO, &SelectionPolicy::All, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::Cancelled { moved: 2 }));
        // The step in flight when the cancel landed still finished its delete.
        let left: Vec<String> = source
            .messages(FROM)
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(left, vec!["20 minutes ago", "10 minutes ago"]);
        let copied: Vec<String> = source
            .messages(TO)
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(
            copied,
            vec!["user1 (user1):\n40 minutes ago", "user1 (user1):\n30 minutes ago"]
        );
    }

    #[tokio::test]
    async fn delete_failure_aborts_with_stage() {
        let now = Utc::now();
        let source = Arc::new(MemorySource::new());
        let first = at(now, 30, 1);
        let second = at(now, 20, 1);
        source.insert(first.clone()).await;
        source.insert(second.clone()).await;
        source.fail_delete_of(first.id).await;
        let engine = MigrationEngine::new(source.clone(), 100);

        let err = engine
            .migrate(FROM, TO, &SelectionPolicy::All, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            MigrationError::Step {
                moved,
                message_id,
                stage,
                ..
            } => {
                assert_eq!(moved, 0);
                assert_eq!(message_id, first.id);
                assert_eq!(stage, StepStage::Delete);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Second message never touched.
        assert!(source.messages(FROM).await.contains(&second));
        assert_eq!(source.messages(TO).await.len(), 1);
    }
}
