//! Retention purger: deletes messages older than a time period.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::PurgeError;
use crate::model::{ChannelId, PurgeFailure, PurgeReport};
use crate::scanner::HistoryScanner;
use crate::source::ChannelDataSource;
use crate::time_window;

/// Best-effort deletion of everything older than a cutoff.
///
/// Unlike migration, a failed delete does not stop the run: there is no
/// ordering or pairing to protect, so the purge records it and moves on.
#[derive(Clone)]
pub struct RetentionPurger {
    source: Arc<dyn ChannelDataSource>,
    scanner: HistoryScanner,
}

impl RetentionPurger {
    pub fn new(source: Arc<dyn ChannelDataSource>, page_size: usize) -> Self {
        let scanner = HistoryScanner::new(Arc::clone(&source), page_size);
        Self { source, scanner }
    }

    /// Delete messages in `channel` older than `time_period` (e.g. `"7 days"`).
    pub async fn purge(
        &self,
        channel: ChannelId,
        time_period: &str,
        cancel: &CancellationToken,
    ) -> Result<PurgeReport, PurgeError> {
        self.purge_at(channel, time_period, Utc::now(), cancel).await
    }

    /// Same as [`purge`](Self::purge), computing the cutoff from `now`.
    pub async fn purge_at(
        &self,
        channel: ChannelId,
        time_period: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<PurgeReport, PurgeError> {
        let period = time_window::parse(time_period)?;
        let cutoff = now - period;

        tracing::info!(channel = %channel, %cutoff, time_period, "Starting purge");

        let mut stream = self.scanner.scan(channel, Some(cutoff));
        let mut deleted = 0;
        let mut failures = Vec::new();

        while let Some(item) = stream.next().await {
            if cancel.is_cancelled() {
                tracing::warn!(channel = %channel, deleted, "Purge cancelled");
                return Err(PurgeError::Cancelled { deleted });
            }

            let message = item.map_err(|source| {
                tracing::error!(channel = %channel, deleted, error = %source, "Purge scan failed");
                PurgeError::Scan { deleted, source }
            })?;

            // The cursor rounds up to a whole millisecond, so the tail of the cutoff's
            // own millisecond comes back and is filtered here.
            if message.created_at >= cutoff {
                continue;
            }

            match self.source.delete(channel, message.id).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::warn!(
                        channel = %channel,
                        message_id = %message.id,
                        error = %e,
                        "Failed to delete message; continuing"
                    );
                    failures.push(PurgeFailure {
                        message_id: message.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            channel = %channel,
            deleted,
            failed = failures.len(),
            "Purge complete"
        );
        Ok(PurgeReport {
            channel,
            deleted_count: deleted,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::error::ParseErrorReason;
    use crate::model::{Message, MessageId, UserId};
    use crate::source::MemorySource;

    const CHANNEL: ChannelId = ChannelId(3);

    fn created(at: DateTime<Utc>, tag: &str) -> Message {
        Message {
            id: MessageId::from_timestamp(at),
            channel_id: CHANNEL,
            author_id: UserId(1),
            author_display_name: "one".into(),
            author_tag: "one".into(),
            content: tag.into(),
            attachments: vec![],
            created_at: at,
        }
    }

    #[tokio::test]
    async fn bad_time_period_deletes_nothing() {
        let source = Arc::new(MemorySource::new());
        source.insert(created(Utc::now() - TimeDelta::days(30), "old")).await;
        let purger = RetentionPurger::new(source.clone(), 100);

        let err = purger
            .purge(CHANNEL, "5 fortnights", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PurgeError::Parse(ref e) if e.reason == ParseErrorReason::UnknownUnit
        ));
        assert_eq!(err.deleted(), 0);
        assert_eq!(source.messages(CHANNEL).await.len(), 1);
        assert!(source.events().await.is_empty());
    }

    #[tokio::test]
    async fn failed_delete_does_not_stop_purge() {
        let now = Utc::now();
        let source = Arc::new(MemorySource::new());
        let stuck = created(now - TimeDelta::days(9), "stuck");
        source.insert(created(now - TimeDelta::days(10), "a")).await;
        source.insert(stuck.clone()).await;
        source.insert(created(now - TimeDelta::days(8), "b")).await;
        source.fail_delete_of(stuck.id).await;
        let purger = RetentionPurger::new(source.clone(), 1);

        let report = purger
            .purge_at(CHANNEL, "7 days", now, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.deleted_count, 2);
        assert!(!report.is_complete());
        assert_eq!(report.failures[0].message_id, stuck.id);
        assert_eq!(source.messages(CHANNEL).await, vec![stuck]);
    }

    #[tokio::test]
    async fn message_in_cutoff_millisecond_is_purged() {
        let now = Utc.with_ymd_and_hms(2024, 5, 8, 12, 0, 0).unwrap() + TimeDelta::microseconds(700);
        let source = Arc::new(MemorySource::new());
        let boundary = created(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(), "boundary");
        source.insert(boundary).await;
        let purger = RetentionPurger::new(source.clone(), 100);

        let report = purger
            .purge_at(CHANNEL, "7 days", now, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.deleted_count, 1);
        assert!(source.messages(CHANNEL).await.is_empty());
    }

    #[tokio::test]
    async fn cancelled_purge_stops_after_current_delete() {
        let now = Utc::now();
        let source = Arc::new(MemorySource::new());
        for days in [12, 11, 10] {
            source
                .insert(created(now - TimeDelta::days(days), &format!("{days}d")))
                .await;
        }
        let cancel = CancellationToken::new();
        source.cancel_on_delete(1, cancel.clone()).await;
        let purger = RetentionPurger::new(source.clone(), 100);

        let err = purger
            .purge_at(CHANNEL, "7 days", now, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PurgeError::Cancelled { deleted: 1 }));
        let left: Vec<String> = source
            .messages(CHANNEL)
            .await
            .into_iter()
            .map(|m| m.content)
            .collect();
        // Newest first, so the 10-day-old message went first.
        assert_eq!(left, vec!["12d", "11d"]);
    }

    #[tokio::test]
    async fn scan_failure_reports_progress() {
        let now = Utc::now();
        let source = Arc::new(MemorySource::new());
        source.insert(created(now - TimeDelta::days(10), "a")).await;
        source.insert(created(now - TimeDelta::days(9), "b")).await;
        source.fail_history_at(2).await;
        let purger = RetentionPurger::new(source.clone(), 1);

        let err = purger
            .purge_at(CHANNEL, "1 day", now, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PurgeError::Scan { deleted: 1, .. }));
        assert_eq!(source.messages(CHANNEL).await.len(), 1);
    }
}
