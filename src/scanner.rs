//! History scanner: turns paged history reads into one lazy message stream.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::config::MAX_PAGE_SIZE;
use crate::error::TransportError;
use crate::model::{ChannelId, Message, MessageId};
use crate::source::ChannelDataSource;

/// Lazy, single-pass sequence of messages, newest first.
pub type MessageStream = BoxStream<'static, Result<Message, TransportError>>;

/// Pages through a channel's history using id cursors.
///
/// The cursor is always the smallest id seen so far, so deleting messages
/// that were already yielded (as migration and purge do mid-scan) cannot
/// shift later pages.
#[derive(Clone)]
pub struct HistoryScanner {
    source: Arc<dyn ChannelDataSource>,
    page_size: usize,
}

impl HistoryScanner {
    pub fn new(source: Arc<dyn ChannelDataSource>, page_size: usize) -> Self {
        Self {
            source,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Stream every message in `channel`, optionally only those created
    /// strictly before `before`.
    ///
    /// The stream ends after the first empty page. A transport error is
    /// yielded once and ends the stream.
    pub fn scan(&self, channel: ChannelId, before: Option<DateTime<Utc>>) -> MessageStream {
        let state = ScanState {
            source: Arc::clone(&self.source),
            channel,
            page_size: self.page_size,
            cursor: before.map(MessageId::cursor_before),
            buffer: VecDeque::new(),
            seen: HashSet::new(),
            exhausted: false,
            pages: 0,
        };

        futures::stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(message) = state.buffer.pop_front() {
                    return Ok::<_, TransportError>(Some((message, state)));
                }
                if state.exhausted {
                    tracing::debug!(
                        channel = %state.channel,
                        pages = state.pages,
                        seen = state.seen.len(),
                        "History scan finished"
                    );
                    return Ok(None);
                }
                state.next_page().await?;
            }
        })
        .boxed()
    }
}

struct ScanState {
    source: Arc<dyn ChannelDataSource>,
    channel: ChannelId,
    page_size: usize,
    cursor: Option<MessageId>,
    buffer: VecDeque<Message>,
    seen: HashSet<MessageId>,
    exhausted: bool,
    pages: usize,
}

impl ScanState {
    async fn next_page(&mut self) -> Result<(), TransportError> {
        let mut page = self
            .source
            .history_page(self.channel, self.cursor, self.page_size)
            .await?;
        self.pages += 1;

        let Some(oldest) = page.iter().map(|m| m.id).min() else {
            self.exhausted = true;
            return Ok(());
        };

        // A cursor that does not move would page forever.
        if self.cursor.is_some_and(|c| oldest >= c) {
            tracing::warn!(
                channel = %self.channel,
                cursor = ?self.cursor,
                "History page did not advance; ending scan"
            );
            self.exhausted = true;
            return Ok(());
        }

        let bound = self.cursor;
        page.sort_by(|a, b| b.id.cmp(&a.id));
        let before_dedup = page.len();
        for message in page {
            if bound.is_some_and(|b| message.id >= b) || !self.seen.insert(message.id) {
                continue;
            }
            self.buffer.push_back(message);
        }

        tracing::debug!(
            channel = %self.channel,
            page = self.pages,
            received = before_dedup,
            fresh = self.buffer.len(),
            "Scanned history page"
        );

        self.cursor = Some(oldest);
        Ok(())
    }
}
