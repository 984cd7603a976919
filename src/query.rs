use anyhow::Result;
use chrono::DateTime;
use futures::Stream;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::storage::{Database, ItemFilter, ItemPreview};

/// Rows fetched per page unless the host configures otherwise.
pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// One row of the item list, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayItem {
    pub id: i64,
    pub title: String,
    pub snippet: String,
    pub feed_title: String,
    pub unread: bool,
    /// Short date of publication, empty when the item has none.
    pub published: String,
    pub image_url: Option<String>,
    pub link: Option<String>,
}

impl DisplayItem {
    fn from_preview(preview: ItemPreview) -> Self {
        let published = preview
            .pub_date
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|ts| ts.format("%x").to_string())
            .unwrap_or_default();
        Self {
            id: preview.id,
            title: preview.title,
            snippet: preview.snippet,
            feed_title: preview.feed_title,
            unread: preview.unread,
            published,
            image_url: preview.image_url,
            link: preview.link,
        }
    }
}

/// Lazy pull-based pager over one query configuration.
///
/// A pager is bound to the configuration it was opened with. When the
/// selection, unread filter, or sort direction changes, the engine bumps
/// the shared view generation and every previously opened pager goes
/// stale: `next_page` returns `None` instead of rows, including for a
/// fetch already in flight when the change lands, so stale rows never
/// reach the caller. An empty page is a valid end-of-data answer, not an
/// error; `reset` rewinds to the first page.
pub struct ItemPager {
    db: Database,
    filter: ItemFilter,
    page_size: i64,
    offset: i64,
    generation: u64,
    live: Arc<AtomicU64>,
}

impl ItemPager {
    pub(crate) fn new(
        db: Database,
        filter: ItemFilter,
        page_size: i64,
        generation: u64,
        live: Arc<AtomicU64>,
    ) -> Self {
        Self {
            db,
            filter,
            page_size,
            offset: 0,
            generation,
            live,
        }
    }

    /// Whether the engine configuration has moved on since this pager was
    /// opened.
    pub fn is_stale(&self) -> bool {
        self.generation != self.live.load(Ordering::SeqCst)
    }

    /// The filter this pager was opened with.
    pub fn filter(&self) -> &ItemFilter {
        &self.filter
    }

    /// Fetches the next page, or `None` once the pager is stale.
    pub async fn next_page(&mut self) -> Result<Option<Vec<DisplayItem>>> {
        if self.is_stale() {
            return Ok(None);
        }
        let rows = self
            .db
            .paged_items(&self.filter, self.page_size, self.offset)
            .await?;
        if self.is_stale() {
            // The configuration changed while the query ran.
            tracing::debug!(offset = self.offset, "discarding stale page");
            return Ok(None);
        }
        self.offset += rows.len() as i64;
        Ok(Some(rows.into_iter().map(DisplayItem::from_preview).collect()))
    }

    /// Rewinds to the first page.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Flattens the remaining pages into a stream of single items, fetched
    /// page by page as the consumer pulls. The stream ends at the first
    /// empty page or once the pager goes stale; dropping it cancels any
    /// fetch in flight.
    pub fn into_stream(self) -> impl Stream<Item = Result<DisplayItem>> {
        futures::stream::try_unfold(
            (self, VecDeque::new()),
            |(mut pager, mut buffered)| async move {
                loop {
                    if let Some(item) = buffered.pop_front() {
                        return Ok(Some((item, (pager, buffered))));
                    }
                    match pager.next_page().await? {
                        Some(page) if !page.is_empty() => buffered.extend(page),
                        _ => return Ok(None),
                    }
                }
            },
        )
    }
}
