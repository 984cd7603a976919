use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::watch;

use crate::signal::ChangeSignal;

/// What the article pane should render for one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextToDisplay {
    /// The synced summary body.
    #[default]
    Default,
    /// The fetched full-text body.
    Fulltext,
    /// A full-text fetch is in flight.
    LoadingFulltext,
    /// The last full-text fetch failed; a fresh request restarts it.
    FailedToLoadFulltext,
}

/// Reader side of the external article-body store.
///
/// Bodies are opaque HTML byte streams written by the sync pipeline and the
/// full-text fetcher. This crate only checks presence and reads them back.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether a full-text body is already stored for the item.
    async fn full_text_exists(&self, item_id: i64) -> bool;

    /// Opens the synced summary body.
    async fn open_summary(&self, item_id: i64) -> io::Result<Box<dyn AsyncRead + Send + Unpin>>;

    /// Opens the fetched full-text body.
    async fn open_full_text(&self, item_id: i64) -> io::Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// External full-text download service.
#[async_trait]
pub trait FullTextFetcher: Send + Sync {
    /// Ensures a full-text body is stored for the item, fetching it from
    /// `link` if missing. The link is passed through as stored, absent
    /// included; an item without one is the fetcher's failure to report.
    /// Returns whether a body is present afterwards.
    async fn fetch_if_missing(&self, item_id: i64, link: Option<&str>) -> bool;
}

/// Per-item text-to-display states, keyed by item id.
///
/// An absent entry is not the same as an explicit [`TextToDisplay::Default`]:
/// absent falls back to the feed's full-text-by-default flag at resolution
/// time, while an explicit entry always wins. Entries live for the UI
/// session and travel through [`SessionState`](crate::session::SessionState)
/// across process restarts.
pub(crate) struct ContentResolver {
    states: watch::Sender<BTreeMap<i64, TextToDisplay>>,
    signal: Arc<ChangeSignal>,
}

impl ContentResolver {
    pub(crate) fn new(initial: BTreeMap<i64, TextToDisplay>, signal: Arc<ChangeSignal>) -> Self {
        Self {
            states: watch::Sender::new(initial),
            signal,
        }
    }

    pub(crate) fn set(&self, item_id: i64, state: TextToDisplay) -> bool {
        let changed = self.states.send_if_modified(|states| {
            if states.get(&item_id) == Some(&state) {
                false
            } else {
                states.insert(item_id, state);
                true
            }
        });
        if changed {
            self.signal.bump();
        }
        changed
    }

    pub(crate) fn resolved_for(&self, item_id: i64, full_text_by_default: bool) -> TextToDisplay {
        self.states
            .borrow()
            .get(&item_id)
            .copied()
            .unwrap_or(if full_text_by_default {
                TextToDisplay::Fulltext
            } else {
                TextToDisplay::Default
            })
    }

    pub(crate) fn export(&self) -> BTreeMap<i64, TextToDisplay> {
        self.states.borrow().clone()
    }
}
