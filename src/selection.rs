use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;

use crate::signal::ChangeSignal;
use crate::storage::ID_UNSET;

/// Which slice of the item list is selected: one feed, one tag, or all items.
///
/// `feed_id > ID_UNSET` wins over a non-empty tag; both unset means all
/// items. The precedence itself is applied by
/// [`ItemFilter::from_selection`](crate::storage::ItemFilter::from_selection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedAndTag {
    pub feed_id: i64,
    pub tag: String,
}

impl Default for FeedAndTag {
    fn default() -> Self {
        Self {
            feed_id: ID_UNSET,
            tag: String::new(),
        }
    }
}

/// The article pane state as one value.
///
/// `item_id` and `is_open` always move together through a single watch
/// publication, so no observer can see the pane flip open before the id
/// settles on the new article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentArticle {
    pub item_id: i64,
    pub is_open: bool,
}

impl Default for CurrentArticle {
    fn default() -> Self {
        Self {
            item_id: ID_UNSET,
            is_open: false,
        }
    }
}

/// Owner of the cross-cutting selection state: current feed/tag, current
/// article, and which drawer tags are expanded.
///
/// All writes publish through watch channels and bump the aggregation
/// signal only on real changes. Nothing else in the crate writes these
/// values.
pub(crate) struct Selection {
    feed_and_tag: watch::Sender<FeedAndTag>,
    article: watch::Sender<CurrentArticle>,
    expanded_tags: watch::Sender<BTreeSet<String>>,
    signal: Arc<ChangeSignal>,
}

impl Selection {
    pub(crate) fn new(
        feed_and_tag: FeedAndTag,
        article: CurrentArticle,
        expanded_tags: BTreeSet<String>,
        signal: Arc<ChangeSignal>,
    ) -> Self {
        Self {
            feed_and_tag: watch::Sender::new(feed_and_tag),
            article: watch::Sender::new(article),
            expanded_tags: watch::Sender::new(expanded_tags),
            signal,
        }
    }

    pub(crate) fn feed_and_tag(&self) -> FeedAndTag {
        self.feed_and_tag.borrow().clone()
    }

    pub(crate) fn article(&self) -> CurrentArticle {
        *self.article.borrow()
    }

    pub(crate) fn expanded_tags(&self) -> BTreeSet<String> {
        self.expanded_tags.borrow().clone()
    }

    #[cfg(test)]
    pub(crate) fn subscribe_article(&self) -> watch::Receiver<CurrentArticle> {
        self.article.subscribe()
    }

    pub(crate) fn set_feed_and_tag(&self, feed_id: i64, tag: impl Into<String>) -> bool {
        let next = FeedAndTag {
            feed_id,
            tag: tag.into(),
        };
        let changed = self.feed_and_tag.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
        if changed {
            self.signal.bump();
        }
        changed
    }

    /// Selects an article and opens the pane in one publication.
    pub(crate) fn set_current_article(&self, item_id: i64) -> bool {
        let changed = self.article.send_if_modified(|current| {
            let next = CurrentArticle {
                item_id,
                is_open: true,
            };
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
        if changed {
            self.signal.bump();
        }
        changed
    }

    /// Opens or closes the pane without touching the selected id.
    pub(crate) fn set_article_open(&self, open: bool) -> bool {
        let changed = self.article.send_if_modified(|current| {
            if current.is_open != open {
                current.is_open = open;
                true
            } else {
                false
            }
        });
        if changed {
            self.signal.bump();
        }
        changed
    }

    /// Returns whether the tag is expanded after the toggle.
    pub(crate) fn toggle_tag_expansion(&self, tag: &str) -> bool {
        let mut expanded_now = false;
        self.expanded_tags.send_modify(|tags| {
            if !tags.remove(tag) {
                tags.insert(tag.to_owned());
                expanded_now = true;
            }
        });
        self.signal.bump();
        expanded_now
    }
}
