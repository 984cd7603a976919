use chrono::{DateTime, Utc};
use thiserror::Error;

/// Sentinel for "no feed selected" / "no article open".
///
/// Real SQLite rowids start at 1, so selection precedence can test with a
/// plain `>` comparison.
pub const ID_UNSET: i64 = -1;

// ============================================================================
// Error Types
// ============================================================================

/// Storage-specific errors with user-friendly messages
///
/// This is the only hard-failure channel in the engine: persistence
/// unavailability propagates unmodified so the caller can degrade the whole
/// screen. Missing rows, failed content loads and stale results are all
/// represented as absent values or transient display state instead.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Another process has the item database locked
    #[error("The item database is locked by another process. Please close it and try again.")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StorageError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // Check for SQLite lock-related error messages
        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StorageError::Locked;
        }

        StorageError::Other(err)
    }
}

// ============================================================================
// Query Parameterization
// ============================================================================

/// Filter dimension selecting a single feed, a tag, or everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Feed(i64),
    Tag(String),
    All,
}

/// The full shape of a paged item query: scope, unread filter, sort
/// direction.
///
/// Twelve concrete shapes exist ((feed | tag | all) x unread x order). All
/// of them run through the same predicate and order builder, and the range
/// mutations reuse that builder in a subselect, so a paged read and a
/// mark-before/mark-after against the same filter can never disagree about
/// which rows sit before index N.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFilter {
    pub scope: Scope,
    pub only_unread: bool,
    pub newest_first: bool,
}

impl ItemFilter {
    /// Resolve a raw (feed id, tag) selection pair into a filter.
    ///
    /// Precedence when both are set: an explicit feed id wins over a tag,
    /// and a tag wins over "all items".
    pub fn from_selection(feed_id: i64, tag: &str, only_unread: bool, newest_first: bool) -> Self {
        let scope = if feed_id > ID_UNSET {
            Scope::Feed(feed_id)
        } else if !tag.is_empty() {
            Scope::Tag(tag.to_string())
        } else {
            Scope::All
        };
        Self {
            scope,
            only_unread,
            newest_first,
        }
    }
}

// ============================================================================
// Row Types
// ============================================================================

/// One row of the shared paged-view projection.
///
/// Every one of the twelve query shapes selects exactly these columns; the
/// shapes differ only in WHERE and ORDER BY.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ItemPreview {
    pub id: i64,
    pub title: String,
    pub snippet: String,
    pub feed_title: String,
    pub unread: bool,
    pub pub_date: Option<i64>,
    pub image_url: Option<String>,
    pub link: Option<String>,
}

/// Internal row type for the item-with-feed point lookup
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemWithFeedRow {
    pub id: i64,
    pub title: String,
    pub link: Option<String>,
    pub author: Option<String>,
    pub enclosure_link: Option<String>,
    pub enclosure_name: Option<String>,
    pub pub_date: Option<i64>,
    pub feed_id: i64,
    pub feed_url: String,
    pub feed_title: String,
}

impl ItemWithFeedRow {
    pub(crate) fn into_article(self) -> Article {
        Article {
            id: self.id,
            title: self.title,
            link: self.link,
            author: self.author,
            enclosure: Enclosure {
                link: self.enclosure_link,
                name: self.enclosure_name,
            },
            pub_date: self.pub_date.and_then(|secs| DateTime::from_timestamp(secs, 0)),
            feed_id: self.feed_id,
            feed_url: Some(self.feed_url),
            feed_display_title: self.feed_title,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Persisted metadata of one article, joined with its owning feed.
///
/// The view-state aggregator carries one of these for the currently open
/// article. `Default` represents "nothing loaded" with `id == ID_UNSET`,
/// which matches the unset current-article selection so the initial empty
/// snapshot passes the flow-sync gate.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub link: Option<String>,
    pub author: Option<String>,
    pub enclosure: Enclosure,
    pub pub_date: Option<DateTime<Utc>>,
    pub feed_id: i64,
    pub feed_url: Option<String>,
    pub feed_display_title: String,
}

impl Default for Article {
    fn default() -> Self {
        Self {
            id: ID_UNSET,
            title: String::new(),
            link: None,
            author: None,
            enclosure: Enclosure::default(),
            pub_date: None,
            feed_id: ID_UNSET,
            feed_url: None,
            feed_display_title: String::new(),
        }
    }
}

/// Media attachment of an article (podcast audio and the like)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enclosure {
    pub link: Option<String>,
    pub name: Option<String>,
}

impl Enclosure {
    pub fn present(&self) -> bool {
        self.link.is_some()
    }
}

/// Feed id plus display title, for the visible-feeds snapshot field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTitle {
    pub id: i64,
    pub title: String,
}

/// One entry of the navigation drawer, with its unread count.
///
/// Emitted flat: the all-items row first, then tags (alphabetical), then
/// feeds (alphabetical by display title). Nesting feeds under their tag is
/// the presentation layer's job, driven by the expanded-tag set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawerItem {
    AllItems {
        unread_count: i64,
    },
    Tag {
        tag: String,
        unread_count: i64,
    },
    Feed {
        id: i64,
        title: String,
        tag: String,
        unread_count: i64,
    },
}

/// Title shown for the current selection: the feed's display title, the tag
/// name, or `None` for "all items" (the presentation layer substitutes the
/// application name).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenTitle {
    pub title: Option<String>,
}

/// Per-feed preference for how its articles open.
///
/// Stored as TEXT on the feed row; empty or unknown values fall back to
/// `Default`, which the open-article routing treats as "show in reader".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArticleOpener {
    #[default]
    Default,
    Reader,
    CustomTab,
    DefaultBrowser,
}

impl ArticleOpener {
    pub(crate) fn parse(value: &str) -> Self {
        match value {
            "reader" => ArticleOpener::Reader,
            "custom_tab" => ArticleOpener::CustomTab,
            "browser" => ArticleOpener::DefaultBrowser,
            _ => ArticleOpener::Default,
        }
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ArticleOpener::Default => "",
            ArticleOpener::Reader => "reader",
            ArticleOpener::CustomTab => "custom_tab",
            ArticleOpener::DefaultBrowser => "browser",
        }
    }
}

/// Id and link of an item queued for full-text fetching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemForFetch {
    pub id: i64,
    pub link: Option<String>,
}

/// A new feed handed to the store by the sync pipeline or a test fixture
#[derive(Debug, Clone, Default)]
pub struct NewFeed {
    pub url: String,
    pub title: String,
    pub custom_title: String,
    pub tag: String,
    pub full_text_by_default: bool,
    pub open_articles_with: ArticleOpener,
}

/// A parsed item handed to the store by the sync pipeline.
///
/// Upserts touch metadata only; the unread and notified flags belong to
/// this engine and survive re-syncs.
#[derive(Debug, Clone, Default)]
pub struct ParsedItem {
    pub guid: String,
    pub title: String,
    pub snippet: String,
    pub link: Option<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub enclosure_link: Option<String>,
    pub enclosure_name: Option<String>,
    pub pub_date: Option<i64>,
}
