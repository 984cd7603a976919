//! Reading-state and query engine for an RSS/Atom reader.
//!
//! The crate owns the item store (SQLite through sqlx), paged and filtered
//! item queries, bulk read-state mutation, per-article content resolution,
//! and the continuously recombined [`ViewSnapshot`] the presentation layer
//! renders from. Everything outside that — fetching feeds, storing article
//! bodies, speaking text — enters through the trait seams in
//! [`Collaborators`].

pub mod config;
pub mod content;
pub mod engine;
pub mod query;
pub mod readaloud;
pub mod selection;
pub mod session;
pub mod settings;
mod signal;
pub mod storage;
pub mod sync;
pub mod util;
pub mod viewstate;

pub use config::{Config, ConfigError};
pub use content::{BlobStore, FullTextFetcher, TextToDisplay};
pub use engine::{ArticleRoute, Collaborators, Engine, EngineOptions};
pub use query::{DisplayItem, ItemPager, DEFAULT_PAGE_SIZE};
pub use readaloud::{PlaybackEngine, PlaybackStatus};
pub use selection::{CurrentArticle, FeedAndTag};
pub use session::SessionState;
pub use settings::{FeedItemStyle, LinkOpener, SettingsState, Theme};
pub use storage::{
    Article, ArticleOpener, Database, DbOptions, DrawerItem, Enclosure, FeedTitle, ItemFilter,
    ItemForFetch, ItemPreview, NewFeed, ParsedItem, Scope, ScreenTitle, StorageError, ID_UNSET,
};
pub use sync::{SyncRequest, SyncTrigger};
pub use viewstate::ViewSnapshot;
