mod feeds;
mod items;
mod schema;
mod types;

pub use schema::{Database, DbOptions};
pub use types::{
    Article, ArticleOpener, DrawerItem, Enclosure, FeedTitle, ItemFilter, ItemForFetch,
    ItemPreview, NewFeed, ParsedItem, Scope, ScreenTitle, StorageError, ID_UNSET,
};
