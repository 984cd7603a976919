use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::content::{BlobStore, ContentResolver, FullTextFetcher, TextToDisplay};
use crate::query::{ItemPager, DEFAULT_PAGE_SIZE};
use crate::readaloud::{PlaybackEngine, PlaybackStatus, ReadAloudController};
use crate::selection::{CurrentArticle, FeedAndTag, Selection};
use crate::session::SessionState;
use crate::settings::{FeedItemStyle, LinkOpener, Settings, SettingsState, Theme};
use crate::signal::ChangeSignal;
use crate::storage::{
    Article, ArticleOpener, Database, DrawerItem, FeedTitle, ItemFilter, ItemForFetch, Scope,
    ScreenTitle, ID_UNSET,
};
use crate::sync::{SyncRequest, SyncTrigger};
use crate::util::plain_text_of_html;
use crate::viewstate::{UiFlags, UiState, ViewSnapshot};

/// External services the engine drives.
pub struct Collaborators {
    pub blobs: Arc<dyn BlobStore>,
    pub full_text: Arc<dyn FullTextFetcher>,
    pub sync: Arc<dyn SyncTrigger>,
    pub playback: Arc<dyn PlaybackEngine>,
}

/// Construction-time knobs, fixed for the engine's lifetime.
pub struct EngineOptions {
    pub page_size: i64,
    pub initial_settings: SettingsState,
    pub session: SessionState,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            initial_settings: SettingsState::default(),
            session: SessionState::default(),
        }
    }
}

/// Where an opened article should be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleRoute {
    /// The app's own reader pane; the current article has been set.
    Reader,
    CustomTab(String),
    DefaultBrowser(String),
}

/// Values recomputed from storage whenever the item set or the selection
/// changes. Published as one unit so the aggregator never mixes a fresh
/// count with a stale title.
#[derive(Debug, Clone, PartialEq)]
struct Derived {
    article: Article,
    article_full_text_default: bool,
    drawer_items: Vec<DrawerItem>,
    visible_feeds: Vec<FeedTitle>,
    visible_item_count: i64,
    screen_title: ScreenTitle,
}

impl Default for Derived {
    fn default() -> Self {
        Self {
            article: Article::default(),
            article_full_text_default: false,
            drawer_items: Vec::new(),
            visible_feeds: Vec::new(),
            // Matches the initial snapshot: count 1 and a blank title keep
            // the first frame calm until real values arrive.
            visible_item_count: 1,
            screen_title: ScreenTitle {
                title: Some(String::new()),
            },
        }
    }
}

struct Inner {
    db: Database,
    settings: Settings,
    selection: Selection,
    content: ContentResolver,
    readaloud: ReadAloudController,
    ui: UiState,
    blobs: Arc<dyn BlobStore>,
    full_text: Arc<dyn FullTextFetcher>,
    sync: Arc<dyn SyncTrigger>,
    /// Wakes the storage-derived recompute worker.
    requery: Arc<ChangeSignal>,
    /// Wakes the snapshot recombination worker.
    recombine: Arc<ChangeSignal>,
    /// Advances whenever the active query configuration changes; pagers
    /// opened under an older value go stale.
    view_generation: Arc<AtomicU64>,
    derived: watch::Sender<Derived>,
    snapshot: watch::Sender<ViewSnapshot>,
    page_size: i64,
}

impl Inner {
    fn current_filter(&self) -> ItemFilter {
        let FeedAndTag { feed_id, tag } = self.selection.feed_and_tag();
        let settings = self.settings.get();
        ItemFilter::from_selection(feed_id, &tag, settings.show_only_unread, settings.newest_first)
    }

    fn invalidate_pagers(&self) {
        self.view_generation.fetch_add(1, Ordering::SeqCst);
    }

    async fn recompute_derived(&self) -> Result<Derived> {
        let FeedAndTag { feed_id, tag } = self.selection.feed_and_tag();
        let article_id = self.selection.article().item_id;
        let filter = self.current_filter();

        let visible_item_count = self.db.visible_item_count(&filter).await?;
        let screen_title = self.db.screen_title(feed_id, &tag).await?;
        let drawer_items = self.db.drawer_items_with_unread().await?;
        let visible_feeds = self.db.visible_feed_titles(feed_id, &tag).await?;
        let article = self
            .db
            .item_with_feed(article_id)
            .await?
            .unwrap_or_default();
        let article_full_text_default = if article.id > ID_UNSET {
            self.db.full_text_by_default(article.id).await?
        } else {
            false
        };

        Ok(Derived {
            article,
            article_full_text_default,
            drawer_items,
            visible_feeds,
            visible_item_count,
            screen_title,
        })
    }

    fn build_snapshot(&self) -> ViewSnapshot {
        let settings = self.settings.get();
        let FeedAndTag { feed_id, tag } = self.selection.feed_and_tag();
        let current_article = self.selection.article();
        let ui = self.ui.get();
        let derived = self.derived.borrow().clone();
        let have_visible_items = derived.visible_item_count > 0;
        let text_to_display = self
            .content
            .resolved_for(current_article.item_id, derived.article_full_text_default);

        ViewSnapshot {
            only_unread: settings.show_only_unread,
            show_fab: settings.show_fab && have_visible_items,
            show_thumbnails: settings.show_thumbnails,
            theme: settings.theme,
            latest_sync_timestamp: settings.latest_sync_timestamp,
            drawer_items: derived.drawer_items,
            feed_item_style: settings.feed_item_style,
            expanded_tags: self.selection.expanded_tags(),
            toolbar_menu_visible: ui.toolbar_menu_visible,
            visible_item_count: derived.visible_item_count,
            have_visible_items,
            screen_title: derived.screen_title,
            edit_dialog_visible: ui.edit_dialog_visible,
            delete_dialog_visible: ui.delete_dialog_visible,
            visible_feeds: derived.visible_feeds,
            current_article,
            link_opener: settings.link_opener,
            current_feed_id: feed_id,
            current_tag: tag,
            article: derived.article,
            text_to_display,
            read_aloud_title: self.readaloud.title(),
            playback_status: self.readaloud.status(),
        }
    }
}

/// Refreshes storage-derived values, then parks until the next requery
/// signal. The generation check closes the gap between finishing a pass
/// and going back to sleep: a write landing mid-pass re-runs immediately.
async fn recompute_loop(inner: Arc<Inner>) {
    loop {
        let generation = inner.requery.generation();
        match inner.recompute_derived().await {
            Ok(derived) => {
                let changed = inner.derived.send_if_modified(|current| {
                    if *current != derived {
                        *current = derived;
                        true
                    } else {
                        false
                    }
                });
                if changed {
                    inner.recombine.bump();
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "derived-state refresh failed");
            }
        }
        while inner.requery.generation() == generation {
            inner.requery.notified().await;
        }
    }
}

/// Rebuilds the joined snapshot from the latest value of every input.
///
/// One recombination runs at a time. If any input advances while a pass is
/// combining, the pass is thrown away and restarted from fresh values, so
/// snapshots can never publish out of order. A finished snapshot still has
/// to pass the flow-sync gate: when the loaded article does not belong to
/// the currently selected item, the whole snapshot is suppressed rather
/// than published torn.
async fn recombine_loop(inner: Arc<Inner>) {
    loop {
        let generation = inner.recombine.generation();
        let snapshot = inner.build_snapshot();
        if inner.recombine.generation() != generation {
            continue;
        }
        if snapshot.article.id == snapshot.current_article.item_id {
            inner.snapshot.send_if_modified(|current| {
                if *current != snapshot {
                    *current = snapshot;
                    true
                } else {
                    false
                }
            });
        } else {
            tracing::debug!(
                loaded = snapshot.article.id,
                selected = snapshot.current_article.item_id,
                "suppressed out-of-sync snapshot"
            );
        }
        while inner.recombine.generation() == generation {
            inner.recombine.notified().await;
        }
    }
}

/// Forwards the playback engine's own state streams into the recombination
/// signal, so they behave like every other registered input.
async fn forward_playback(
    mut status: watch::Receiver<PlaybackStatus>,
    mut title: watch::Receiver<Option<String>>,
    signal: Arc<ChangeSignal>,
) {
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = title.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        signal.bump();
    }
}

/// The feed-reader core: item queries, read-state mutation, article content
/// resolution, and one continuously recombined view snapshot.
///
/// Two workers run behind the public surface. The requery worker refreshes
/// everything derived from storage (counts, drawer, titles, the open
/// article's row); the recombine worker joins those with settings,
/// selection, UI flags, and playback state into a [`ViewSnapshot`],
/// de-duplicated and gated so article fields always match the selected
/// item. All mutators are async and have completed their storage write by
/// the time they return, so a caller that re-queries afterwards sees its
/// own change.
pub struct Engine {
    inner: Arc<Inner>,
    workers: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn new(db: Database, collaborators: Collaborators, options: EngineOptions) -> Self {
        let requery = Arc::new(ChangeSignal::new());
        let recombine = Arc::new(ChangeSignal::new());
        let session = options.session;

        let settings = Settings::new(options.initial_settings, recombine.clone());
        let selection = Selection::new(
            FeedAndTag {
                feed_id: session.current_feed_id,
                tag: session.current_tag,
            },
            CurrentArticle {
                item_id: session.current_item_id,
                is_open: session.article_open,
            },
            session.expanded_tags,
            recombine.clone(),
        );
        let content = ContentResolver::new(session.text_to_display, recombine.clone());
        let readaloud = ReadAloudController::new(collaborators.playback.clone());
        let ui = UiState::new(
            UiFlags {
                toolbar_menu_visible: session.toolbar_menu_visible,
                ..UiFlags::default()
            },
            recombine.clone(),
        );

        let inner = Arc::new(Inner {
            db,
            settings,
            selection,
            content,
            readaloud,
            ui,
            blobs: collaborators.blobs,
            full_text: collaborators.full_text,
            sync: collaborators.sync,
            requery,
            recombine: recombine.clone(),
            view_generation: Arc::new(AtomicU64::new(0)),
            derived: watch::Sender::new(Derived::default()),
            snapshot: watch::Sender::new(ViewSnapshot::default()),
            page_size: options.page_size,
        });

        let workers = vec![
            tokio::spawn(recompute_loop(inner.clone())),
            tokio::spawn(recombine_loop(inner.clone())),
            tokio::spawn(forward_playback(
                collaborators.playback.subscribe_status(),
                collaborators.playback.subscribe_title(),
                recombine,
            )),
        ];

        Self { inner, workers }
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    /// The latest published snapshot.
    pub fn snapshot(&self) -> ViewSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Subscribes to snapshot updates. The receiver always holds the most
    /// recent value; intermediate snapshots may coalesce.
    pub fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// A clone of the storage handle, for the sync pipeline to write
    /// through. Call [`Engine::notify_items_changed`] after external
    /// writes.
    pub fn database(&self) -> Database {
        self.inner.db.clone()
    }

    /// Tells the engine that feeds or items changed outside its own
    /// mutators. Derived values refresh and open pagers go stale.
    pub fn notify_items_changed(&self) {
        self.inner.invalidate_pagers();
        self.inner.requery.bump();
    }

    // ========================================================================
    // Selection
    // ========================================================================

    pub fn set_selection(&self, feed_id: i64, tag: impl Into<String>) {
        if self.inner.selection.set_feed_and_tag(feed_id, tag) {
            self.inner.invalidate_pagers();
            self.inner.requery.bump();
        }
    }

    pub fn set_current_article(&self, item_id: i64) {
        if self.inner.selection.set_current_article(item_id) {
            self.inner.requery.bump();
        }
    }

    pub fn set_article_open(&self, open: bool) {
        self.inner.selection.set_article_open(open);
    }

    /// Returns whether the tag is expanded after the toggle.
    pub fn toggle_tag_expansion(&self, tag: &str) -> bool {
        self.inner.selection.toggle_tag_expansion(tag)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn set_show_only_unread(&self, value: bool) {
        if self.inner.settings.set_show_only_unread(value) {
            self.inner.invalidate_pagers();
            self.inner.requery.bump();
        }
    }

    pub fn set_newest_first(&self, value: bool) {
        if self.inner.settings.set_newest_first(value) {
            self.inner.invalidate_pagers();
        }
    }

    pub fn set_show_fab(&self, value: bool) {
        self.inner.settings.set_show_fab(value);
    }

    pub fn set_show_thumbnails(&self, value: bool) {
        self.inner.settings.set_show_thumbnails(value);
    }

    pub fn set_theme(&self, value: Theme) {
        self.inner.settings.set_theme(value);
    }

    pub fn set_feed_item_style(&self, value: FeedItemStyle) {
        self.inner.settings.set_feed_item_style(value);
    }

    pub fn set_link_opener(&self, value: LinkOpener) {
        self.inner.settings.set_link_opener(value);
    }

    pub fn set_latest_sync_timestamp(&self, value: DateTime<Utc>) {
        self.inner.settings.set_latest_sync_timestamp(value);
    }

    // ========================================================================
    // UI flags
    // ========================================================================

    pub fn set_toolbar_menu_visible(&self, visible: bool) {
        self.inner.ui.set_toolbar_menu_visible(visible);
    }

    pub fn set_edit_dialog_visible(&self, visible: bool) {
        self.inner.ui.set_edit_dialog_visible(visible);
    }

    pub fn set_delete_dialog_visible(&self, visible: bool) {
        self.inner.ui.set_delete_dialog_visible(visible);
    }

    // ========================================================================
    // Paged queries
    // ========================================================================

    /// Opens a pager over the current selection, unread filter, and sort
    /// direction. The pager goes stale as soon as any of those change.
    pub fn open_paged_view(&self) -> ItemPager {
        ItemPager::new(
            self.inner.db.clone(),
            self.inner.current_filter(),
            self.inner.page_size,
            self.inner.view_generation.load(Ordering::SeqCst),
            self.inner.view_generation.clone(),
        )
    }

    // ========================================================================
    // Read-state mutation
    // ========================================================================

    /// Marks every item in the scope as read. Returns how many flipped.
    pub async fn mark_all_read(&self, scope: &Scope) -> Result<u64> {
        let changed = self.inner.db.mark_all_read(scope).await?;
        if changed > 0 {
            self.inner.requery.bump();
        }
        Ok(changed)
    }

    /// Marks the items before `index` in the currently displayed order as
    /// read. An index at or below zero is an empty range and a no-op.
    pub async fn mark_before_as_read(&self, index: i64) -> Result<u64> {
        if index <= 0 {
            return Ok(0);
        }
        let filter = self.inner.current_filter();
        let changed = self.inner.db.mark_read_range(&filter, 0, Some(index)).await?;
        if changed > 0 {
            self.inner.requery.bump();
        }
        Ok(changed)
    }

    /// Marks the items after `index` in the currently displayed order as
    /// read. A negative index is an empty range and a no-op.
    pub async fn mark_after_as_read(&self, index: i64) -> Result<u64> {
        if index < 0 {
            return Ok(0);
        }
        let filter = self.inner.current_filter();
        let changed = self
            .inner
            .db
            .mark_read_range(&filter, index + 1, None)
            .await?;
        if changed > 0 {
            self.inner.requery.bump();
        }
        Ok(changed)
    }

    pub async fn set_item_unread(&self, item_id: i64, unread: bool) -> Result<bool> {
        let changed = self.inner.db.set_item_unread(item_id, unread).await?;
        if changed {
            self.inner.requery.bump();
        }
        Ok(changed)
    }

    pub async fn mark_as_read_and_notified(&self, item_id: i64) -> Result<bool> {
        let changed = self.inner.db.mark_read_and_notified(item_id).await?;
        if changed {
            self.inner.requery.bump();
        }
        Ok(changed)
    }

    /// Flags items as notified so the notification layer stops announcing
    /// them. The flag is invisible to every view, so nothing re-queries.
    pub async fn mark_as_notified(&self, item_ids: &[i64]) -> Result<u64> {
        self.inner.db.set_items_notified(item_ids).await
    }

    // ========================================================================
    // Feed management
    // ========================================================================

    /// Deletes feeds; their items cascade away with them. Returns how many
    /// feeds existed to delete.
    pub async fn delete_feeds(&self, feed_ids: &[i64]) -> Result<u64> {
        let deleted = self.inner.db.delete_feeds(feed_ids).await?;
        if deleted > 0 {
            self.inner.invalidate_pagers();
            self.inner.requery.bump();
        }
        Ok(deleted)
    }

    // ========================================================================
    // Article opening
    // ========================================================================

    /// Opens an item, routing by the owning feed's opener preference:
    /// custom-tab and browser openers route the link out of the app, and
    /// everything else selects the item for the reader pane. The item is
    /// marked read either way; the notified flag belongs to the
    /// notification paths and stays put. Returns `None` when the item no
    /// longer exists.
    pub async fn open_article(&self, item_id: i64) -> Result<Option<ArticleRoute>> {
        let Some(item) = self.inner.db.item_for_fetch(item_id).await? else {
            tracing::debug!(item_id, "open requested for unknown item");
            return Ok(None);
        };
        let opener = self
            .inner
            .db
            .article_opener(item_id)
            .await?
            .unwrap_or_default();

        let mut selected = false;
        let route = match (opener, item.link) {
            (ArticleOpener::CustomTab, Some(link)) => ArticleRoute::CustomTab(link),
            (ArticleOpener::DefaultBrowser, Some(link)) => ArticleRoute::DefaultBrowser(link),
            _ => {
                selected = self.inner.selection.set_current_article(item_id);
                ArticleRoute::Reader
            }
        };

        let marked = self.inner.db.set_item_unread(item_id, false).await?;
        if marked || selected {
            self.inner.requery.bump();
        }
        Ok(Some(route))
    }

    // ========================================================================
    // Article content
    // ========================================================================

    /// Switches the current article back to its summary text.
    pub fn display_article_text(&self) {
        self.display_article_text_for(self.inner.selection.article().item_id);
    }

    pub fn display_article_text_for(&self, item_id: i64) {
        self.inner.content.set(item_id, TextToDisplay::Default);
    }

    /// Requests full text for the current article.
    pub async fn display_full_text(&self) -> Result<()> {
        self.display_full_text_for(self.inner.selection.article().item_id)
            .await
    }

    /// Requests full text for an item. A body already in the blob store
    /// shows immediately; an item with no stored row fails without a
    /// fetch; otherwise the state passes through loading while the fetch
    /// service runs. The fetch outcome is applied only if the item is
    /// still the selected article when it lands.
    pub async fn display_full_text_for(&self, item_id: i64) -> Result<()> {
        if self.inner.blobs.full_text_exists(item_id).await {
            self.inner.content.set(item_id, TextToDisplay::Fulltext);
            return Ok(());
        }

        let Some(item) = self.inner.db.item_for_fetch(item_id).await? else {
            tracing::debug!(item_id, "full text requested for unknown item");
            self.inner
                .content
                .set(item_id, TextToDisplay::FailedToLoadFulltext);
            return Ok(());
        };

        self.inner.content.set(item_id, TextToDisplay::LoadingFulltext);
        let fetched = self
            .inner
            .full_text
            .fetch_if_missing(item_id, item.link.as_deref())
            .await;

        if self.inner.selection.article().item_id != item_id {
            tracing::debug!(item_id, "discarding full-text result for superseded selection");
            return Ok(());
        }
        self.inner.content.set(
            item_id,
            if fetched {
                TextToDisplay::Fulltext
            } else {
                TextToDisplay::FailedToLoadFulltext
            },
        );
        Ok(())
    }

    /// Ids and links of every item whose feed requests full text by
    /// default. A sync pipeline that fetches bodies itself reads this
    /// instead of calling [`Engine::prefetch_full_texts`].
    pub async fn default_full_text_items(&self) -> Result<Vec<ItemForFetch>> {
        self.inner.db.default_full_text_items().await
    }

    /// Fetches full text for every item of the feeds that default to it.
    /// Meant to run after a sync pass.
    pub async fn prefetch_full_texts(&self) -> Result<()> {
        for item in self.inner.db.default_full_text_items().await? {
            let fetched = self
                .inner
                .full_text
                .fetch_if_missing(item.id, item.link.as_deref())
                .await;
            if !fetched {
                tracing::debug!(item_id = item.id, "full-text prefetch failed");
            }
        }
        Ok(())
    }

    // ========================================================================
    // Read aloud
    // ========================================================================

    /// Reads the current article out loud: the summary body in the default
    /// state, the full-text body once full text is shown. Loading and
    /// failed states have nothing to read and are skipped.
    pub async fn read_aloud_play(&self) -> Result<()> {
        let item_id = self.inner.selection.article().item_id;
        let Some(article) = self.inner.db.item_with_feed(item_id).await? else {
            tracing::debug!(item_id, "read aloud requested without a readable article");
            return Ok(());
        };

        let full_default = self.inner.db.full_text_by_default(item_id).await?;
        let state = self.inner.content.resolved_for(item_id, full_default);
        let body = match state {
            TextToDisplay::Default => self.read_body(item_id, false).await,
            TextToDisplay::Fulltext => self.read_body(item_id, true).await,
            TextToDisplay::LoadingFulltext | TextToDisplay::FailedToLoadFulltext => {
                tracing::debug!(item_id, state = ?state, "read aloud skipped, no text to read");
                return Ok(());
            }
        };
        let Some(body) = body else {
            return Ok(());
        };

        self.inner.readaloud.play(&article.title, &body).await;
        Ok(())
    }

    pub fn read_aloud_pause(&self) {
        self.inner.readaloud.pause();
    }

    pub fn read_aloud_stop(&self) {
        self.inner.readaloud.stop();
    }

    /// Reads one stored body and flattens it to plain text. Blob problems
    /// never escalate: a missing or unreadable full-text body downgrades
    /// the item's state to failed, a summary problem just skips playback.
    async fn read_body(&self, item_id: i64, full_text: bool) -> Option<String> {
        let opened = if full_text {
            self.inner.blobs.open_full_text(item_id).await
        } else {
            self.inner.blobs.open_summary(item_id).await
        };
        let mut reader = match opened {
            Ok(reader) => reader,
            Err(err) => {
                tracing::warn!(item_id, full_text, error = %err, "could not open article body");
                if full_text {
                    self.inner
                        .content
                        .set(item_id, TextToDisplay::FailedToLoadFulltext);
                }
                return None;
            }
        };

        let mut html = Vec::new();
        if let Err(err) = reader.read_to_end(&mut html).await {
            tracing::warn!(item_id, full_text, error = %err, "could not read article body");
            if full_text {
                self.inner
                    .content
                    .set(item_id, TextToDisplay::FailedToLoadFulltext);
            }
            return None;
        }
        Some(plain_text_of_html(&String::from_utf8_lossy(&html)))
    }

    // ========================================================================
    // Sync and session
    // ========================================================================

    /// Asks the sync pipeline to refresh the current selection. This is the
    /// pull-to-refresh path, so the network is always forced.
    pub fn request_sync_current(&self) {
        let FeedAndTag { feed_id, tag } = self.inner.selection.feed_and_tag();
        self.inner.sync.request_sync(SyncRequest {
            feed_id,
            tag,
            force_network: true,
            parallel: true,
        });
    }

    /// Asks the sync pipeline to refresh everything, regardless of what is
    /// selected.
    pub fn request_sync_all(&self) {
        self.inner.sync.request_sync(SyncRequest {
            force_network: true,
            parallel: true,
            ..SyncRequest::default()
        });
    }

    /// The serializable session state as of now. Hand it back through
    /// [`EngineOptions::session`] to restore after process death.
    pub fn session_state(&self) -> SessionState {
        let FeedAndTag { feed_id, tag } = self.inner.selection.feed_and_tag();
        let article = self.inner.selection.article();
        SessionState {
            current_feed_id: feed_id,
            current_tag: tag,
            current_item_id: article.item_id,
            article_open: article.is_open,
            toolbar_menu_visible: self.inner.ui.get().toolbar_menu_visible,
            expanded_tags: self.inner.selection.expanded_tags(),
            text_to_display: self.inner.content.export(),
        }
    }

    /// Releases the playback engine and closes the storage pool. The
    /// workers stop when the engine is dropped.
    pub async fn shutdown(&self) {
        self.inner.readaloud.shutdown();
        self.inner.db.close().await;
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewFeed, ParsedItem};
    use async_trait::async_trait;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncRead;

    struct NullBlobs;

    #[async_trait]
    impl BlobStore for NullBlobs {
        async fn full_text_exists(&self, _item_id: i64) -> bool {
            false
        }

        async fn open_summary(
            &self,
            _item_id: i64,
        ) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no body"))
        }

        async fn open_full_text(
            &self,
            _item_id: i64,
        ) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no body"))
        }
    }

    struct NullFetcher;

    #[async_trait]
    impl FullTextFetcher for NullFetcher {
        async fn fetch_if_missing(&self, _item_id: i64, _link: Option<&str>) -> bool {
            false
        }
    }

    struct RecordingSync {
        requests: Mutex<Vec<SyncRequest>>,
    }

    impl RecordingSync {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<SyncRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl SyncTrigger for RecordingSync {
        fn request_sync(&self, request: SyncRequest) {
            self.requests.lock().unwrap().push(request);
        }
    }

    struct NullPlayback {
        title: watch::Sender<Option<String>>,
        status: watch::Sender<PlaybackStatus>,
    }

    impl NullPlayback {
        fn new() -> Self {
            Self {
                title: watch::Sender::new(None),
                status: watch::Sender::new(PlaybackStatus::Stopped),
            }
        }
    }

    #[async_trait]
    impl PlaybackEngine for NullPlayback {
        async fn speak(&self, _title: &str, _body: &str) {}
        fn pause(&self) {}
        fn stop(&self) {}
        fn shutdown(&self) {}

        fn subscribe_title(&self) -> watch::Receiver<Option<String>> {
            self.title.subscribe()
        }

        fn subscribe_status(&self) -> watch::Receiver<PlaybackStatus> {
            self.status.subscribe()
        }
    }

    fn collaborators(sync: Arc<RecordingSync>) -> Collaborators {
        Collaborators {
            blobs: Arc::new(NullBlobs),
            full_text: Arc::new(NullFetcher),
            sync,
            playback: Arc::new(NullPlayback::new()),
        }
    }

    async fn engine() -> (Engine, Arc<RecordingSync>) {
        let db = Database::open(":memory:").await.unwrap();
        let sync = Arc::new(RecordingSync::new());
        (
            Engine::new(db, collaborators(sync.clone()), EngineOptions::default()),
            sync,
        )
    }

    async fn wait_for(
        rx: &mut watch::Receiver<ViewSnapshot>,
        predicate: impl Fn(&ViewSnapshot) -> bool,
    ) -> ViewSnapshot {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let current = rx.borrow_and_update();
                    if predicate(&current) {
                        return current.clone();
                    }
                }
                rx.changed().await.expect("engine dropped");
            }
        })
        .await
        .expect("snapshot did not settle")
    }

    async fn seed_feed(db: &Database, tag: &str) -> i64 {
        let feed = db
            .insert_feed(&NewFeed {
                url: format!("https://example.com/{tag}/feed"),
                title: "Example".to_string(),
                tag: tag.to_string(),
                ..NewFeed::default()
            })
            .await
            .unwrap();
        let items: Vec<ParsedItem> = (0..3)
            .map(|n| ParsedItem {
                guid: format!("guid-{n}"),
                title: format!("Item {n}"),
                pub_date: Some(100 + n),
                ..ParsedItem::default()
            })
            .collect();
        db.upsert_items(feed, &items).await.unwrap();
        feed
    }

    #[tokio::test]
    async fn test_empty_database_settles_to_zero_items() {
        let (engine, _) = engine().await;
        let mut rx = engine.subscribe();

        let snapshot = wait_for(&mut rx, |s| s.visible_item_count == 0).await;
        assert!(!snapshot.have_visible_items);
        assert!(!snapshot.show_fab, "FAB hides with nothing to mark");
        assert_eq!(snapshot.screen_title.title, None);
    }

    #[tokio::test]
    async fn test_selection_change_stales_open_pagers() {
        let (engine, _) = engine().await;
        let db = engine.database();
        let feed = seed_feed(&db, "tech").await;
        engine.notify_items_changed();

        let mut pager = engine.open_paged_view();
        let page = pager.next_page().await.unwrap().unwrap();
        assert_eq!(page.len(), 3);

        engine.set_selection(feed, "");
        assert!(pager.is_stale());
        assert_eq!(pager.next_page().await.unwrap(), None);

        let mut fresh = engine.open_paged_view();
        assert_eq!(fresh.next_page().await.unwrap().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_sort_flip_stales_open_pagers() {
        let (engine, _) = engine().await;
        let db = engine.database();
        seed_feed(&db, "tech").await;
        engine.notify_items_changed();

        let pager = engine.open_paged_view();
        engine.set_newest_first(false);
        assert!(pager.is_stale());

        // Same value again leaves the fresh pager alone.
        let fresh = engine.open_paged_view();
        engine.set_newest_first(false);
        assert!(!fresh.is_stale());
    }

    #[tokio::test]
    async fn test_mark_range_boundary_clamps_to_no_op() {
        let (engine, _) = engine().await;
        let db = engine.database();
        seed_feed(&db, "tech").await;
        engine.notify_items_changed();

        assert_eq!(engine.mark_before_as_read(0).await.unwrap(), 0);
        assert_eq!(engine.mark_before_as_read(-4).await.unwrap(), 0);
        assert_eq!(engine.mark_after_as_read(-1).await.unwrap(), 0);

        let mut rx = engine.subscribe();
        let snapshot = wait_for(&mut rx, |s| s.visible_item_count == 3).await;
        assert_eq!(snapshot.visible_item_count, 3, "all items still unread");
    }

    #[tokio::test]
    async fn test_settings_flow_into_snapshot() {
        let (engine, _) = engine().await;
        let mut rx = engine.subscribe();

        engine.set_theme(Theme::Night);
        let snapshot = wait_for(&mut rx, |s| s.theme == Theme::Night).await;
        assert!(snapshot.show_thumbnails);

        engine.set_show_thumbnails(false);
        wait_for(&mut rx, |s| !s.show_thumbnails).await;
    }

    #[tokio::test]
    async fn test_request_sync_carries_current_selection() {
        let (engine, sync) = engine().await;

        engine.set_selection(5, "news");
        engine.request_sync_current();
        engine.request_sync_all();

        let requests = sync.requests();
        assert_eq!(
            requests,
            vec![
                SyncRequest {
                    feed_id: 5,
                    tag: "news".to_string(),
                    force_network: true,
                    parallel: true,
                },
                SyncRequest {
                    feed_id: ID_UNSET,
                    tag: String::new(),
                    force_network: true,
                    parallel: true,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_session_round_trips_through_restore() {
        let (engine, _) = engine().await;
        engine.set_selection(3, "tech");
        engine.set_current_article(9);
        engine.toggle_tag_expansion("tech");
        engine.set_toolbar_menu_visible(true);
        engine.display_article_text_for(9);

        let session = engine.session_state();
        assert_eq!(session.current_item_id, 9);
        assert!(session.article_open);
        assert!(session.toolbar_menu_visible);

        let db = Database::open(":memory:").await.unwrap();
        let restored = Engine::new(
            db,
            collaborators(Arc::new(RecordingSync::new())),
            EngineOptions {
                session: session.clone(),
                ..EngineOptions::default()
            },
        );
        assert_eq!(restored.session_state(), session);
    }

    #[tokio::test]
    async fn test_delete_feeds_stales_pagers_and_empties_the_view() {
        let (engine, _) = engine().await;
        let db = engine.database();
        let feed = seed_feed(&db, "tech").await;
        engine.notify_items_changed();

        let mut rx = engine.subscribe();
        wait_for(&mut rx, |s| s.visible_item_count == 3).await;

        let pager = engine.open_paged_view();
        assert_eq!(engine.delete_feeds(&[feed]).await.unwrap(), 1);
        assert!(pager.is_stale());

        let snapshot = wait_for(&mut rx, |s| s.visible_item_count == 0).await;
        assert_eq!(
            snapshot.drawer_items,
            vec![DrawerItem::AllItems { unread_count: 0 }]
        );
    }

    #[tokio::test]
    async fn test_unknown_item_open_is_skipped() {
        let (engine, _) = engine().await;

        let route = engine.open_article(999).await.unwrap();
        assert_eq!(route, None);
        assert_eq!(
            engine.session_state().current_item_id,
            ID_UNSET,
            "selection untouched"
        );
    }

    #[tokio::test]
    async fn test_open_article_marks_read_but_leaves_notified() {
        let (engine, _) = engine().await;
        let db = engine.database();
        seed_feed(&db, "tech").await;
        engine.notify_items_changed();
        let rows = db
            .paged_items(&ItemFilter::from_selection(ID_UNSET, "", false, true), 1, 0)
            .await
            .unwrap();

        let route = engine.open_article(rows[0].id).await.unwrap();
        assert_eq!(route, Some(ArticleRoute::Reader));

        let (unread, notified): (bool, bool) =
            sqlx::query_as("SELECT unread, notified FROM items WHERE id = ?")
                .bind(rows[0].id)
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert!(!unread);
        assert!(!notified, "only the notification paths set notified");
    }
}
