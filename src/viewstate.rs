use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;

use crate::content::TextToDisplay;
use crate::readaloud::PlaybackStatus;
use crate::selection::CurrentArticle;
use crate::settings::{FeedItemStyle, LinkOpener, Theme};
use crate::signal::ChangeSignal;
use crate::storage::{Article, DrawerItem, FeedTitle, ScreenTitle, ID_UNSET};

/// The one value the presentation layer renders from.
///
/// Published whole: every field belongs to the same recombination pass, so
/// readers never see the article pane flags from one moment paired with
/// article content from another. A snapshot whose `article` does not match
/// `current_article.item_id` is suppressed at the source instead of
/// published (the flow-sync gate), which is why `Default` pairs an unset
/// article with an unset selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub only_unread: bool,
    /// Raw FAB setting gated by `have_visible_items`.
    pub show_fab: bool,
    pub show_thumbnails: bool,
    pub theme: Theme,
    pub latest_sync_timestamp: DateTime<Utc>,
    pub drawer_items: Vec<DrawerItem>,
    pub feed_item_style: FeedItemStyle,
    pub expanded_tags: BTreeSet<String>,
    pub toolbar_menu_visible: bool,
    pub visible_item_count: i64,
    pub have_visible_items: bool,
    pub screen_title: ScreenTitle,
    pub edit_dialog_visible: bool,
    pub delete_dialog_visible: bool,
    pub visible_feeds: Vec<FeedTitle>,
    pub current_article: CurrentArticle,
    pub link_opener: LinkOpener,
    pub current_feed_id: i64,
    pub current_tag: String,
    pub article: Article,
    pub text_to_display: TextToDisplay,
    pub read_aloud_title: Option<String>,
    pub playback_status: PlaybackStatus,
}

impl Default for ViewSnapshot {
    /// The first value observers see, tuned so an empty screen renders
    /// calmly instead of flickering: the item count starts at 1 (so
    /// empty-state placeholders hold off until a real count arrives) and
    /// the screen title starts blank rather than as the app name.
    fn default() -> Self {
        Self {
            only_unread: true,
            show_fab: true,
            show_thumbnails: true,
            theme: Theme::default(),
            latest_sync_timestamp: DateTime::UNIX_EPOCH,
            drawer_items: Vec::new(),
            feed_item_style: FeedItemStyle::default(),
            expanded_tags: BTreeSet::new(),
            toolbar_menu_visible: false,
            visible_item_count: 1,
            have_visible_items: true,
            screen_title: ScreenTitle {
                title: Some(String::new()),
            },
            edit_dialog_visible: false,
            delete_dialog_visible: false,
            visible_feeds: Vec::new(),
            current_article: CurrentArticle::default(),
            link_opener: LinkOpener::default(),
            current_feed_id: ID_UNSET,
            current_tag: String::new(),
            article: Article::default(),
            text_to_display: TextToDisplay::Default,
            read_aloud_title: None,
            playback_status: PlaybackStatus::Stopped,
        }
    }
}

/// Transient flags the presentation layer toggles directly: the toolbar
/// overflow menu and the edit/delete confirmation dialogs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct UiFlags {
    pub toolbar_menu_visible: bool,
    pub edit_dialog_visible: bool,
    pub delete_dialog_visible: bool,
}

pub(crate) struct UiState {
    state: watch::Sender<UiFlags>,
    signal: Arc<ChangeSignal>,
}

impl UiState {
    pub(crate) fn new(initial: UiFlags, signal: Arc<ChangeSignal>) -> Self {
        Self {
            state: watch::Sender::new(initial),
            signal,
        }
    }

    pub(crate) fn get(&self) -> UiFlags {
        *self.state.borrow()
    }

    fn update(&self, apply: impl FnOnce(&mut UiFlags)) -> bool {
        let changed = self.state.send_if_modified(|flags| {
            let before = *flags;
            apply(flags);
            *flags != before
        });
        if changed {
            self.signal.bump();
        }
        changed
    }

    pub(crate) fn set_toolbar_menu_visible(&self, visible: bool) -> bool {
        self.update(|f| f.toolbar_menu_visible = visible)
    }

    pub(crate) fn set_edit_dialog_visible(&self, visible: bool) -> bool {
        self.update(|f| f.edit_dialog_visible = visible)
    }

    pub(crate) fn set_delete_dialog_visible(&self, visible: bool) -> bool {
        self.update(|f| f.delete_dialog_visible = visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot_passes_the_flow_sync_gate() {
        let snapshot = ViewSnapshot::default();
        assert_eq!(snapshot.article.id, snapshot.current_article.item_id);
    }

    #[test]
    fn test_initial_snapshot_avoids_empty_state_flicker() {
        let snapshot = ViewSnapshot::default();
        assert_eq!(snapshot.visible_item_count, 1);
        assert!(snapshot.have_visible_items);
        assert!(snapshot.show_fab);
        assert_eq!(snapshot.screen_title.title.as_deref(), Some(""));
    }

    #[test]
    fn test_ui_flags_signal_once_per_change() {
        let signal = Arc::new(ChangeSignal::new());
        let ui = UiState::new(UiFlags::default(), signal.clone());
        let before = signal.generation();

        assert!(ui.set_edit_dialog_visible(true));
        assert!(!ui.set_edit_dialog_visible(true));
        assert_eq!(signal.generation(), before + 1);
        assert!(ui.get().edit_dialog_visible);
    }

    #[test]
    fn test_restored_flags_are_visible_before_any_toggle() {
        let ui = UiState::new(
            UiFlags {
                toolbar_menu_visible: true,
                ..UiFlags::default()
            },
            Arc::new(ChangeSignal::new()),
        );
        assert!(ui.get().toolbar_menu_visible);
        assert!(!ui.get().edit_dialog_visible);
    }
}
