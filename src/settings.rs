use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::signal::ChangeSignal;

/// App-wide theme choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    System,
    Day,
    Night,
}

/// Density of the item list rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedItemStyle {
    #[default]
    Card,
    Compact,
    SuperCompact,
}

/// App-wide preference for opening external links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOpener {
    #[default]
    CustomTab,
    DefaultBrowser,
}

/// One bundle of every app-wide setting the view snapshot carries.
///
/// Defaults are chosen so the very first snapshot renders sensibly before
/// any stored value arrives: unread-only on, FAB and thumbnails on, system
/// theme, newest first, sync timestamp at the epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsState {
    pub show_only_unread: bool,
    pub show_fab: bool,
    pub show_thumbnails: bool,
    pub theme: Theme,
    pub feed_item_style: FeedItemStyle,
    pub link_opener: LinkOpener,
    pub newest_first: bool,
    pub latest_sync_timestamp: DateTime<Utc>,
}

impl Default for SettingsState {
    fn default() -> Self {
        Self {
            show_only_unread: true,
            show_fab: true,
            show_thumbnails: true,
            theme: Theme::default(),
            feed_item_style: FeedItemStyle::default(),
            link_opener: LinkOpener::default(),
            newest_first: true,
            latest_sync_timestamp: DateTime::UNIX_EPOCH,
        }
    }
}

/// Holder of the live settings value.
///
/// Every write goes through `update`, which publishes to the watch channel
/// and bumps the aggregation signal only when the value actually changed.
/// Settings persistence itself lives outside the engine; this is the
/// in-process view of whatever the host last pushed in.
pub(crate) struct Settings {
    state: watch::Sender<SettingsState>,
    signal: Arc<ChangeSignal>,
}

impl Settings {
    pub(crate) fn new(initial: SettingsState, signal: Arc<ChangeSignal>) -> Self {
        Self {
            state: watch::Sender::new(initial),
            signal,
        }
    }

    #[cfg(test)]
    pub(crate) fn subscribe(&self) -> watch::Receiver<SettingsState> {
        self.state.subscribe()
    }

    pub(crate) fn get(&self) -> SettingsState {
        self.state.borrow().clone()
    }

    fn update(&self, apply: impl FnOnce(&mut SettingsState)) -> bool {
        let changed = self.state.send_if_modified(|state| {
            let before = state.clone();
            apply(state);
            *state != before
        });
        if changed {
            self.signal.bump();
        }
        changed
    }

    pub(crate) fn set_show_only_unread(&self, value: bool) -> bool {
        self.update(|s| s.show_only_unread = value)
    }

    pub(crate) fn set_show_fab(&self, value: bool) -> bool {
        self.update(|s| s.show_fab = value)
    }

    pub(crate) fn set_show_thumbnails(&self, value: bool) -> bool {
        self.update(|s| s.show_thumbnails = value)
    }

    pub(crate) fn set_theme(&self, value: Theme) -> bool {
        self.update(|s| s.theme = value)
    }

    pub(crate) fn set_feed_item_style(&self, value: FeedItemStyle) -> bool {
        self.update(|s| s.feed_item_style = value)
    }

    pub(crate) fn set_link_opener(&self, value: LinkOpener) -> bool {
        self.update(|s| s.link_opener = value)
    }

    pub(crate) fn set_newest_first(&self, value: bool) -> bool {
        self.update(|s| s.newest_first = value)
    }

    pub(crate) fn set_latest_sync_timestamp(&self, value: DateTime<Utc>) -> bool {
        self.update(|s| s.latest_sync_timestamp = value)
    }
}
