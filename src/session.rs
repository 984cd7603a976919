use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::content::TextToDisplay;
use crate::storage::ID_UNSET;

/// Transient view state that survives process death.
///
/// Durable data (items, read flags) lives in storage; this is the thin
/// session layer on top of it: the selected feed/tag, the article pane,
/// expanded drawer tags, and the per-item text-to-display entries. Hosts
/// serialize it with whatever mechanism they use for UI state and hand it
/// back on the next engine construction. Missing fields deserialize to the
/// same defaults a fresh session starts with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub current_feed_id: i64,
    pub current_tag: String,
    pub current_item_id: i64,
    pub article_open: bool,
    pub toolbar_menu_visible: bool,
    pub expanded_tags: BTreeSet<String>,
    pub text_to_display: BTreeMap<i64, TextToDisplay>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            current_feed_id: ID_UNSET,
            current_tag: String::new(),
            current_item_id: ID_UNSET,
            article_open: false,
            toolbar_menu_visible: false,
            expanded_tags: BTreeSet::new(),
            text_to_display: BTreeMap::new(),
        }
    }
}

impl SessionState {
    /// Serializes for the host's session store.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Restores a stored session. Corrupt input is an error so the host
    /// can fall back to [`SessionState::default`].
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fresh_session_selects_all_items() {
        let session = SessionState::default();
        assert_eq!(session.current_feed_id, ID_UNSET);
        assert_eq!(session.current_tag, "");
        assert_eq!(session.current_item_id, ID_UNSET);
        assert!(!session.article_open);
    }

    #[test]
    fn test_json_round_trip() {
        let mut session = SessionState {
            current_feed_id: 3,
            current_tag: "tech".into(),
            current_item_id: 42,
            article_open: true,
            toolbar_menu_visible: true,
            ..SessionState::default()
        };
        session.expanded_tags.insert("news".into());
        session.text_to_display.insert(42, TextToDisplay::Fulltext);
        session
            .text_to_display
            .insert(7, TextToDisplay::FailedToLoadFulltext);

        let json = session.to_json().unwrap();
        let restored = SessionState::from_json(&json).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let restored = SessionState::from_json(r#"{"current_item_id": 9}"#).unwrap();
        assert_eq!(restored.current_item_id, 9);
        assert_eq!(restored.current_feed_id, ID_UNSET);
        assert!(!restored.toolbar_menu_visible);
        assert!(restored.text_to_display.is_empty());
    }

    #[test]
    fn test_corrupt_json_is_an_error_not_a_panic() {
        assert!(SessionState::from_json("not valid json {{").is_err());
    }
}
