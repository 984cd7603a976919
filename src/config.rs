//! Configuration file parser for engine hosts.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields`
//! off), though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::engine::EngineOptions;
use crate::query::DEFAULT_PAGE_SIZE;
use crate::session::SessionState;
use crate::settings::{FeedItemStyle, LinkOpener, SettingsState, Theme};
use crate::storage::DbOptions;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level host configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified. Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub view: ViewConfig,
}

/// The `[database]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the SQLite file. `:memory:` works for throwaway stores.
    pub path: String,

    /// Connection pool size.
    pub max_connections: u32,

    /// How long SQLite waits for a lock before giving up, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let defaults = DbOptions::default();
        Self {
            path: "items.db".to_string(),
            max_connections: defaults.max_connections,
            busy_timeout_ms: defaults.busy_timeout_ms,
        }
    }
}

/// The `[view]` section: page size plus the settings the engine starts
/// with before the host pushes stored values in.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Rows fetched per page of the item list.
    pub page_size: i64,

    pub show_only_unread: bool,
    pub newest_first: bool,
    pub show_fab: bool,
    pub show_thumbnails: bool,

    /// "system", "day" or "night".
    pub theme: Theme,

    /// "card", "compact" or "super_compact".
    pub feed_item_style: FeedItemStyle,

    /// "custom_tab" or "default_browser".
    pub link_opener: LinkOpener,
}

impl Default for ViewConfig {
    fn default() -> Self {
        let defaults = SettingsState::default();
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            show_only_unread: defaults.show_only_unread,
            newest_first: defaults.newest_first,
            show_fab: defaults.show_fab,
            show_thumbnails: defaults.show_thumbnails,
            theme: defaults.theme,
            feed_item_style: defaults.feed_item_style,
            link_opener: defaults.link_opener,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading so a corrupted file cannot balloon
        // into memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["database", "view"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), database = %config.database.path, "Loaded configuration");
        Ok(config)
    }

    /// Storage pool options from the `[database]` section.
    pub fn db_options(&self) -> DbOptions {
        DbOptions {
            max_connections: self.database.max_connections,
            busy_timeout_ms: self.database.busy_timeout_ms,
        }
    }

    /// The settings the engine starts with.
    pub fn initial_settings(&self) -> SettingsState {
        SettingsState {
            show_only_unread: self.view.show_only_unread,
            show_fab: self.view.show_fab,
            show_thumbnails: self.view.show_thumbnails,
            theme: self.view.theme,
            feed_item_style: self.view.feed_item_style,
            link_opener: self.view.link_opener,
            newest_first: self.view.newest_first,
            ..SettingsState::default()
        }
    }

    /// Engine options built from this config and a restored session.
    pub fn engine_options(&self, session: SessionState) -> EngineOptions {
        EngineOptions {
            page_size: self.view.page_size,
            initial_settings: self.initial_settings(),
            session,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.path, "items.db");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.view.page_size, DEFAULT_PAGE_SIZE);
        assert!(config.view.show_only_unread);
        assert_eq!(config.view.theme, Theme::System);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/verso_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.database.path, "items.db");
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("verso_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.view.page_size, DEFAULT_PAGE_SIZE);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let dir = std::env::temp_dir().join("verso_config_test_partial");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[view]\npage_size = 25\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.view.page_size, 25);
        assert!(config.view.show_only_unread); // default
        assert_eq!(config.database.max_connections, 5); // default

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let dir = std::env::temp_dir().join("verso_config_test_full");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
[database]
path = "/var/lib/reader/items.db"
max_connections = 2
busy_timeout_ms = 1000

[view]
page_size = 50
show_only_unread = false
newest_first = false
theme = "night"
feed_item_style = "super_compact"
link_opener = "default_browser"
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database.path, "/var/lib/reader/items.db");
        assert_eq!(config.db_options().max_connections, 2);
        assert_eq!(config.db_options().busy_timeout_ms, 1000);

        let settings = config.initial_settings();
        assert!(!settings.show_only_unread);
        assert!(!settings.newest_first);
        assert_eq!(settings.theme, Theme::Night);
        assert_eq!(settings.feed_item_style, FeedItemStyle::SuperCompact);
        assert_eq!(settings.link_opener, LinkOpener::DefaultBrowser);

        let options = config.engine_options(SessionState::default());
        assert_eq!(options.page_size, 50);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("verso_config_test_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let dir = std::env::temp_dir().join("verso_config_test_unknown");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
totally_fake_key = "should not fail"

[view]
page_size = 10
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.view.page_size, 10);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let dir = std::env::temp_dir().join("verso_config_test_wrongtype");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        // page_size should be an integer, not a string
        std::fs::write(&path, "[view]\npage_size = \"many\"\n").unwrap();

        let result = Config::load(&path);
        assert!(result.is_err());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("verso_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = "a".repeat(1_048_577);
        std::fs::write(&path, content).unwrap();

        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::TooLarge(_))));

        std::fs::remove_dir_all(&dir).ok();
    }
}
