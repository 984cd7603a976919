use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StorageError;

// ============================================================================
// Database
// ============================================================================

/// Pool tuning knobs, surfaced through the engine configuration.
#[derive(Debug, Clone)]
pub struct DbOptions {
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection with default pool options and run
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Locked` if another process has the database
    /// locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `StorageError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        Self::open_with(path, &DbOptions::default()).await
    }

    /// Open a database connection with explicit pool options and run
    /// migrations.
    pub async fn open_with(path: &str, opts: &DbOptions) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout makes SQLite wait for locks to release before
        // returning SQLITE_BUSY, which absorbs transient contention from
        // concurrent sync writes. Using pragma() ensures every pooled
        // connection inherits the setting.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StorageError::from_sqlx)?
            .pragma("busy_timeout", opts.busy_timeout_ms.to_string());
        // SQLite is single-writer; a handful of connections covers the peak
        // concurrent readers (paged views + derived queries + point lookups).
        let pool = SqlitePoolOptions::new()
            .max_connections(opts.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StorageError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            // Migration errors could also be lock-related
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                StorageError::Locked
            } else {
                StorageError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All schema changes are wrapped in a single transaction so a failure
    /// mid-migration (disk full, power loss) rolls back cleanly. SQLite
    /// supports DDL inside transactions, and every statement uses
    /// `IF NOT EXISTS`, so re-running on an existing database is a no-op.
    async fn migrate(&self) -> Result<()> {
        // Enable foreign keys (per-connection setting, outside the transaction)
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                custom_title TEXT NOT NULL DEFAULT '',
                url TEXT UNIQUE NOT NULL,
                tag TEXT NOT NULL DEFAULT '',
                full_text_by_default INTEGER NOT NULL DEFAULT 0,
                open_articles_with TEXT NOT NULL DEFAULT ''
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // The item body itself lives in the blob store, keyed by item id;
        // this table carries everything the list and reader screens need.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                guid TEXT NOT NULL,
                title TEXT NOT NULL,
                snippet TEXT NOT NULL DEFAULT '',
                link TEXT,
                image_url TEXT,
                author TEXT,
                enclosure_link TEXT,
                enclosure_name TEXT,
                pub_date INTEGER,
                unread INTEGER NOT NULL DEFAULT 1,
                notified INTEGER NOT NULL DEFAULT 0,
                UNIQUE(feed_id, guid)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Composite index matching the shared ORDER BY (pub_date, id); SQLite
        // scans it in either direction, so one index serves both sort orders.
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_pub_date ON items(pub_date, id)")
            .execute(&mut *tx)
            .await?;

        // Single-feed views filter by feed_id before ordering
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_items_feed_pub_date ON items(feed_id, pub_date, id)",
        )
        .execute(&mut *tx)
        .await?;

        // Unread-count aggregation per feed (drawer and visible-count queries)
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_feed_unread ON items(feed_id, unread)")
            .execute(&mut *tx)
            .await?;

        // Partial index for only-unread views; most items are read in a
        // long-lived database, so this stays small.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_items_unread ON items(pub_date, id) WHERE unread = 1",
        )
        .execute(&mut *tx)
        .await?;

        // Tag scoping joins feeds on tag equality
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_tag ON feeds(tag)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Close the pool, waiting for in-flight queries to finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
