use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{
    Article, ArticleOpener, ItemFilter, ItemForFetch, ItemPreview, ItemWithFeedRow, Scope,
};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of rows any single page query may return (OOM protection)
const MAX_PAGE_ROWS: i64 = 1000;

/// Columns of the shared paged-view projection. Every query shape selects
/// exactly this list; a feed's display title is its custom title when set,
/// its fetched title otherwise.
const PREVIEW_COLUMNS: &str = "i.id, i.title, i.snippet, \
     COALESCE(NULLIF(f.custom_title, ''), f.title) AS feed_title, \
     i.unread, i.pub_date, i.image_url, i.link";

/// Append the WHERE conditions for a filter.
///
/// The caller has already pushed `WHERE 1=1` (or an equivalent base
/// predicate) so every condition can start with AND. Paged reads, the
/// visible count and the range mutations all come through here; that is
/// what keeps "row at index N" meaning the same thing everywhere.
fn push_filter(builder: &mut QueryBuilder<'_, sqlx::Sqlite>, filter: &ItemFilter) {
    match &filter.scope {
        Scope::Feed(feed_id) => {
            builder.push(" AND i.feed_id = ").push_bind(*feed_id);
        }
        Scope::Tag(tag) => {
            builder.push(" AND f.tag = ").push_bind(tag.clone());
        }
        Scope::All => {}
    }
    if filter.only_unread {
        builder.push(" AND i.unread = 1");
    }
}

/// Append the ORDER BY for a filter. The id tiebreak follows the date
/// direction, so rows published in the same second keep one total order.
/// SQLite places NULL dates first ascending and last descending, which
/// keeps undated items deterministic as well.
fn push_order(builder: &mut QueryBuilder<'_, sqlx::Sqlite>, filter: &ItemFilter) {
    if filter.newest_first {
        builder.push(" ORDER BY i.pub_date DESC, i.id DESC");
    } else {
        builder.push(" ORDER BY i.pub_date ASC, i.id ASC");
    }
}

impl Database {
    // ========================================================================
    // Paged Item Queries
    // ========================================================================

    /// One page of the filtered, ordered item view.
    ///
    /// Pages are keyed by (limit, offset) against the live row set; there is
    /// no snapshot isolation across pages, matching the incremental paging
    /// contract of the item list.
    pub async fn paged_items(
        &self,
        filter: &ItemFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ItemPreview>> {
        let limit = limit.min(MAX_PAGE_ROWS);
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM items i JOIN feeds f ON f.id = i.feed_id WHERE 1=1",
            PREVIEW_COLUMNS
        ));
        push_filter(&mut builder, filter);
        push_order(&mut builder, filter);
        builder.push(" LIMIT ").push_bind(limit);
        builder.push(" OFFSET ").push_bind(offset);

        let rows: Vec<ItemPreview> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// Number of rows the current view would show, bounds included.
    pub async fn visible_item_count(&self, filter: &ItemFilter) -> Result<i64> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "SELECT COUNT(*) FROM items i JOIN feeds f ON f.id = i.feed_id WHERE 1=1",
        );
        push_filter(&mut builder, filter);

        let (count,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;
        Ok(count)
    }

    // ========================================================================
    // Range Mutations
    // ========================================================================

    /// Mark a contiguous slice of the filtered, ordered view as read.
    ///
    /// `limit == None` runs to the end of the view. The row set is resolved
    /// by a subselect built from the same filter and order as the paged
    /// reads, evaluated atomically with the update: positions may have
    /// shifted since the user's gesture (concurrent sync inserts, flag
    /// flips), but the write is internally consistent with the view
    /// definition at execution time. Range marks are fire-and-forget, so
    /// that drift is accepted rather than retried.
    ///
    /// Returns the number of items that actually flipped to read.
    pub async fn mark_read_range(
        &self,
        filter: &ItemFilter,
        offset: i64,
        limit: Option<i64>,
    ) -> Result<u64> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "UPDATE items SET unread = 0 WHERE unread = 1 AND id IN (\
             SELECT i.id FROM items i JOIN feeds f ON f.id = i.feed_id WHERE 1=1",
        );
        push_filter(&mut builder, filter);
        push_order(&mut builder, filter);
        // SQLite treats a negative LIMIT as unbounded; OFFSET requires a
        // LIMIT clause, so the open-ended case binds -1.
        builder.push(" LIMIT ").push_bind(limit.unwrap_or(-1));
        builder.push(" OFFSET ").push_bind(offset);
        builder.push(")");

        let result = builder.build().execute(&self.pool).await?;
        tracing::debug!(
            rows = result.rows_affected(),
            offset = offset,
            limit = ?limit,
            "marked range as read"
        );
        Ok(result.rows_affected())
    }

    /// Mark every unread item in a scope as read, ignoring the unread filter
    /// and sort order. Returns the count of items marked.
    pub async fn mark_all_read(&self, scope: &Scope) -> Result<u64> {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE items SET unread = 0 WHERE unread = 1");
        match scope {
            Scope::Feed(feed_id) => {
                builder.push(" AND feed_id = ").push_bind(*feed_id);
            }
            Scope::Tag(tag) => {
                builder
                    .push(" AND feed_id IN (SELECT id FROM feeds WHERE tag = ")
                    .push_bind(tag.clone())
                    .push(")");
            }
            Scope::All => {}
        }

        let result = builder.build().execute(&self.pool).await?;
        tracing::debug!(rows = result.rows_affected(), scope = ?scope, "marked all as read");
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Single-Item Flags
    // ========================================================================

    /// Set the unread flag of one item, returning whether a row changed.
    pub async fn set_item_unread(&self, item_id: i64, unread: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE items SET unread = ? WHERE id = ? AND unread != ?")
            .bind(unread)
            .bind(item_id)
            .bind(unread)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear unread and set notified in one statement, so a notification
    /// tap can never leave the pair half-applied.
    pub async fn mark_read_and_notified(&self, item_id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE items SET unread = 0, notified = 1 WHERE id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flag a batch of items as already notified.
    pub async fn set_items_notified(&self, item_ids: &[i64]) -> Result<u64> {
        if item_ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE items SET notified = 1 WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in item_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Point Lookups
    // ========================================================================

    /// Full metadata of one item joined with its owning feed.
    ///
    /// Missing rows come back as `Ok(None)`; the reader screen treats a
    /// deleted-under-us article the same as nothing selected.
    pub async fn item_with_feed(&self, item_id: i64) -> Result<Option<Article>> {
        let row = sqlx::query_as::<_, ItemWithFeedRow>(
            r#"
            SELECT i.id, i.title, i.link, i.author, i.enclosure_link, i.enclosure_name,
                   i.pub_date, i.feed_id, f.url AS feed_url,
                   COALESCE(NULLIF(f.custom_title, ''), f.title) AS feed_title
            FROM items i JOIN feeds f ON f.id = i.feed_id
            WHERE i.id = ?
        "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ItemWithFeedRow::into_article))
    }

    /// Id and link of one item, for full-text fetch scheduling.
    pub async fn item_for_fetch(&self, item_id: i64) -> Result<Option<ItemForFetch>> {
        let row: Option<(i64, Option<String>)> =
            sqlx::query_as("SELECT id, link FROM items WHERE id = ?")
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id, link)| ItemForFetch { id, link }))
    }

    /// The item's link, `None` when the row is missing or has no link.
    pub async fn item_link(&self, item_id: i64) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT link FROM items WHERE id = ?")
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(link,)| link))
    }

    /// Whether the owning feed wants full text by default. Unknown items
    /// answer false.
    pub async fn full_text_by_default(&self, item_id: i64) -> Result<bool> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT f.full_text_by_default FROM items i JOIN feeds f ON f.id = i.feed_id WHERE i.id = ?",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(v,)| v).unwrap_or(false))
    }

    /// Per-feed opener preference for one item; `Ok(None)` when the item is
    /// missing, which open-article routing treats as the default opener.
    pub async fn article_opener(&self, item_id: i64) -> Result<Option<ArticleOpener>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT f.open_articles_with FROM items i JOIN feeds f ON f.id = i.feed_id WHERE i.id = ?",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(v,)| ArticleOpener::parse(&v)))
    }

    /// Items whose feed requests full text by default, for the sync
    /// pipeline to fetch after a refresh.
    pub async fn default_full_text_items(&self) -> Result<Vec<ItemForFetch>> {
        let rows: Vec<(i64, Option<String>)> = sqlx::query_as(
            "SELECT i.id, i.link FROM items i JOIN feeds f ON f.id = i.feed_id \
             WHERE f.full_text_by_default = 1",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, link)| ItemForFetch { id, link })
            .collect())
    }
}
