use anyhow::Result;
use sqlx::QueryBuilder;
use std::collections::BTreeMap;

use super::schema::Database;
use super::types::{ArticleOpener, DrawerItem, FeedTitle, NewFeed, ParsedItem, ScreenTitle};
use super::ID_UNSET;
use crate::util::plain_text_of_html;

/// Stored snippets are clipped to this many characters of plain text.
const SNIPPET_MAX_CHARS: usize = 200;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a feed, or update its metadata when the url already exists.
    /// Returns the feed's row id either way.
    pub async fn insert_feed(&self, feed: &NewFeed) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (url, title, custom_title, tag, full_text_by_default, open_articles_with)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                custom_title = excluded.custom_title,
                tag = excluded.tag,
                full_text_by_default = excluded.full_text_by_default,
                open_articles_with = excluded.open_articles_with
            RETURNING id
        "#,
        )
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(&feed.custom_title)
        .bind(&feed.tag)
        .bind(feed.full_text_by_default)
        .bind(feed.open_articles_with.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Upsert items for a feed.
    ///
    /// Titles and snippets are stored as plain text: incoming HTML is
    /// flattened and snippets clipped to [`SNIPPET_MAX_CHARS`]. Metadata
    /// columns refresh from the incoming batch; the unread and notified
    /// flags are absent from the SET list, so engine-owned state survives
    /// re-syncs. Batches of 50 keep each statement well under SQLite's 999
    /// parameter limit (10 columns * 50 = 500).
    pub async fn upsert_items(&self, feed_id: i64, items: &[ParsedItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let cleaned: Vec<ParsedItem> = items
            .iter()
            .map(|item| ParsedItem {
                title: plain_text_of_html(&item.title),
                snippet: plain_text_of_html(&item.snippet)
                    .chars()
                    .take(SNIPPET_MAX_CHARS)
                    .collect(),
                ..item.clone()
            })
            .collect();

        const BATCH_SIZE: usize = 50;
        let mut tx = self.pool.begin().await?;

        for chunk in cleaned.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO items (feed_id, guid, title, snippet, link, image_url, \
                 author, enclosure_link, enclosure_name, pub_date) ",
            );

            builder.push_values(chunk, |mut b, item| {
                b.push_bind(feed_id)
                    .push_bind(&item.guid)
                    .push_bind(&item.title)
                    .push_bind(&item.snippet)
                    .push_bind(&item.link)
                    .push_bind(&item.image_url)
                    .push_bind(&item.author)
                    .push_bind(&item.enclosure_link)
                    .push_bind(&item.enclosure_name)
                    .push_bind(item.pub_date);
            });

            builder.push(
                " ON CONFLICT(feed_id, guid) DO UPDATE SET \
                 title = excluded.title, snippet = excluded.snippet, \
                 link = excluded.link, image_url = excluded.image_url, \
                 author = excluded.author, enclosure_link = excluded.enclosure_link, \
                 enclosure_name = excluded.enclosure_name, pub_date = excluded.pub_date",
            );

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete feeds by id; their items go with them via ON DELETE CASCADE.
    /// Returns the number of feeds removed.
    pub async fn delete_feeds(&self, feed_ids: &[i64]) -> Result<u64> {
        if feed_ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("DELETE FROM feeds WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in feed_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        tracing::debug!(rows = result.rows_affected(), "deleted feeds");
        Ok(result.rows_affected())
    }

    /// Set whether a feed wants full text fetched for every item.
    pub async fn set_feed_full_text_by_default(&self, feed_id: i64, value: bool) -> Result<()> {
        sqlx::query("UPDATE feeds SET full_text_by_default = ? WHERE id = ?")
            .bind(value)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set a feed's per-feed opener preference.
    pub async fn set_feed_article_opener(
        &self,
        feed_id: i64,
        opener: ArticleOpener,
    ) -> Result<()> {
        sqlx::query("UPDATE feeds SET open_articles_with = ? WHERE id = ?")
            .bind(opener.as_str())
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Derived Views
    // ========================================================================

    /// The navigation drawer as a flat list with unread counts.
    ///
    /// One grouped query feeds everything: the all-items total is the sum of
    /// per-feed counts, tag counts aggregate the feeds sharing a tag. Order
    /// is all-items first, then tags alphabetically, then feeds by display
    /// title.
    pub async fn drawer_items_with_unread(&self) -> Result<Vec<DrawerItem>> {
        let rows: Vec<(i64, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT f.id, COALESCE(NULLIF(f.custom_title, ''), f.title) AS title, f.tag,
                   COUNT(CASE WHEN i.unread = 1 THEN 1 END) AS unread_count
            FROM feeds f
            LEFT JOIN items i ON i.feed_id = f.id
            GROUP BY f.id
            ORDER BY title COLLATE NOCASE
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = rows.iter().map(|(_, _, _, count)| count).sum();
        let mut tag_counts: BTreeMap<String, i64> = BTreeMap::new();
        for (_, _, tag, count) in &rows {
            if !tag.is_empty() {
                *tag_counts.entry(tag.clone()).or_default() += count;
            }
        }

        let mut drawer = Vec::with_capacity(rows.len() + tag_counts.len() + 1);
        drawer.push(DrawerItem::AllItems {
            unread_count: total,
        });
        for (tag, unread_count) in tag_counts {
            drawer.push(DrawerItem::Tag { tag, unread_count });
        }
        for (id, title, tag, unread_count) in rows {
            drawer.push(DrawerItem::Feed {
                id,
                title,
                tag,
                unread_count,
            });
        }

        Ok(drawer)
    }

    /// Title for the current selection, following selection precedence:
    /// a selected feed's display title, else the selected tag, else `None`.
    /// A feed id pointing at a deleted feed also yields `None`.
    pub async fn screen_title(&self, feed_id: i64, tag: &str) -> Result<ScreenTitle> {
        if feed_id > ID_UNSET {
            let row: Option<(String,)> = sqlx::query_as(
                "SELECT COALESCE(NULLIF(custom_title, ''), title) FROM feeds WHERE id = ?",
            )
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
            return Ok(ScreenTitle {
                title: row.map(|(title,)| title),
            });
        }

        if !tag.is_empty() {
            return Ok(ScreenTitle {
                title: Some(tag.to_string()),
            });
        }

        Ok(ScreenTitle::default())
    }

    /// Feeds contributing to the current selection, ordered by display
    /// title. Drives the "mark all in these feeds" confirmation dialog.
    pub async fn visible_feed_titles(&self, feed_id: i64, tag: &str) -> Result<Vec<FeedTitle>> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "SELECT id, COALESCE(NULLIF(custom_title, ''), title) AS title FROM feeds",
        );
        if feed_id > ID_UNSET {
            builder.push(" WHERE id = ").push_bind(feed_id);
        } else if !tag.is_empty() {
            builder.push(" WHERE tag = ").push_bind(tag.to_string());
        }
        builder.push(" ORDER BY title COLLATE NOCASE");

        let rows: Vec<(i64, String)> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(id, title)| FeedTitle { id, title })
            .collect())
    }
}
