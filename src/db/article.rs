use chrono::{DateTime, Utc};
use tracing::debug;

use super::core::Database;
use crate::TARGET_DB;

/// Canonical article shape shared by all fetchers.
#[derive(Debug)]
pub struct NewArticle<'a> {
    pub source_id: i64,
    pub title: &'a str,
    pub link: &'a str,
    pub description: Option<&'a str>,
    pub guid: &'a str,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

/// Article id + timestamp pair used by the correlation queries.
#[derive(Clone, Copy, Debug)]
pub struct CorrelationCandidate {
    pub id: i64,
    pub published_at: DateTime<Utc>,
}

impl Database {
    /// Atomic insert-or-ignore keyed on the (source_id, guid) and
    /// (source_id, link) unique pairs. Returns the new id when a row was
    /// actually inserted, `None` when the article was already known. This is
    /// a single statement so concurrent or duplicate cycles cannot race a
    /// check-then-insert.
    pub async fn insert_article_if_new(
        &self,
        article: &NewArticle<'_>,
    ) -> Result<Option<i64>, sqlx::Error> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO articles (source_id, title, link, description, guid, published_at, fetched_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(article.source_id)
        .bind(article.title)
        .bind(article.link)
        .bind(article.description)
        .bind(article.guid)
        .bind(article.published_at)
        .bind(article.fetched_at)
        .fetch_optional(self.pool())
        .await?;

        if let Some(id) = id {
            debug!(target: TARGET_DB, "Inserted article {} ({})", id, article.guid);
        }
        Ok(id)
    }

    /// Media-only articles in the window that have not been linked yet.
    /// An orphan carries no text of its own: its title equals its permalink
    /// and its description is empty.
    pub async fn unlinked_orphans_between(
        &self,
        source_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CorrelationCandidate>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            r#"
            SELECT id, published_at FROM articles
            WHERE source_id = ?1
              AND parent_article_id IS NULL
              AND (description IS NULL OR description = '')
              AND title = link
              AND published_at IS NOT NULL
              AND published_at BETWEEN ?2 AND ?3
            ORDER BY id
            "#,
        )
        .bind(source_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, published_at)| CorrelationCandidate { id, published_at })
            .collect())
    }

    /// Text posts in the window that could adopt an orphan. Articles that
    /// are themselves children are excluded, keeping the tree one level deep.
    pub async fn parent_candidates_between(
        &self,
        source_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CorrelationCandidate>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            r#"
            SELECT id, published_at FROM articles
            WHERE source_id = ?1
              AND parent_article_id IS NULL
              AND description IS NOT NULL
              AND description != ''
              AND published_at IS NOT NULL
              AND published_at BETWEEN ?2 AND ?3
            ORDER BY id
            "#,
        )
        .bind(source_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, published_at)| CorrelationCandidate { id, published_at })
            .collect())
    }

    /// Conditional attach: only succeeds while the child is still unlinked,
    /// so a concurrently-run duplicate cycle cannot double-attach or steal
    /// an already-assigned child.
    pub async fn attach_parent(&self, child_id: i64, parent_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE articles SET parent_article_id = ?1
            WHERE id = ?2 AND parent_article_id IS NULL AND id != ?1
            "#,
        )
        .bind(parent_id)
        .bind(child_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Articles the external analyzer has not processed yet.
    pub async fn unanalyzed_articles(&self) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM articles WHERE analyzed_at IS NULL ORDER BY id",
        )
        .fetch_all(self.pool())
        .await
    }

    pub async fn mark_analyzed(
        &self,
        article_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE articles SET analyzed_at = ?1 WHERE id = ?2")
            .bind(at)
            .bind(article_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn parent_of(&self, article_id: i64) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, Option<i64>>(
            "SELECT parent_article_id FROM articles WHERE id = ?1",
        )
        .bind(article_id)
        .fetch_one(self.pool())
        .await
    }
}
