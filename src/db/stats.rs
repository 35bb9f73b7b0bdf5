use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::core::Database;
use crate::stats::SocialCounts;

/// Current engagement snapshot for one article.
#[derive(Clone, Debug, FromRow)]
pub struct SocialStatRow {
    pub entity_id: i64,
    pub like_count: i64,
    pub repost_count: i64,
    pub comment_count: i64,
    pub view_count: i64,
    pub engagement_score: f64,
    pub previous_engagement: Option<f64>,
    pub engagement_delta: Option<f64>,
    pub is_trending: bool,
    pub collected_at: DateTime<Utc>,
}

impl Database {
    pub async fn previous_engagement_score(
        &self,
        article_id: i64,
    ) -> Result<Option<f64>, sqlx::Error> {
        sqlx::query_scalar::<_, f64>(
            "SELECT engagement_score FROM article_social_stat WHERE entity_id = ?1",
        )
        .bind(article_id)
        .fetch_optional(self.pool())
        .await
    }

    /// Overwrites the rolling snapshot with the latest known counters.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_social_stat(
        &self,
        article_id: i64,
        counts: &SocialCounts,
        score: f64,
        previous: Option<f64>,
        delta: Option<f64>,
        trending: bool,
        collected_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO article_social_stat
                (entity_id, like_count, repost_count, comment_count, view_count,
                 engagement_score, previous_engagement, engagement_delta, is_trending, collected_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (entity_id) DO UPDATE SET
                like_count = excluded.like_count,
                repost_count = excluded.repost_count,
                comment_count = excluded.comment_count,
                view_count = excluded.view_count,
                engagement_score = excluded.engagement_score,
                previous_engagement = excluded.previous_engagement,
                engagement_delta = excluded.engagement_delta,
                is_trending = excluded.is_trending,
                collected_at = excluded.collected_at
            "#,
        )
        .bind(article_id)
        .bind(counts.likes.max(0))
        .bind(counts.reposts.max(0))
        .bind(counts.comments.max(0))
        .bind(counts.views.max(0))
        .bind(score)
        .bind(previous)
        .bind(delta)
        .bind(trending)
        .bind(collected_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Append-only observation row; never updated or deleted by the core.
    pub async fn insert_social_stat_history(
        &self,
        article_id: i64,
        counts: &SocialCounts,
        score: f64,
        collected_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO article_social_stat_history
                (entity_id, like_count, repost_count, comment_count, view_count,
                 engagement_score, collected_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(article_id)
        .bind(counts.likes.max(0))
        .bind(counts.reposts.max(0))
        .bind(counts.comments.max(0))
        .bind(counts.views.max(0))
        .bind(score)
        .bind(collected_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn social_stat(&self, article_id: i64) -> Result<Option<SocialStatRow>, sqlx::Error> {
        sqlx::query_as::<_, SocialStatRow>(
            "SELECT * FROM article_social_stat WHERE entity_id = ?1",
        )
        .bind(article_id)
        .fetch_optional(self.pool())
        .await
    }

    pub async fn social_stat_history_len(&self, article_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM article_social_stat_history WHERE entity_id = ?1",
        )
        .bind(article_id)
        .fetch_one(self.pool())
        .await
    }

    /// All VK articles; post identity is re-parsed from link/guid by the
    /// collector.
    pub async fn vk_stat_targets(&self) -> Result<Vec<(i64, String, String)>, sqlx::Error> {
        sqlx::query_as::<_, (i64, String, String)>(
            r#"
            SELECT a.id, a.link, a.guid FROM articles a
            JOIN sources s ON s.id = a.source_id
            WHERE s.type = 'vk'
            ORDER BY a.id
            "#,
        )
        .fetch_all(self.pool())
        .await
    }

    /// Root Telegram articles only; children share the parent's counters.
    pub async fn tg_stat_targets(&self) -> Result<Vec<(i64, String)>, sqlx::Error> {
        sqlx::query_as::<_, (i64, String)>(
            r#"
            SELECT a.id, a.link FROM articles a
            JOIN sources s ON s.id = a.source_id
            WHERE s.type = 'tg' AND a.parent_article_id IS NULL
            ORDER BY a.id
            "#,
        )
        .fetch_all(self.pool())
        .await
    }
}
