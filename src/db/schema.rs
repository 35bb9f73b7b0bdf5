use super::core::Database;

impl Database {
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                type TEXT NOT NULL CHECK (type IN ('rss', 'vk', 'tg')),
                url TEXT NOT NULL UNIQUE,
                enabled BOOLEAN NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                description TEXT,
                guid TEXT NOT NULL,
                published_at TEXT,
                fetched_at TEXT NOT NULL,
                parent_article_id INTEGER,
                analyzed_at TEXT,
                FOREIGN KEY (source_id) REFERENCES sources (id) ON DELETE CASCADE,
                FOREIGN KEY (parent_article_id) REFERENCES articles (id) ON DELETE SET NULL,
                UNIQUE (source_id, guid),
                UNIQUE (source_id, link)
            );
            CREATE INDEX IF NOT EXISTS idx_articles_source_time ON articles (source_id, published_at);
            CREATE INDEX IF NOT EXISTS idx_articles_parent ON articles (parent_article_id);

            CREATE TABLE IF NOT EXISTS article_social_stat (
                entity_id INTEGER PRIMARY KEY,
                like_count INTEGER NOT NULL DEFAULT 0,
                repost_count INTEGER NOT NULL DEFAULT 0,
                comment_count INTEGER NOT NULL DEFAULT 0,
                view_count INTEGER NOT NULL DEFAULT 0,
                engagement_score REAL NOT NULL DEFAULT 0.0,
                previous_engagement REAL,
                engagement_delta REAL,
                is_trending BOOLEAN NOT NULL DEFAULT 0,
                collected_at TEXT NOT NULL,
                FOREIGN KEY (entity_id) REFERENCES articles (id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS article_social_stat_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id INTEGER NOT NULL,
                like_count INTEGER NOT NULL DEFAULT 0,
                repost_count INTEGER NOT NULL DEFAULT 0,
                comment_count INTEGER NOT NULL DEFAULT 0,
                view_count INTEGER NOT NULL DEFAULT 0,
                engagement_score REAL NOT NULL DEFAULT 0.0,
                collected_at TEXT NOT NULL,
                FOREIGN KEY (entity_id) REFERENCES articles (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_social_stat_history_entity_time
                ON article_social_stat_history (entity_id, collected_at);

            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL UNIQUE,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}
