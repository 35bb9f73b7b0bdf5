use tracing::warn;

use super::core::Database;
use crate::TARGET_DB;

/// Closed set of source platforms the pipeline knows how to fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Rss,
    Vk,
    Tg,
}

impl SourceKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rss" => Some(SourceKind::Rss),
            "vk" => Some(SourceKind::Vk),
            "tg" => Some(SourceKind::Tg),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Rss => "rss",
            SourceKind::Vk => "vk",
            SourceKind::Tg => "tg",
        }
    }
}

/// One configured source. Owned by the external CRUD layer; the core only
/// reads enabled rows and never mutates them.
#[derive(Clone, Debug)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
}

impl Database {
    pub async fn enabled_sources(&self) -> Result<Vec<Source>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT id, name, type, url FROM sources WHERE enabled = 1 ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, name, kind, url)| match SourceKind::parse(&kind) {
                Some(kind) => Some(Source { id, name, kind, url }),
                None => {
                    warn!(target: TARGET_DB, "Skipping source {} with unknown type '{}'", id, kind);
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
impl Database {
    pub(crate) async fn insert_source(&self, name: &str, kind: SourceKind, url: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO sources (name, type, url, enabled, created_at) VALUES (?1, ?2, ?3, 1, ?4) RETURNING id",
        )
        .bind(name)
        .bind(kind.as_str())
        .bind(url)
        .bind(chrono::Utc::now())
        .fetch_one(self.pool())
        .await
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parsing_is_closed() {
        assert_eq!(SourceKind::parse("rss"), Some(SourceKind::Rss));
        assert_eq!(SourceKind::parse("vk"), Some(SourceKind::Vk));
        assert_eq!(SourceKind::parse("tg"), Some(SourceKind::Tg));
        assert_eq!(SourceKind::parse("telegram"), None);
    }

    #[tokio::test]
    async fn enabled_sources_roundtrip() {
        let db = Database::memory().await;
        db.insert_source("Channel A", SourceKind::Tg, "https://t.me/channel_a").await;
        db.insert_source("Feed", SourceKind::Rss, "https://example.com/rss").await;

        let sources = db.enabled_sources().await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].kind, SourceKind::Tg);
        assert_eq!(sources[1].url, "https://example.com/rss");
    }
}
