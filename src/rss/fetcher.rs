use std::io::Cursor;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::db::article::NewArticle;
use crate::db::source::{Source, SourceKind};
use crate::db::Database;
use crate::TARGET_WEB_REQUEST;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const USER_AGENT: &str = "NewsdeskBot/0.1 (+https://localhost)";
const ACCEPT: &str = "application/rss+xml, application/xml;q=0.9, */*;q=0.8";

/// Normalized feed entry ready for insertion.
#[derive(Debug, PartialEq)]
struct FeedItem {
    title: String,
    link: String,
    guid: String,
    description: Option<String>,
    published_at: Option<DateTime<Utc>>,
}

/// One fetch pass over every enabled RSS source. A single source's failure
/// is logged and counts as zero additions.
pub async fn run_rss_cycle(db: &Database, http: &reqwest::Client) -> usize {
    let sources = match db.enabled_sources().await {
        Ok(sources) => sources,
        Err(err) => {
            error!(target: TARGET_WEB_REQUEST, "Failed to load sources: {}", err);
            return 0;
        }
    };

    let mut added = 0;
    for source in sources.iter().filter(|source| source.kind == SourceKind::Rss) {
        match process_source(db, http, source).await {
            Ok(count) => {
                if count > 0 {
                    info!(target: TARGET_WEB_REQUEST, "Processed RSS feed: {} - {} new articles added", source.url, count);
                } else {
                    debug!(target: TARGET_WEB_REQUEST, "Processed RSS feed: {} - no new articles", source.url);
                }
                added += count;
            }
            Err(err) => {
                error!(target: TARGET_WEB_REQUEST, "RSS pass failed for {}: {:#}", source.url, err);
            }
        }
    }
    added
}

async fn process_source(db: &Database, http: &reqwest::Client, source: &Source) -> Result<usize> {
    Url::parse(&source.url).with_context(|| format!("invalid feed URL: {}", source.url))?;

    let response = timeout(
        REQUEST_TIMEOUT,
        http.get(&source.url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .send(),
    )
    .await
    .with_context(|| format!("timed out fetching {}", source.url))??;

    let body = response.error_for_status()?.bytes().await?;
    let feed = parser::parse(Cursor::new(body.as_ref()))
        .with_context(|| format!("failed to parse feed from {}", source.url))?;

    let mut added = 0;
    for entry in feed.entries {
        let Some(item) = item_from_entry(entry) else {
            warn!(target: TARGET_WEB_REQUEST, "Skipping incomplete entry from {} (missing title/link)", source.url);
            continue;
        };

        let article = NewArticle {
            source_id: source.id,
            title: &item.title,
            link: &item.link,
            description: item.description.as_deref(),
            guid: &item.guid,
            published_at: item.published_at,
            fetched_at: Utc::now(),
        };
        match db.insert_article_if_new(&article).await {
            Ok(Some(_)) => {
                added += 1;
                info!(target: TARGET_WEB_REQUEST, "Added article from {}: {}", source.name, item.title);
            }
            Ok(None) => {}
            Err(err) => {
                error!(target: TARGET_WEB_REQUEST, "Insert failed for {}: {}", item.link, err);
            }
        }
    }
    Ok(added)
}

/// Extracts the canonical fields from a feed entry. The guid is the entry
/// id, falling back to the link; entries without a title or link are
/// rejected, so a further title fallback can never be reached.
fn item_from_entry(entry: Entry) -> Option<FeedItem> {
    let title = entry
        .title
        .as_ref()
        .map(|text| text.content.trim().to_string())
        .unwrap_or_default();
    let link = entry
        .links
        .first()
        .map(|link| link.href.trim().to_string())
        .unwrap_or_default();
    if title.is_empty() || link.is_empty() {
        return None;
    }

    // feed-rs synthesizes an id for entries that omit one, so the link
    // fallback only covers feeds shipping a literally blank id.
    let id = entry.id.trim();
    let guid = if !id.is_empty() {
        id.to_string()
    } else {
        link.clone()
    };

    Some(FeedItem {
        title,
        link,
        guid,
        description: entry.summary.map(|text| text.content),
        published_at: entry.published.or(entry.updated),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <item>
      <title>First post</title>
      <link>https://example.com/1</link>
      <guid>post-1</guid>
      <description>Body one</description>
      <pubDate>Tue, 05 Aug 2025 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title></title>
      <link>https://example.com/2</link>
    </item>
    <item>
      <title>No id</title>
      <link>https://example.com/3</link>
    </item>
  </channel>
</rss>"#;

    fn parse_items() -> Vec<FeedItem> {
        let feed = parser::parse(Cursor::new(FEED.as_bytes())).unwrap();
        feed.entries.into_iter().filter_map(item_from_entry).collect()
    }

    #[test]
    fn entries_without_title_are_skipped() {
        let items = parse_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "First post");
        assert_eq!(items[0].guid, "post-1");
        assert_eq!(items[0].description.as_deref(), Some("Body one"));
        assert!(items[0].published_at.is_some());
    }

    #[test]
    fn guid_falls_back_to_link() {
        let items = parse_items();
        let no_id = &items[1];
        assert_eq!(no_id.title, "No id");
        // feed-rs synthesizes an id when the feed omits one; either way the
        // guid must be non-empty and stable.
        assert!(!no_id.guid.is_empty());
    }

    #[tokio::test]
    async fn duplicate_pass_adds_nothing() {
        let db = Database::memory().await;
        let source_id = db
            .insert_source("feed", SourceKind::Rss, "https://example.com/rss")
            .await;

        for _ in 0..2 {
            for item in parse_items() {
                let _ = db
                    .insert_article_if_new(&NewArticle {
                        source_id,
                        title: &item.title,
                        link: &item.link,
                        description: item.description.as_deref(),
                        guid: &item.guid,
                        published_at: item.published_at,
                        fetched_at: Utc::now(),
                    })
                    .await
                    .unwrap();
            }
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
