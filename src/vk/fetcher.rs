use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::db::article::NewArticle;
use crate::db::source::{Source, SourceKind};
use crate::db::Database;
use crate::util::title_from_text;
use crate::vk::client::VkClient;
use crate::vk::media::download_post_media;
use crate::TARGET_VK;

static VK_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://(?:www\.)?vk\.com/(?P<tail>[^/?#]+)").unwrap());

/// One wall post as returned by `wall.get`. Unknown attachment types
/// deserialize as [`Attachment::Other`] so a new VK media kind never breaks
/// ingestion.
#[derive(Debug, Deserialize)]
pub(crate) struct WallPost {
    pub id: i64,
    pub owner_id: i64,
    pub date: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Attachment {
    Photo { photo: Photo },
    Video { video: VideoAttachment },
    Doc { doc: DocAttachment },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Photo {
    #[serde(default)]
    pub sizes: Vec<PhotoSize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PhotoSize {
    pub url: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VideoAttachment {
    pub id: i64,
    pub owner_id: i64,
    pub player: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DocAttachment {
    pub url: Option<String>,
    pub ext: Option<String>,
    pub size: Option<i64>,
}

impl WallPost {
    pub fn guid(&self) -> String {
        format!("vk:{}:{}", self.owner_id, self.id)
    }

    pub fn permalink(&self) -> String {
        format!("https://vk.com/wall{}_{}", self.owner_id, self.id)
    }
}

/// `club123` and `public123` slugs carry the community id directly; other
/// slugs need an API round trip.
fn numeric_slug(tail: &str) -> Option<i64> {
    let digits = tail
        .strip_prefix("club")
        .or_else(|| tail.strip_prefix("public"))?;
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i64>().ok().map(|id| -id)
}

fn slug_from_url(url: &str) -> Option<&str> {
    VK_URL_RE
        .captures(url)
        .and_then(|captures| captures.name("tail"))
        .map(|tail| tail.as_str())
}

async fn owner_id_from_url(vk: &VkClient, url: &str) -> Result<i64> {
    let tail = slug_from_url(url)
        .with_context(|| format!("not a VK community URL: {url}"))?;
    if let Some(owner_id) = numeric_slug(tail) {
        return Ok(owner_id);
    }
    match vk.resolve_screen_name(tail).await? {
        Some(owner_id) => Ok(owner_id),
        None => bail!("cannot resolve VK community from '{url}'"),
    }
}

/// One fetch pass over every enabled VK source.
pub async fn run_vk_cycle(
    db: &Database,
    vk: &VkClient,
    http: &reqwest::Client,
    media_root: &Path,
) -> usize {
    let sources = match db.enabled_sources().await {
        Ok(sources) => sources,
        Err(err) => {
            error!(target: TARGET_VK, "Failed to load sources: {}", err);
            return 0;
        }
    };

    let mut added = 0;
    for source in sources.iter().filter(|source| source.kind == SourceKind::Vk) {
        match process_source(db, vk, http, media_root, source).await {
            Ok(count) => {
                if count > 0 {
                    info!(target: TARGET_VK, "Processed VK wall: {} - {} new articles added", source.url, count);
                } else {
                    debug!(target: TARGET_VK, "Processed VK wall: {} - no new articles", source.url);
                }
                added += count;
            }
            Err(err) => {
                error!(target: TARGET_VK, "VK pass failed for {}: {:#}", source.url, err);
            }
        }
    }
    added
}

async fn process_source(
    db: &Database,
    vk: &VkClient,
    http: &reqwest::Client,
    media_root: &Path,
    source: &Source,
) -> Result<usize> {
    let owner_id = owner_id_from_url(vk, &source.url).await?;
    let fetch_limit = db.setting_int("fetch_limit", 100).await?;
    let keep_media = db.setting_bool("keep_media", true).await?;
    let media_max_bytes = db.setting_int("media_max_bytes", 52_428_800).await?;

    let response = vk
        .call(
            "wall.get",
            &[
                ("owner_id", owner_id.to_string()),
                ("count", fetch_limit.to_string()),
                ("filter", "owner".to_string()),
            ],
        )
        .await?;

    let items = response
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut added = 0;
    for item in items {
        let post: WallPost = match serde_json::from_value(item) {
            Ok(post) => post,
            Err(err) => {
                warn!(target: TARGET_VK, "Skipping malformed wall post from {}: {}", source.url, err);
                continue;
            }
        };

        let link = post.permalink();
        let guid = post.guid();
        let text = post.text.trim();
        let title = title_from_text(text, &link);
        let published_at = Utc.timestamp_opt(post.date, 0).single();

        let inserted = db
            .insert_article_if_new(&NewArticle {
                source_id: source.id,
                title: &title,
                link: &link,
                description: (!text.is_empty()).then_some(text),
                guid: &guid,
                published_at,
                fetched_at: Utc::now(),
            })
            .await?;

        let Some(article_id) = inserted else {
            continue;
        };
        added += 1;
        info!(target: TARGET_VK, "Added article from {}: {}", source.name, title);

        // Media failures never roll back the article row.
        if keep_media && !post.attachments.is_empty() {
            if let Err(err) =
                download_post_media(http, media_root, &post, media_max_bytes).await
            {
                warn!(
                    target: TARGET_VK,
                    "Media download failed for article {} ({}): {:#}", article_id, link, err
                );
            }
        }
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_slugs_carry_the_owner_id() {
        assert_eq!(numeric_slug("club123"), Some(-123));
        assert_eq!(numeric_slug("public9000"), Some(-9000));
        assert_eq!(numeric_slug("clubhouse"), None);
        assert_eq!(numeric_slug("club"), None);
        assert_eq!(numeric_slug("somegroup"), None);
    }

    #[test]
    fn community_slug_is_read_from_the_url() {
        assert_eq!(slug_from_url("https://vk.com/club123"), Some("club123"));
        assert_eq!(slug_from_url("https://www.vk.com/mygroup?w=x"), Some("mygroup"));
        assert_eq!(slug_from_url("http://vk.com/public5/extra"), Some("public5"));
        assert_eq!(slug_from_url("https://example.com/club123"), None);
    }

    #[test]
    fn wall_posts_tolerate_unknown_attachments() {
        let raw = serde_json::json!({
            "id": 45,
            "owner_id": -123,
            "date": 1_700_000_000,
            "text": "Breaking news",
            "attachments": [
                {"type": "photo", "photo": {"sizes": [
                    {"url": "https://cdn/p_small.jpg", "width": 100, "height": 100},
                    {"url": "https://cdn/p_big.jpg", "width": 1000, "height": 800},
                ]}},
                {"type": "poll", "poll": {"id": 1}},
                {"type": "video", "video": {"id": 7, "owner_id": -123}},
            ],
        });
        let post: WallPost = serde_json::from_value(raw).unwrap();
        assert_eq!(post.guid(), "vk:-123:45");
        assert_eq!(post.permalink(), "https://vk.com/wall-123_45");
        assert_eq!(post.attachments.len(), 3);
        assert!(matches!(post.attachments[1], Attachment::Other));
    }

    #[test]
    fn posts_without_text_or_attachments_still_deserialize() {
        let post: WallPost =
            serde_json::from_value(serde_json::json!({"id": 1, "owner_id": -2, "date": 0}))
                .unwrap();
        assert!(post.text.is_empty());
        assert!(post.attachments.is_empty());
    }
}
