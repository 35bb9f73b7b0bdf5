//! Social engagement collection and scoring.
//!
//! Counters come from two paths: the Telegram fetcher captures them at
//! ingestion time, and this module's periodic cycle re-polls VK posts and
//! root Telegram articles. Both paths funnel through [`record_observation`]
//! so trend fields are computed the same way everywhere.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::db::Database;
use crate::telegram::{self, TelegramManager};
use crate::vk::VkClient;
use crate::{TARGET_TG, TARGET_VK};

pub const COMMENT_WEIGHT: f64 = 1.0;
pub const LIKE_WEIGHT: f64 = 0.5;
pub const REPOST_WEIGHT: f64 = 2.0;

const VK_STATS_BATCH: usize = 100;

/// Raw engagement counters for one post. For Telegram, likes are the total
/// reaction count and reposts the forward count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocialCounts {
    pub likes: i64,
    pub reposts: i64,
    pub comments: i64,
    pub views: i64,
}

/// Weighted engagement score. Views are recorded but excluded from the
/// score.
pub fn engagement_score(counts: &SocialCounts) -> f64 {
    counts.comments.max(0) as f64 * COMMENT_WEIGHT
        + counts.likes.max(0) as f64 * LIKE_WEIGHT
        + counts.reposts.max(0) as f64 * REPOST_WEIGHT
}

/// Persists one observation: an immutable history row plus the rolling
/// snapshot, with previous/delta/trending computed against the snapshot
/// being overwritten.
pub async fn record_observation(
    db: &Database,
    article_id: i64,
    counts: &SocialCounts,
    collected_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let score = engagement_score(counts);
    let previous = db.previous_engagement_score(article_id).await?;
    let delta = previous.map(|previous| score - previous);
    let trending = delta.map_or(false, |delta| delta > 0.0);

    db.insert_social_stat_history(article_id, counts, score, collected_at)
        .await?;
    db.upsert_social_stat(article_id, counts, score, previous, delta, trending, collected_at)
        .await?;
    Ok(())
}

static VK_LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"wall(-?\d+)_(\d+)").unwrap());
static VK_GUID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"vk:(-?\d+):(\d+)").unwrap());
static TG_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://(?:t\.me|telegram\.me)/([^/]+)/(\d+)").unwrap());

/// (owner_id, post_id) from an article's link, falling back to its guid.
pub fn parse_vk_ids(link: &str, guid: &str) -> Option<(i64, i64)> {
    for (value, regex) in [(link, &*VK_LINK_RE), (guid, &*VK_GUID_RE)] {
        if let Some(captures) = regex.captures(value) {
            let owner = captures.get(1)?.as_str().parse().ok()?;
            let post = captures.get(2)?.as_str().parse().ok()?;
            return Some((owner, post));
        }
    }
    None
}

/// (channel, message_id) from a t.me permalink.
pub fn parse_tg_ids(link: &str) -> Option<(String, i32)> {
    let captures = TG_LINK_RE.captures(link)?;
    let channel = captures.get(1)?.as_str().to_string();
    let message_id = captures.get(2)?.as_str().parse().ok()?;
    Some((channel, message_id))
}

fn vk_counts(post: &Value) -> SocialCounts {
    let count_of = |field: &str| {
        post.get(field)
            .and_then(|holder| holder.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0)
    };
    SocialCounts {
        likes: count_of("likes"),
        reposts: count_of("reposts"),
        comments: count_of("comments"),
        views: count_of("views"),
    }
}

/// One full stats pass over both platforms. Runs on its own interval,
/// independent of ingestion.
pub async fn run_stats_cycle(
    db: &Database,
    vk: Option<&VkClient>,
    tg: &TelegramManager,
) -> usize {
    let collected_at = Utc::now();
    let mut processed = 0;
    if let Some(vk) = vk {
        processed += collect_vk_stats(db, vk, collected_at).await;
    }
    processed += collect_tg_stats(db, tg, collected_at).await;
    info!("Social stats updated for {} articles", processed);
    processed
}

async fn collect_vk_stats(db: &Database, vk: &VkClient, collected_at: DateTime<Utc>) -> usize {
    let targets = match db.vk_stat_targets().await {
        Ok(targets) => targets,
        Err(err) => {
            warn!(target: TARGET_VK, "Failed to list VK stats targets: {}", err);
            return 0;
        }
    };

    let items: Vec<(i64, i64, i64)> = targets
        .into_iter()
        .filter_map(|(article_id, link, guid)| {
            parse_vk_ids(&link, &guid).map(|(owner, post)| (article_id, owner, post))
        })
        .collect();

    let mut processed = 0;
    for batch in items.chunks(VK_STATS_BATCH) {
        let posts_param = batch
            .iter()
            .map(|(_, owner, post)| format!("{owner}_{post}"))
            .collect::<Vec<_>>()
            .join(",");
        let key_to_article: HashMap<String, i64> = batch
            .iter()
            .map(|(article_id, owner, post)| (format!("{owner}_{post}"), *article_id))
            .collect();

        let response = match vk.call("wall.getById", &[("posts", posts_param)]).await {
            Ok(response) => response,
            Err(err) => {
                warn!(target: TARGET_VK, "VK stats fetch failed: {:#}", err);
                continue;
            }
        };

        // Older API versions return a bare array, newer ones wrap it.
        let posts = response
            .as_array()
            .cloned()
            .or_else(|| response.get("items").and_then(Value::as_array).cloned())
            .unwrap_or_default();

        for post in posts {
            let key = match (
                post.get("owner_id").and_then(Value::as_i64),
                post.get("id").and_then(Value::as_i64),
            ) {
                (Some(owner), Some(id)) => format!("{owner}_{id}"),
                _ => continue,
            };
            let Some(article_id) = key_to_article.get(&key) else {
                continue;
            };
            let counts = vk_counts(&post);
            match record_observation(db, *article_id, &counts, collected_at).await {
                Ok(()) => processed += 1,
                Err(err) => {
                    warn!(target: TARGET_VK, "Failed to record stats for article {}: {}", article_id, err)
                }
            }
        }
    }
    processed
}

async fn collect_tg_stats(db: &Database, tg: &TelegramManager, collected_at: DateTime<Utc>) -> usize {
    let targets = match db.tg_stat_targets().await {
        Ok(targets) => targets,
        Err(err) => {
            warn!(target: TARGET_TG, "Failed to list Telegram stats targets: {}", err);
            return 0;
        }
    };

    let mut by_channel: HashMap<String, Vec<(i64, i32)>> = HashMap::new();
    for (article_id, link) in targets {
        if let Some((channel, message_id)) = parse_tg_ids(&link) {
            by_channel.entry(channel).or_default().push((article_id, message_id));
        }
    }
    if by_channel.is_empty() {
        return 0;
    }

    let client = match tg.connected_client().await {
        Ok(Some(client)) => client,
        Ok(None) => {
            info!(target: TARGET_TG, "Telegram stats skipped: not authorized");
            return 0;
        }
        Err(err) => {
            warn!(target: TARGET_TG, "Telegram stats skipped: {:#}", err);
            return 0;
        }
    };

    let mut processed = 0;
    for (channel, items) in by_channel {
        let chat = match client.resolve_username(&channel).await {
            Ok(Some(chat)) => chat,
            Ok(None) => {
                warn!(target: TARGET_TG, "Unknown channel '{}' during stats pass", channel);
                continue;
            }
            Err(err) => {
                warn!(target: TARGET_TG, "Failed to resolve '{}': {}", channel, err);
                continue;
            }
        };

        let message_ids: Vec<i32> = items.iter().map(|(_, message_id)| *message_id).collect();
        let messages = match client.get_messages_by_id(&chat, &message_ids).await {
            Ok(messages) => messages,
            Err(err) => {
                warn!(target: TARGET_TG, "Failed to fetch messages for '{}': {}", channel, err);
                continue;
            }
        };

        let by_message: HashMap<i32, i64> = items
            .iter()
            .map(|(article_id, message_id)| (*message_id, *article_id))
            .collect();
        for message in messages.into_iter().flatten() {
            let Some(article_id) = by_message.get(&message.id()) else {
                continue;
            };
            let Some(counts) = telegram::message_counters(&message) else {
                continue;
            };
            match record_observation(db, *article_id, &counts, collected_at).await {
                Ok(()) => processed += 1,
                Err(err) => {
                    warn!(target: TARGET_TG, "Failed to record stats for article {}: {}", article_id, err)
                }
            }
        }
    }
    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::article::NewArticle;
    use crate::db::source::SourceKind;

    #[test]
    fn score_matches_documented_example() {
        // 10 likes, 2 reposts, 3 comments -> 3*1.0 + 10*0.5 + 2*2.0 = 12.0
        let counts = SocialCounts { likes: 10, reposts: 2, comments: 3, views: 500 };
        assert_eq!(engagement_score(&counts), 12.0);
    }

    #[test]
    fn score_is_monotonic_in_each_weighted_input() {
        let base = SocialCounts { likes: 4, reposts: 1, comments: 2, views: 0 };
        let score = engagement_score(&base);
        assert!(engagement_score(&SocialCounts { likes: 5, ..base }) > score);
        assert!(engagement_score(&SocialCounts { reposts: 2, ..base }) > score);
        assert!(engagement_score(&SocialCounts { comments: 3, ..base }) > score);
        // Views alone never move the score.
        assert_eq!(engagement_score(&SocialCounts { views: 1000, ..base }), score);
    }

    #[test]
    fn vk_ids_parse_from_link_then_guid() {
        assert_eq!(parse_vk_ids("https://vk.com/wall-123_45", ""), Some((-123, 45)));
        assert_eq!(parse_vk_ids("", "vk:-123:45"), Some((-123, 45)));
        assert_eq!(parse_vk_ids("https://example.com", "rss-guid"), None);
    }

    #[test]
    fn tg_ids_parse_from_permalink() {
        assert_eq!(
            parse_tg_ids("https://t.me/channel_a/77"),
            Some(("channel_a".to_string(), 77))
        );
        assert_eq!(parse_tg_ids("https://vk.com/wall-1_2"), None);
    }

    #[test]
    fn vk_counts_read_nested_counters() {
        let post = serde_json::json!({
            "likes": {"count": 10},
            "reposts": {"count": 2},
            "comments": {"count": 3},
        });
        let counts = vk_counts(&post);
        assert_eq!(counts, SocialCounts { likes: 10, reposts: 2, comments: 3, views: 0 });
    }

    #[tokio::test]
    async fn observation_writes_history_and_snapshot_with_delta() {
        let db = crate::db::Database::memory().await;
        let source_id = db.insert_source("ch", SourceKind::Tg, "https://t.me/ch").await;
        let article_id = db
            .insert_article_if_new(&NewArticle {
                source_id,
                title: "Hello",
                link: "https://t.me/ch/1",
                description: Some("Hello"),
                guid: "tg:ch:1",
                published_at: Some(Utc::now()),
                fetched_at: Utc::now(),
            })
            .await
            .unwrap()
            .unwrap();

        let first = SocialCounts { likes: 2, reposts: 0, comments: 1, views: 10 };
        record_observation(&db, article_id, &first, Utc::now()).await.unwrap();

        let snapshot = db.social_stat(article_id).await.unwrap().unwrap();
        assert_eq!(snapshot.engagement_score, 2.0);
        assert_eq!(snapshot.previous_engagement, None);
        assert_eq!(snapshot.engagement_delta, None);
        assert!(!snapshot.is_trending);

        let second = SocialCounts { likes: 4, reposts: 1, comments: 1, views: 20 };
        record_observation(&db, article_id, &second, Utc::now()).await.unwrap();

        let snapshot = db.social_stat(article_id).await.unwrap().unwrap();
        assert_eq!(snapshot.engagement_score, 5.0);
        assert_eq!(snapshot.previous_engagement, Some(2.0));
        assert_eq!(snapshot.engagement_delta, Some(3.0));
        assert!(snapshot.is_trending);
        assert_eq!(snapshot.view_count, 20);

        // History keeps every observation; the snapshot stays single-row.
        assert_eq!(db.social_stat_history_len(article_id).await.unwrap(), 2);
    }
}
