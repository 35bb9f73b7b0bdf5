use std::path::Path;

use anyhow::{bail, Result};
use chrono::Utc;
use grammers_client::types::Message;
use grammers_client::{Client, InvocationError};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::correlate;
use crate::db::article::NewArticle;
use crate::db::source::{Source, SourceKind};
use crate::db::Database;
use crate::stats;
use crate::telegram::auth::TelegramManager;
use crate::telegram::media::{download_message_media, is_post_media};
use crate::telegram::{channel_from_url, message_counters, permalink};
use crate::util::title_from_text;
use crate::TARGET_TG;

const DEFAULT_FLOOD_WAIT_SECS: u64 = 60;

struct IngestSettings {
    window_secs: i64,
    keep_media: bool,
    media_max_bytes: i64,
}

/// One fetch pass over every enabled Telegram source. Without an
/// authorized session the pass is skipped entirely.
pub async fn run_tg_cycle(db: &Database, manager: &TelegramManager, media_root: &Path) -> usize {
    let sources = match db.enabled_sources().await {
        Ok(sources) => sources,
        Err(err) => {
            error!(target: TARGET_TG, "Failed to load sources: {}", err);
            return 0;
        }
    };
    let sources: Vec<_> = sources
        .into_iter()
        .filter(|source| source.kind == SourceKind::Tg)
        .collect();
    if sources.is_empty() {
        return 0;
    }

    let client = match manager.connected_client().await {
        Ok(Some(client)) => client,
        Ok(None) => {
            info!(target: TARGET_TG, "Telegram ingestion skipped: not authorized");
            return 0;
        }
        Err(err) => {
            warn!(target: TARGET_TG, "Telegram ingestion skipped: {:#}", err);
            return 0;
        }
    };

    let mut added = 0;
    for source in &sources {
        match process_source(db, &client, media_root, source).await {
            Ok(count) => {
                if count > 0 {
                    info!(target: TARGET_TG, "Processed channel: {} - {} new articles added", source.url, count);
                } else {
                    debug!(target: TARGET_TG, "Processed channel: {} - no new articles", source.url);
                }
                added += count;
            }
            Err(err) => {
                error!(target: TARGET_TG, "Telegram pass failed for {}: {:#}", source.url, err);
            }
        }
    }
    added
}

async fn process_source(
    db: &Database,
    client: &Client,
    media_root: &Path,
    source: &Source,
) -> Result<usize> {
    let Some(channel) = channel_from_url(&source.url) else {
        bail!("not a Telegram channel URL: {}", source.url);
    };

    let fetch_limit = db.setting_int("fetch_limit", 100).await?.max(1) as usize;
    let settings = IngestSettings {
        window_secs: db.setting_int("correlation_window", 10).await?,
        keep_media: db.setting_bool("keep_media", true).await?,
        media_max_bytes: db.setting_int("media_max_bytes", 52_428_800).await?,
    };

    let chat = match client.resolve_username(&channel).await? {
        Some(chat) => chat,
        None => bail!("unknown Telegram channel '{channel}'"),
    };

    let mut added = 0;
    let mut messages = client.iter_messages(&chat).limit(fetch_limit);
    loop {
        let message = match messages.next().await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(err) => {
                if let Some(seconds) = flood_wait_seconds(&err) {
                    warn!(target: TARGET_TG, "Flood wait on '{}': sleeping {}s", channel, seconds);
                    sleep(Duration::from_secs(seconds)).await;
                    continue;
                }
                return Err(err.into());
            }
        };

        match ingest_message(db, client, media_root, source, &channel, &message, &settings).await {
            Ok(true) => added += 1,
            Ok(false) => {}
            Err(err) => {
                warn!(
                    target: TARGET_TG,
                    "Failed to ingest {}: {:#}", permalink(&channel, message.id()), err
                );
            }
        }
    }
    Ok(added)
}

/// Stores one message as an article. Text posts pick up engagement
/// counters and adopt nearby media-only orphans; media-only messages
/// attach to the nearest text post instead. Messages with neither text
/// nor supported media are skipped.
async fn ingest_message(
    db: &Database,
    client: &Client,
    media_root: &Path,
    source: &Source,
    channel: &str,
    message: &Message,
    settings: &IngestSettings,
) -> Result<bool> {
    let text = message.text().trim().to_string();
    let media = message.media().filter(is_post_media);
    if text.is_empty() && media.is_none() {
        return Ok(false);
    }

    let link = permalink(channel, message.id());
    let guid = format!("tg:{}:{}", channel, message.id());
    let title = title_from_text(&text, &link);
    let published_at = message.date();

    let inserted = db
        .insert_article_if_new(&NewArticle {
            source_id: source.id,
            title: &title,
            link: &link,
            description: (!text.is_empty()).then_some(text.as_str()),
            guid: &guid,
            published_at: Some(published_at),
            fetched_at: Utc::now(),
        })
        .await?;
    let Some(article_id) = inserted else {
        return Ok(false);
    };
    info!(target: TARGET_TG, "Added article from {}: {}", source.name, title);

    if text.is_empty() {
        match correlate::link_parent(db, source.id, article_id, published_at, settings.window_secs)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(target: TARGET_TG, "No parent within the window for {}", link);
            }
            Err(err) => {
                warn!(target: TARGET_TG, "Correlation failed for article {}: {}", article_id, err);
            }
        }
    } else {
        // First counter observation happens at ingestion; the stats cycle
        // refreshes it later.
        if let Some(counts) = message_counters(message) {
            if let Err(err) = stats::record_observation(db, article_id, &counts, Utc::now()).await
            {
                warn!(target: TARGET_TG, "Failed to record stats for article {}: {}", article_id, err);
            }
        }
        if let Err(err) =
            correlate::link_children(db, source.id, article_id, published_at, settings.window_secs)
                .await
        {
            warn!(target: TARGET_TG, "Correlation failed for article {}: {}", article_id, err);
        }
    }

    // Media failures never roll back the article row.
    if settings.keep_media {
        if let Some(media) = media {
            if let Err(err) = download_message_media(
                client,
                media_root,
                channel,
                message.id(),
                &media,
                settings.media_max_bytes,
            )
            .await
            {
                warn!(target: TARGET_TG, "Media download failed for {}: {:#}", link, err);
            }
        }
    }
    Ok(true)
}

fn flood_wait_seconds(err: &InvocationError) -> Option<u64> {
    match err {
        InvocationError::Rpc(rpc) if rpc.name == "FLOOD_WAIT" => Some(
            rpc.value
                .map(u64::from)
                .unwrap_or(DEFAULT_FLOOD_WAIT_SECS),
        ),
        _ => None,
    }
}
