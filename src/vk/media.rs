use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::media::{write_manifest, MediaEntry, MediaKind};
use crate::vk::fetcher::{Attachment, WallPost};
use crate::TARGET_VK;

/// Downloads a post's attachments into `<root>/vk/<owner>/<post>/` and
/// writes the manifest. Photos keep their largest rendition; videos are
/// recorded as remote embeds; documents are fetched when their declared
/// size fits the cap.
pub(crate) async fn download_post_media(
    http: &reqwest::Client,
    media_root: &Path,
    post: &WallPost,
    max_bytes: i64,
) -> Result<usize> {
    let dir = media_root
        .join("vk")
        .join(post.owner_id.to_string())
        .join(post.id.to_string());
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let mut entries = Vec::new();
    for (index, attachment) in post.attachments.iter().enumerate() {
        match attachment {
            Attachment::Photo { photo } => {
                let Some(size) = photo
                    .sizes
                    .iter()
                    .max_by_key(|size| size.width * size.height)
                else {
                    continue;
                };
                let file = format!("photo_{index}.jpg");
                // One failed attachment never abandons the rest.
                match download_file(http, &size.url, &dir.join(&file), max_bytes).await {
                    Ok(true) => entries.push(MediaEntry::local(
                        MediaKind::Image,
                        file,
                        Some(size.url.clone()),
                    )),
                    Ok(false) => {}
                    Err(err) => {
                        warn!(
                            target: TARGET_VK,
                            "Failed to fetch photo for {}: {:#}", post.permalink(), err
                        );
                    }
                }
            }
            Attachment::Video { video } => {
                let url = video.player.clone().unwrap_or_else(|| {
                    format!("https://vk.com/video{}_{}", video.owner_id, video.id)
                });
                entries.push(MediaEntry::remote(MediaKind::Video, url));
            }
            Attachment::Doc { doc } => {
                let Some(url) = doc.url.as_deref() else {
                    continue;
                };
                if doc.size.is_some_and(|size| size > max_bytes) {
                    warn!(
                        target: TARGET_VK,
                        "Skipping oversized document on {} ({} bytes)", post.permalink(), doc.size.unwrap_or(0)
                    );
                    continue;
                }
                let ext = doc.ext.as_deref().unwrap_or("bin");
                let file = format!("doc_{index}.{ext}");
                match download_file(http, url, &dir.join(&file), max_bytes).await {
                    Ok(true) => entries.push(MediaEntry::local(
                        crate::media::kind_for_ext(ext),
                        file,
                        Some(url.to_string()),
                    )),
                    Ok(false) => {}
                    Err(err) => {
                        warn!(
                            target: TARGET_VK,
                            "Failed to fetch document for {}: {:#}", post.permalink(), err
                        );
                    }
                }
            }
            Attachment::Other => {}
        }
    }

    if entries.is_empty() {
        return Ok(0);
    }
    write_manifest(&dir, &entries).await?;
    debug!(target: TARGET_VK, "Stored {} media entries for {}", entries.len(), post.permalink());
    Ok(entries.len())
}

/// Fetches one URL to disk. Returns false (and writes nothing) when the
/// body exceeds the size cap.
async fn download_file(
    http: &reqwest::Client,
    url: &str,
    path: &Path,
    max_bytes: i64,
) -> Result<bool> {
    let response = http
        .get(url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .with_context(|| format!("failed to fetch {url}"))?;
    let body = response.bytes().await?;
    if body.len() as i64 > max_bytes {
        warn!(target: TARGET_VK, "Skipping oversized download {} ({} bytes)", url, body.len());
        return Ok(false);
    }
    tokio::fs::write(path, &body)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaEntry, MANIFEST_FILE};
    use crate::vk::fetcher::WallPost;

    #[tokio::test]
    async fn failed_download_keeps_the_remaining_attachments() {
        let root = tempfile::tempdir().unwrap();
        // Port 9 is unassigned locally, so the photo fetch fails fast
        // without reaching the network; the video entry needs no fetch.
        let post: WallPost = serde_json::from_value(serde_json::json!({
            "id": 7,
            "owner_id": -5,
            "date": 0,
            "text": "",
            "attachments": [
                {"type": "photo", "photo": {"sizes": [
                    {"url": "http://127.0.0.1:9/p.jpg", "width": 10, "height": 10},
                ]}},
                {"type": "video", "video": {"id": 3, "owner_id": -5}},
            ],
        }))
        .unwrap();

        let http = reqwest::Client::new();
        let stored = download_post_media(&http, root.path(), &post, 1024)
            .await
            .unwrap();
        assert_eq!(stored, 1);

        let manifest = root
            .path()
            .join("vk")
            .join("-5")
            .join("7")
            .join(MANIFEST_FILE);
        let entries: Vec<MediaEntry> =
            serde_json::from_slice(&std::fs::read(manifest).unwrap()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url.as_deref(), Some("https://vk.com/video-5_3"));
    }
}
