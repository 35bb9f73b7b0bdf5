use std::path::Path;

use anyhow::{Context, Result};
use grammers_client::types::Media;
use grammers_client::Client;
use tracing::{debug, warn};

use crate::media::{kind_for_file_name, write_manifest, MediaEntry, MediaKind};
use crate::telegram::permalink;
use crate::TARGET_TG;

/// Only photos and documents are stored; webpage previews, polls, geo
/// points and the like are not post media.
pub(crate) fn is_post_media(media: &Media) -> bool {
    matches!(media, Media::Photo(_) | Media::Document(_))
}

/// Downloads one message's media into `<root>/tg/<channel>/<msg_id>/` and
/// writes the manifest. Documents with a declared size over the cap are
/// skipped up front; photo sizes are only known after download, so an
/// oversized photo is removed again.
pub(crate) async fn download_message_media(
    client: &Client,
    media_root: &Path,
    channel: &str,
    message_id: i32,
    media: &Media,
    max_bytes: i64,
) -> Result<()> {
    let (file, kind) = match media {
        Media::Photo(photo) => (format!("photo_{}.jpg", photo.id()), MediaKind::Image),
        Media::Document(document) => {
            if document.size() > max_bytes {
                warn!(
                    target: TARGET_TG,
                    "Skipping oversized document on {} ({} bytes)",
                    permalink(channel, message_id),
                    document.size()
                );
                return Ok(());
            }
            let name = document.name();
            let file = if name.is_empty() {
                format!("doc_{}.bin", document.id())
            } else {
                sanitize_file_name(name)
            };
            let kind = kind_for_file_name(&file);
            (file, kind)
        }
        _ => return Ok(()),
    };

    let dir = media_root
        .join("tg")
        .join(channel)
        .join(message_id.to_string());
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let path = dir.join(&file);
    let downloadable = grammers_client::types::Downloadable::Media(media.clone());
    client
        .download_media(&downloadable, &path)
        .await
        .with_context(|| format!("failed to download media for {}", permalink(channel, message_id)))?;

    let metadata = tokio::fs::metadata(&path).await?;
    if metadata.len() as i64 > max_bytes {
        warn!(
            target: TARGET_TG,
            "Removing oversized download {} ({} bytes)", path.display(), metadata.len()
        );
        if let Err(err) = tokio::fs::remove_file(&path).await {
            warn!(target: TARGET_TG, "Failed to remove {}: {}", path.display(), err);
        }
        return Ok(());
    }

    write_manifest(&dir, &[MediaEntry::local(kind, file, None)]).await?;
    debug!(target: TARGET_TG, "Stored media for {}", permalink(channel, message_id));
    Ok(())
}

/// Server-supplied file names go straight onto disk, so path separators
/// and parent references are stripped.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|character| match character {
            '/' | '\\' | '\0' => '_',
            character => character,
        })
        .collect();
    if cleaned == "." || cleaned == ".." || cleaned.is_empty() {
        "file.bin".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name(".."), "file.bin");
        assert_eq!(sanitize_file_name(""), "file.bin");
    }
}
