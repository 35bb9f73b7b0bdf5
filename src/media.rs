//! Per-article media manifests.
//!
//! Every article directory under the media root gets a `media.json` file
//! describing the attachments that were downloaded (or, for embeds like VK
//! videos, where they live remotely). The manifest is written once at
//! ingestion and read later by the media-serving layer.

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MANIFEST_FILE: &str = "media.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    File,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaEntry {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    /// Local file name inside the article's media directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Remote page or embed URL for media that is not downloaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl MediaEntry {
    pub fn local(kind: MediaKind, file: String, source_url: Option<String>) -> Self {
        MediaEntry {
            kind,
            file: Some(file),
            url: None,
            source_url,
        }
    }

    pub fn remote(kind: MediaKind, url: String) -> Self {
        MediaEntry {
            kind,
            file: None,
            url: Some(url.clone()),
            source_url: Some(url),
        }
    }
}

pub fn kind_for_ext(ext: &str) -> MediaKind {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "webp" => MediaKind::Image,
        "mp4" | "mov" | "mkv" | "webm" => MediaKind::Video,
        _ => MediaKind::File,
    }
}

pub fn kind_for_file_name(name: &str) -> MediaKind {
    match name.rsplit_once('.') {
        Some((_, ext)) => kind_for_ext(ext),
        None => MediaKind::File,
    }
}

pub async fn write_manifest(dir: &Path, entries: &[MediaEntry]) -> anyhow::Result<()> {
    let payload = serde_json::to_vec_pretty(entries)?;
    tokio::fs::write(dir.join(MANIFEST_FILE), payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_mapping() {
        assert_eq!(kind_for_ext("JPG"), MediaKind::Image);
        assert_eq!(kind_for_ext("webm"), MediaKind::Video);
        assert_eq!(kind_for_ext("pdf"), MediaKind::File);
        assert_eq!(kind_for_file_name("photo_12.jpeg"), MediaKind::Image);
        assert_eq!(kind_for_file_name("noext"), MediaKind::File);
    }

    #[tokio::test]
    async fn manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            MediaEntry::local(
                MediaKind::Image,
                "photo_1.jpg".to_string(),
                Some("https://example.com/p.jpg".to_string()),
            ),
            MediaEntry::remote(MediaKind::Video, "https://vk.com/video-1_2".to_string()),
        ];
        write_manifest(dir.path(), &entries).await.unwrap();

        let raw = std::fs::read(dir.path().join(MANIFEST_FILE)).unwrap();
        let parsed: Vec<MediaEntry> = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].kind, MediaKind::Image);
        assert_eq!(parsed[0].file.as_deref(), Some("photo_1.jpg"));
        assert_eq!(parsed[1].kind, MediaKind::Video);
        assert!(parsed[1].file.is_none());
        assert_eq!(parsed[1].url.as_deref(), Some("https://vk.com/video-1_2"));
    }
}
