//! Library API media item JSON and its conversion into pipeline items.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::backup::item::{MediaItem, MediaKind, ResolvedUrl};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMediaItem {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub media_metadata: MediaMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    #[serde(default)]
    pub creation_time: Option<String>,
    #[serde(default)]
    pub video: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMediaItemsResponse {
    #[serde(default)]
    pub media_items: Vec<RawMediaItem>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl RawMediaItem {
    pub fn kind(&self) -> MediaKind {
        if self.media_metadata.video.is_some() {
            return MediaKind::Video;
        }
        self.mime_type
            .as_deref()
            .map_or(MediaKind::Photo, MediaKind::from_mime_type)
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.media_metadata
            .creation_time
            .as_deref()
            .and_then(parse_creation_time)
    }

    /// Original-quality download URL: `=d` for photos, `=dv` for videos.
    pub fn download_url(&self) -> Option<String> {
        let base = self.base_url.as_deref().filter(|b| !b.is_empty())?;
        Some(match self.kind() {
            MediaKind::Photo => format!("{}=d", base),
            MediaKind::Video => format!("{}=dv", base),
        })
    }

    /// `fetched_at` is when the response carrying this item arrived; the
    /// base URL's lifetime counts from then.
    pub fn into_media_item(self, fetched_at: Instant) -> MediaItem {
        let kind = self.kind();
        let capture_time = self.creation_time();
        let url = self.download_url();
        let mut item = MediaItem::new(self.id, kind);
        if let Some(t) = capture_time {
            item = item.with_capture_time(t);
        }
        if let Some(name) = self.filename {
            item = item.with_filename(name);
        }
        if let Some(mime) = self.mime_type {
            item = item.with_mime_type(mime);
        }
        if let Some(url) = url {
            item = item.with_url(ResolvedUrl::new(url, fetched_at));
        }
        item
    }
}

/// RFC 3339 creation time; anything unparsable means "unknown date".
pub fn parse_creation_time(s: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            tracing::debug!("Unparsable creationTime {:?}: {}", s, e);
            None
        }
    }
}
