//! Media items as they move through the backup pipeline, and the
//! time-limited download URLs attached to them.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Download URLs handed out by the catalog stay valid for about an hour.
pub const URL_TTL: Duration = Duration::from_secs(60 * 60);

/// Stop using a URL this long before the server would reject it.
const MAX_EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn from_mime_type(mime_type: &str) -> Self {
        if mime_type.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Photo
        }
    }

    /// Extension used when neither the filename nor the MIME type tells us one.
    pub fn default_extension(self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

/// A direct download URL together with the moment it was issued.
///
/// Staleness is decided up front with [`ResolvedUrl::is_expired`] rather than
/// discovered from a 403 halfway through a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    url: String,
    resolved_at: Instant,
    ttl: Duration,
}

impl ResolvedUrl {
    pub fn new(url: impl Into<String>, resolved_at: Instant) -> Self {
        Self {
            url: url.into(),
            resolved_at,
            ttl: URL_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.resolved_at)
    }

    /// True once the URL is inside its safety margin (a twelfth of the TTL,
    /// capped at five minutes) or past its TTL.
    pub fn is_expired(&self, now: Instant) -> bool {
        let margin = (self.ttl / 12).min(MAX_EXPIRY_MARGIN);
        self.age(now).saturating_add(margin) >= self.ttl
    }
}

/// One remote photo or video.
///
/// Everything except the download URL is fixed once the catalog hands the
/// item over; the URL is replaced whenever the resolver issues a fresh one.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub id: String,
    pub kind: MediaKind,
    pub capture_time: Option<DateTime<Utc>>,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub reported_size: Option<u64>,
    url: Option<ResolvedUrl>,
}

impl MediaItem {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            capture_time: None,
            filename: None,
            mime_type: None,
            reported_size: None,
            url: None,
        }
    }

    pub fn with_capture_time(mut self, capture_time: DateTime<Utc>) -> Self {
        self.capture_time = Some(capture_time);
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_reported_size(mut self, size: u64) -> Self {
        self.reported_size = Some(size);
        self
    }

    pub fn with_url(mut self, url: ResolvedUrl) -> Self {
        self.url = Some(url);
        self
    }

    pub fn url(&self) -> Option<&ResolvedUrl> {
        self.url.as_ref()
    }

    /// The current URL, unless it is missing or already expired at `now`.
    pub fn fresh_url(&self, now: Instant) -> Option<&ResolvedUrl> {
        self.url.as_ref().filter(|u| !u.is_expired(now))
    }

    pub(crate) fn set_url(&mut self, url: ResolvedUrl) {
        self.url = Some(url);
    }

    /// Forget the current URL so the next attempt has to resolve again.
    pub(crate) fn invalidate_url(&mut self) {
        self.url = None;
    }
}
