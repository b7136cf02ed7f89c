use thiserror::Error;

use super::item::{MediaItem, ResolvedUrl};

/// Why a fresh download URL could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The bearer credential was refused. Not retryable here; aborts the run.
    #[error("authentication expired")]
    AuthExpired,

    /// The item no longer exists upstream.
    #[error("item not found upstream")]
    NotFound,

    /// The catalog refused the lookup for another reason.
    #[error("catalog rejected the lookup (HTTP {0})")]
    Rejected(u16),

    /// Network failure, 5xx or rate limiting. Worth another attempt.
    #[error("transient resolution failure: {0}")]
    Transient(String),
}

/// Source of time-limited direct download URLs.
///
/// Implemented by the catalog client; tests substitute a resolver that points
/// at a local server.
#[async_trait::async_trait]
pub trait UrlResolver: Send + Sync {
    async fn resolve(&self, item: &MediaItem) -> Result<ResolvedUrl, ResolveError>;
}
