use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::resolver::ResolveError;

/// Conditions that end the whole run rather than a single item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunFatal {
    #[error("authentication expired: re-authenticate and resume")]
    AuthExpired,

    #[error("local storage failure: {0}")]
    Storage(String),
}

/// Why an item ended up failed. The display strings are what the summary
/// reports for each failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("NotFound")]
    NotFound,

    #[error("Gone")]
    Gone,

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("placement failed: {0}")]
    Placement(String),

    #[error("run aborted: {0}")]
    RunAborted(String),
}

/// How the scheduler should react to a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Try again after backoff, with a freshly resolved URL.
    Retryable,
    ItemFatal(FailureReason),
    RunFatal(RunFatal),
}

/// Typed errors from a single fetch attempt, classified by [`FetchError::classify`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// 401/403 from the CDN: the link expired or was revoked.
    #[error("download link refused (HTTP {0})")]
    LinkRefused(u16),

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("transfer failed after {bytes_written} bytes: {source}")]
    Transfer {
        source: reqwest::Error,
        bytes_written: u64,
    },

    /// Fewer (or more) bytes arrived than the response announced.
    #[error("body length mismatch: announced {expected} bytes, received {written}")]
    Truncated { expected: u64, written: u64 },

    #[error("could not resolve download URL: {0}")]
    Resolve(#[from] ResolveError),

    #[error("disk error on {}: {source}", path.display())]
    Disk { path: PathBuf, source: io::Error },
}

impl FetchError {
    pub fn disk(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FetchError::Disk {
            path: path.into(),
            source,
        }
    }

    pub fn classify(&self) -> ErrorClass {
        match self {
            FetchError::LinkRefused(_) => ErrorClass::Retryable,
            FetchError::HttpStatus(status) => classify_status(*status),
            FetchError::Transfer { .. } => ErrorClass::Retryable,
            FetchError::Truncated { .. } => ErrorClass::Retryable,
            FetchError::Resolve(e) => match e {
                ResolveError::AuthExpired => ErrorClass::RunFatal(RunFatal::AuthExpired),
                ResolveError::NotFound => ErrorClass::ItemFatal(FailureReason::NotFound),
                ResolveError::Rejected(status) => {
                    ErrorClass::ItemFatal(FailureReason::HttpStatus(*status))
                }
                ResolveError::Transient(_) => ErrorClass::Retryable,
            },
            FetchError::Disk { path, source } => ErrorClass::RunFatal(RunFatal::Storage(format!(
                "{}: {}",
                path.display(),
                source
            ))),
        }
    }
}

/// Classify a non-success status from the download host.
fn classify_status(status: u16) -> ErrorClass {
    match status {
        401 | 403 => ErrorClass::Retryable,
        404 => ErrorClass::ItemFatal(FailureReason::NotFound),
        410 => ErrorClass::ItemFatal(FailureReason::Gone),
        408 | 429 => ErrorClass::Retryable,
        s if s >= 500 => ErrorClass::Retryable,
        s => ErrorClass::ItemFatal(FailureReason::HttpStatus(s)),
    }
}

/// Errors from filing a downloaded file into the backup tree.
#[derive(Debug, Error)]
pub enum PlaceError {
    #[error("I/O error at {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("staged copy {} has {actual} bytes, expected {expected}", path.display())]
    StagingMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("no free file name for {filename} after {tried} candidates")]
    NoFreeName { filename: String, tried: usize },
}

impl PlaceError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PlaceError::Io {
            path: path.into(),
            source,
        }
    }

    /// Out of space or a read-only destination: nothing else will fit either.
    pub fn is_storage_failure(&self) -> bool {
        match self {
            PlaceError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::StorageFull | io::ErrorKind::ReadOnlyFilesystem
            ),
            _ => false,
        }
    }
}
