//! One HTTP GET-to-file transfer per attempt.
//!
//! Bodies stream into a uniquely named `.part` file in the scratch directory,
//! never the final path, with an incremental SHA-256 computed on the way so
//! the organizer can compare content without re-reading the download.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::{ErrorClass, FailureReason, FetchError, RunFatal};
use super::item::ResolvedUrl;
use super::paths::fingerprint;
use super::progress::ProgressTracker;
use super::resolver::UrlResolver;
use super::task::DownloadTask;

const PART_EXTENSION: &str = "part";

/// A complete download sitting in the scratch directory.
///
/// Owned by exactly one component at a time; dropping it deletes the file, so
/// a temp file that is never placed cannot outlive its owner.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    len: u64,
    sha256: [u8; 32],
}

impl TempFile {
    pub(crate) fn new(path: PathBuf, len: u64, sha256: [u8; 32]) -> Self {
        Self { path, len, sha256 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn sha256(&self) -> &[u8; 32] {
        &self.sha256
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        // Already gone once the organizer has renamed it into place.
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Non-retryable result of an attempt, split by scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fatal {
    Item(FailureReason),
    Run(RunFatal),
}

/// Structured result of one fetch attempt.
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(TempFile),
    /// Worth another attempt; the next one resolves a fresh URL.
    Retryable(FetchError),
    Fatal(Fatal),
    Cancelled,
}

impl FetchOutcome {
    fn from_error(error: FetchError) -> Self {
        match error.classify() {
            ErrorClass::Retryable => FetchOutcome::Retryable(error),
            ErrorClass::ItemFatal(reason) => FetchOutcome::Fatal(Fatal::Item(reason)),
            ErrorClass::RunFatal(fatal) => FetchOutcome::Fatal(Fatal::Run(fatal)),
        }
    }
}

pub struct FetchWorker {
    client: Client,
    resolver: Arc<dyn UrlResolver>,
    scratch_dir: PathBuf,
    tracker: Arc<ProgressTracker>,
}

impl FetchWorker {
    pub fn new(
        client: Client,
        resolver: Arc<dyn UrlResolver>,
        scratch_dir: PathBuf,
        tracker: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            client,
            resolver,
            scratch_dir,
            tracker,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Run one attempt for `task`. The partial file is removed and its bytes
    /// rolled back on every outcome other than `Fetched`.
    pub async fn fetch(&self, task: &mut DownloadTask, cancel: &CancellationToken) -> FetchOutcome {
        if cancel.is_cancelled() {
            return FetchOutcome::Cancelled;
        }

        let url = match self.ensure_url(task, cancel).await {
            Ok(Some(url)) => url,
            Ok(None) => return FetchOutcome::Cancelled,
            Err(e) => return FetchOutcome::from_error(e),
        };

        let part_path = self.scratch_dir.join(format!(
            "{}-{}.{}",
            fingerprint(&task.item.id),
            Uuid::new_v4().simple(),
            PART_EXTENSION
        ));

        let result = self.stream_to_file(&url, &part_path, task, cancel).await;
        if !matches!(result, Ok(Some(_))) {
            let _ = fs::remove_file(&part_path).await;
            self.tracker.remove_bytes(task.bytes_transferred);
        }
        match result {
            Ok(Some(temp)) => FetchOutcome::Fetched(temp),
            Ok(None) => FetchOutcome::Cancelled,
            Err(e) => {
                tracing::debug!(item = %task.item.id, error = %e, "fetch attempt failed");
                FetchOutcome::from_error(e)
            }
        }
    }

    /// Reuse the item's URL while it is fresh, otherwise ask the resolver.
    async fn ensure_url(
        &self,
        task: &mut DownloadTask,
        cancel: &CancellationToken,
    ) -> Result<Option<ResolvedUrl>, FetchError> {
        if let Some(url) = task.item.fresh_url(Instant::now()) {
            return Ok(Some(url.clone()));
        }
        tracing::debug!(item = %task.item.id, "resolving download URL");
        let resolved = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            r = self.resolver.resolve(&task.item) => r?,
        };
        task.item.set_url(resolved.clone());
        Ok(Some(resolved))
    }

    /// Stream the body to `part_path`. `Ok(None)` means cancelled mid-transfer.
    async fn stream_to_file(
        &self,
        url: &ResolvedUrl,
        part_path: &Path,
        task: &mut DownloadTask,
        cancel: &CancellationToken,
    ) -> Result<Option<TempFile>, FetchError> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            r = self.client.get(url.as_str()).send() => r.map_err(|e| FetchError::Transfer {
                source: e,
                bytes_written: 0,
            })?,
        };

        let status = response.status().as_u16();
        if matches!(status, 401 | 403) {
            return Err(FetchError::LinkRefused(status));
        }
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(status));
        }
        let content_length = response.content_length();

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(part_path)
            .await
            .map_err(|e| FetchError::disk(part_path, e))?;

        // Incremental SHA256, avoids buffering large videos in memory.
        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| {
                tracing::warn!(
                    "Body error for {} (status={}, content_length={:?}, bytes_so_far={}): {}",
                    task.item.id,
                    status,
                    content_length,
                    task.bytes_transferred,
                    e
                );
                FetchError::Transfer {
                    source: e,
                    bytes_written: task.bytes_transferred,
                }
            })?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::disk(part_path, e))?;
            task.bytes_transferred += chunk.len() as u64;
            self.tracker.add_bytes(chunk.len() as u64);
        }
        file.flush().await.map_err(|e| FetchError::disk(part_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| FetchError::disk(part_path, e))?;
        drop(file);

        let written = task.bytes_transferred;
        if let Some(expected) = content_length {
            if expected != written {
                return Err(FetchError::Truncated { expected, written });
            }
        }
        if let Some(reported) = task.item.reported_size {
            if reported != written {
                tracing::warn!(
                    item = %task.item.id,
                    reported,
                    written,
                    "size mismatch against catalog, keeping the served bytes"
                );
            }
        }

        Ok(Some(TempFile::new(
            part_path.to_path_buf(),
            written,
            hasher.finalize().into(),
        )))
    }
}

/// Delete `*.part` files left behind by an interrupted run. Returns how many
/// were removed.
pub async fn sweep_stale_parts(scratch_dir: &Path) -> std::io::Result<usize> {
    let mut entries = match fs::read_dir(scratch_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(PART_EXTENSION) {
            continue;
        }
        match fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Could not remove stale {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}
