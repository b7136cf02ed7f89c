//! Backup engine: fetches a batch of remote media items under bounded
//! concurrency and files each one into a `<root>/<YYYY>/<MM>/` tree.
//!
//! [`BackupRun`] owns one run. It builds the queue, hands it to the
//! [`scheduler::Scheduler`], and turns the per-task reports into a
//! [`summary::RunSummary`]. The engine only sees items and a
//! [`resolver::UrlResolver`]; it knows nothing about the catalog behind them.

pub mod error;
pub mod fetch;
pub mod item;
pub mod organize;
pub mod paths;
pub mod progress;
pub mod resolver;
pub mod scheduler;
pub mod summary;
pub mod task;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use self::fetch::FetchWorker;
use self::item::MediaItem;
use self::organize::Organizer;
use self::progress::ProgressTracker;
use self::resolver::UrlResolver;
use self::scheduler::Scheduler;
use self::summary::RunSummary;
use self::task::DownloadTask;
use crate::retry::RetryConfig;

/// Subset of application config consumed by the backup engine.
/// Decoupled from CLI parsing so the engine can be tested independently.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub root: PathBuf,
    pub scratch_dir: PathBuf,
    pub concurrency: usize,
    pub retry: RetryConfig,
    /// Connect timeout and per-read timeout for downloads.
    pub request_timeout: Duration,
    pub no_progress_bar: bool,
}

pub struct BackupRun {
    config: BackupConfig,
    client: Client,
    resolver: Arc<dyn UrlResolver>,
    tracker: Arc<ProgressTracker>,
}

impl BackupRun {
    pub fn new(config: BackupConfig, resolver: Arc<dyn UrlResolver>) -> Result<Self> {
        // No overall timeout: large videos legitimately take a long time, so
        // only stalls are bounded.
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .read_timeout(config.request_timeout)
            .build()
            .context("Failed to build download HTTP client")?;
        Ok(Self {
            config,
            client,
            resolver,
            tracker: Arc::new(ProgressTracker::new()),
        })
    }

    /// Live progress for this run; poll [`ProgressTracker::snapshot`].
    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.tracker)
    }

    /// Back up `items`, returning once every item reached a terminal outcome
    /// or the run was stopped. A run-level failure still yields a summary,
    /// with `aborted` set.
    pub async fn execute(
        self,
        items: Vec<MediaItem>,
        shutdown: CancellationToken,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let config = &self.config;

        tokio::fs::create_dir_all(&config.root)
            .await
            .with_context(|| format!("Failed to create {}", config.root.display()))?;
        tokio::fs::create_dir_all(&config.scratch_dir)
            .await
            .with_context(|| format!("Failed to create {}", config.scratch_dir.display()))?;
        let swept = fetch::sweep_stale_parts(&config.scratch_dir)
            .await
            .with_context(|| format!("Failed to clean {}", config.scratch_dir.display()))?;
        if swept > 0 {
            tracing::info!("Removed {} stale partial downloads", swept);
        }

        let tasks = self.build_queue(items);
        tracing::info!(
            "Backing up {} items to {} (concurrency: {})",
            tasks.len(),
            config.root.display(),
            config.concurrency
        );

        let cancel = shutdown.child_token();
        let pb = progress::create_progress_bar(config.no_progress_bar, tasks.len() as u64);
        let stop_reporter = CancellationToken::new();
        let reporter = progress::spawn_reporter(
            Arc::clone(&self.tracker),
            pb.clone(),
            stop_reporter.clone(),
        );

        let worker = FetchWorker::new(
            self.client.clone(),
            Arc::clone(&self.resolver),
            config.scratch_dir.clone(),
            Arc::clone(&self.tracker),
        );
        let organizer = Organizer::new(config.root.clone());
        let scheduler = Scheduler {
            worker: &worker,
            organizer: &organizer,
            tracker: &self.tracker,
            retry: config.retry,
            concurrency: config.concurrency,
            cancel: cancel.clone(),
            pb: pb.clone(),
        };
        let reports = scheduler.run(tasks).await;

        let undispatched = self.tracker.cancel_pending();
        stop_reporter.cancel();
        if let Err(e) = reporter.await {
            tracing::debug!("Progress reporter ended abnormally: {}", e);
        }
        pb.finish_and_clear();

        let mut summary = RunSummary::from_reports(reports, undispatched);
        summary.interrupted = shutdown.is_cancelled() && summary.aborted.is_none();
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    /// One task per distinct item id, in input order.
    fn build_queue(&self, items: Vec<MediaItem>) -> Vec<DownloadTask> {
        let mut seen = HashSet::with_capacity(items.len());
        items
            .into_iter()
            .filter(|item| {
                if !seen.insert(item.id.clone()) {
                    tracing::warn!("Duplicate item id {} in input, ignoring", item.id);
                    return false;
                }
                self.tracker.register(&item.id, item.reported_size);
                true
            })
            .map(DownloadTask::new)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::error::{FailureReason, RunFatal};
    use super::item::MediaKind;
    use super::resolver::ResolveError;
    use super::*;
    use crate::test_support::{Route, StaticResolver, TestServer};
    use chrono::{TimeZone, Utc};
    use std::path::Path;

    fn config(root: &Path, concurrency: usize) -> BackupConfig {
        BackupConfig {
            root: root.to_path_buf(),
            scratch_dir: root.join(".gphotos-tmp"),
            concurrency,
            retry: RetryConfig::immediate(3),
            request_timeout: Duration::from_secs(10),
            no_progress_bar: true,
        }
    }

    fn body(i: usize) -> Vec<u8> {
        format!("contents of item {} {}", i, "x".repeat(i * 7)).into_bytes()
    }

    fn photo(id: &str) -> MediaItem {
        MediaItem::new(id, MediaKind::Photo)
    }

    // Spawned so the run's future lives on the heap rather than the test
    // thread's stack.
    async fn execute(
        config: BackupConfig,
        resolver: Arc<StaticResolver>,
        items: Vec<MediaItem>,
        shutdown: CancellationToken,
    ) -> RunSummary {
        let run = BackupRun::new(config, resolver).unwrap();
        tokio::spawn(run.execute(items, shutdown))
            .await
            .unwrap()
            .unwrap()
    }

    fn files_under(dir: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return out;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                out.extend(files_under(&path));
            } else {
                out.push(path);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_one_missing_item_fails_rest_succeed() {
        let server = TestServer::start();
        let root = tempfile::tempdir().unwrap();
        let mut items = Vec::new();
        let mut expected_bytes = 0;
        for i in 1..=10 {
            let id = i.to_string();
            if i == 5 {
                server.route("/media/5", Route::Status(404));
            } else {
                server.route(&format!("/media/{id}"), Route::Body(body(i)));
                expected_bytes += body(i).len() as u64;
            }
            items.push(photo(&id));
        }
        let resolver = Arc::new(StaticResolver::new(server.base_url()));

        let summary = execute(
            config(root.path(), 2),
            resolver,
            items,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.succeeded, 9);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].item_id, "5");
        assert_eq!(summary.failures[0].reason, FailureReason::NotFound);
        assert_eq!(summary.failures[0].reason.to_string(), "NotFound");
        assert_eq!(summary.bytes_transferred, expected_bytes);
        assert_eq!(server.hits("/media/5"), 1);
        for i in (1..=10).filter(|&i| i != 5) {
            let placed = root.path().join(format!("unknown/{i}.jpg"));
            assert_eq!(std::fs::read(placed).unwrap(), body(i));
        }
    }

    #[tokio::test]
    async fn test_rerun_downloads_nothing() {
        let server = TestServer::start();
        let root = tempfile::tempdir().unwrap();
        let when = Utc.with_ymd_and_hms(2021, 12, 31, 23, 0, 0).unwrap();
        let items: Vec<MediaItem> = (1..=4)
            .map(|i| {
                server.route(&format!("/media/{i}"), Route::Body(body(i)));
                photo(&i.to_string())
                    .with_filename(format!("IMG_{i}.JPG"))
                    .with_capture_time(when)
            })
            .collect();
        let resolver = Arc::new(StaticResolver::new(server.base_url()));

        let first = execute(
            config(root.path(), 2),
            Arc::clone(&resolver),
            items.clone(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(first.succeeded, 4);
        assert!(root.path().join("2021/12/IMG_1.JPG").is_file());
        let hits = server.total_hits();

        let second = execute(
            config(root.path(), 2),
            resolver,
            items,
            CancellationToken::new(),
        )
        .await;
        assert_eq!(second.skipped_duplicate, 4);
        assert_eq!(second.succeeded, 0);
        assert_eq!(second.bytes_transferred, 0);
        assert_eq!(server.total_hits(), hits);
        assert!(second.is_complete());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let server = TestServer::start();
        let root = tempfile::tempdir().unwrap();
        let items: Vec<MediaItem> = (1..=8)
            .map(|i| {
                server.route(
                    &format!("/media/{i}"),
                    Route::Slow {
                        body: body(i),
                        delay: Duration::from_millis(150),
                    },
                );
                photo(&i.to_string())
            })
            .collect();
        let resolver = Arc::new(StaticResolver::new(server.base_url()));

        let summary = execute(
            config(root.path(), 2),
            resolver,
            items,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.succeeded, 8);
        assert!(server.peak_concurrency() <= 2, "peak {}", server.peak_concurrency());
        assert!(server.peak_concurrency() >= 1);
    }

    #[tokio::test]
    async fn test_expired_link_is_reresolved_once() {
        let server = TestServer::start();
        let root = tempfile::tempdir().unwrap();
        server.route(
            "/media/a",
            Route::FailFirst {
                status: 403,
                times: 1,
                body: b"fresh bytes".to_vec(),
            },
        );
        let resolver = Arc::new(StaticResolver::new(server.base_url()));

        let summary = execute(
            config(root.path(), 1),
            Arc::clone(&resolver),
            vec![photo("a")],
            CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(resolver.calls("a"), 2);
        assert_eq!(server.hits("/media/a"), 2);
        assert_eq!(
            std::fs::read(root.path().join("unknown/a.jpg")).unwrap(),
            b"fresh bytes"
        );
    }

    #[tokio::test]
    async fn test_existing_identical_file_is_skipped() {
        let server = TestServer::start();
        let root = tempfile::tempdir().unwrap();
        let mut expected_bytes = 0;
        let items: Vec<MediaItem> = (1..=4)
            .map(|i| {
                server.route(&format!("/media/{i}"), Route::Body(body(i)));
                if i != 3 {
                    expected_bytes += body(i).len() as u64;
                }
                photo(&i.to_string())
            })
            .collect();
        std::fs::create_dir_all(root.path().join("unknown")).unwrap();
        std::fs::write(root.path().join("unknown/3.jpg"), body(3)).unwrap();
        let resolver = Arc::new(StaticResolver::new(server.base_url()));

        let summary = execute(
            config(root.path(), 2),
            resolver,
            items,
            CancellationToken::new(),
        )
        .await;

        // Fetched to compare content, then discarded.
        assert_eq!(server.hits("/media/3"), 1);
        assert_eq!(summary.skipped_duplicate, 1);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.bytes_transferred, expected_bytes);
        assert_eq!(files_under(&root.path().join("unknown")).len(), 4);
        assert_eq!(
            std::fs::read(root.path().join("unknown/3.jpg")).unwrap(),
            body(3)
        );
    }

    #[tokio::test]
    async fn test_same_name_without_sizes_both_kept() {
        let server = TestServer::start();
        let root = tempfile::tempdir().unwrap();
        let when = Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap();
        server.route("/media/x1", Route::Body(b"abc".to_vec()));
        server.route("/media/x2", Route::Body(b"defg".to_vec()));
        let items = vec![
            photo("x1").with_filename("IMG.JPG").with_capture_time(when),
            photo("x2").with_filename("IMG.JPG").with_capture_time(when),
        ];
        let resolver = Arc::new(StaticResolver::new(server.base_url()));

        let first = execute(
            config(root.path(), 1),
            Arc::clone(&resolver),
            items.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(first.succeeded, 2);
        assert_eq!(first.skipped_duplicate, 0);
        assert_eq!(server.hits("/media/x2"), 1);
        let dir = root.path().join("2022/03");
        assert_eq!(std::fs::read(dir.join("IMG.JPG")).unwrap(), b"abc");
        assert_eq!(std::fs::read(dir.join("IMG-1.JPG")).unwrap(), b"defg");

        let second = execute(
            config(root.path(), 1),
            resolver,
            items,
            CancellationToken::new(),
        )
        .await;
        assert_eq!(second.skipped_duplicate, 2);
        assert_eq!(server.total_hits(), 2);
        assert_eq!(files_under(&dir).len(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_with_fresh_url() {
        let server = TestServer::start();
        let root = tempfile::tempdir().unwrap();
        server.route(
            "/media/a",
            Route::FailFirst {
                status: 503,
                times: 2,
                body: b"third time".to_vec(),
            },
        );
        let resolver = Arc::new(StaticResolver::new(server.base_url()));

        let summary = execute(
            config(root.path(), 1),
            Arc::clone(&resolver),
            vec![photo("a")],
            CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(server.hits("/media/a"), 3);
        assert_eq!(resolver.calls("a"), 3);
    }

    /// Turns the scratch directory into a plain file when `trigger` is
    /// resolved, so the next part file cannot be created.
    struct BreakScratchOn {
        inner: StaticResolver,
        trigger: &'static str,
        scratch: PathBuf,
    }

    #[async_trait::async_trait]
    impl UrlResolver for BreakScratchOn {
        async fn resolve(
            &self,
            item: &MediaItem,
        ) -> Result<item::ResolvedUrl, ResolveError> {
            if item.id == self.trigger {
                std::fs::remove_dir_all(&self.scratch).unwrap();
                std::fs::write(&self.scratch, b"not a directory").unwrap();
            }
            self.inner.resolve(item).await
        }
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_run() {
        let server = TestServer::start();
        let root = tempfile::tempdir().unwrap();
        for id in ["a", "b", "c", "d"] {
            server.route(&format!("/media/{id}"), Route::Body(id.as_bytes().to_vec()));
        }
        let cfg = config(root.path(), 1);
        let resolver = Arc::new(BreakScratchOn {
            inner: StaticResolver::new(server.base_url()),
            trigger: "b",
            scratch: cfg.scratch_dir.clone(),
        });
        let items = ["a", "b", "c", "d"].map(photo).to_vec();

        let run = BackupRun::new(cfg, resolver).unwrap();
        let summary = tokio::spawn(run.execute(items, CancellationToken::new()))
            .await
            .unwrap()
            .unwrap();

        assert!(
            matches!(summary.aborted, Some(RunFatal::Storage(_))),
            "aborted: {:?}",
            summary.aborted
        );
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].item_id, "b");
        assert!(matches!(
            summary.failures[0].reason,
            FailureReason::RunAborted(_)
        ));
        assert_eq!(summary.cancelled, 2);
        assert!(!summary.interrupted);
        assert_eq!(server.hits("/media/c") + server.hits("/media/d"), 0);
        assert_eq!(std::fs::read(root.path().join("unknown/a.jpg")).unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_auth_expiry_aborts_run() {
        let server = TestServer::start();
        let root = tempfile::tempdir().unwrap();
        for id in ["a", "b", "c", "d"] {
            server.route(&format!("/media/{id}"), Route::Body(id.as_bytes().to_vec()));
        }
        let resolver = Arc::new(StaticResolver::new(server.base_url()));
        resolver.fail("b", ResolveError::AuthExpired);
        let items = ["a", "b", "c", "d"].map(photo).to_vec();

        let summary = execute(
            config(root.path(), 1),
            resolver,
            items,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.aborted, Some(RunFatal::AuthExpired));
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 2);
        assert!(!summary.interrupted);
        assert!(!summary.is_complete());
        assert_eq!(server.hits("/media/c") + server.hits("/media/d"), 0);
        assert!(root.path().join("unknown/a.jpg").is_file());
    }

    #[tokio::test]
    async fn test_same_name_different_content_both_kept() {
        let server = TestServer::start();
        let root = tempfile::tempdir().unwrap();
        let when = Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap();
        server.route("/media/x1", Route::Body(b"abc".to_vec()));
        server.route("/media/x2", Route::Body(b"defg".to_vec()));
        let items = vec![
            photo("x1")
                .with_filename("IMG.JPG")
                .with_capture_time(when)
                .with_reported_size(3),
            photo("x2")
                .with_filename("IMG.JPG")
                .with_capture_time(when)
                .with_reported_size(4),
        ];
        let resolver = Arc::new(StaticResolver::new(server.base_url()));

        let summary = execute(
            config(root.path(), 1),
            resolver,
            items,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.succeeded, 2);
        let dir = root.path().join("2022/03");
        let mut contents = vec![
            std::fs::read(dir.join("IMG.JPG")).unwrap(),
            std::fs::read(dir.join("IMG-1.JPG")).unwrap(),
        ];
        contents.sort();
        assert_eq!(contents, vec![b"abc".to_vec(), b"defg".to_vec()]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_dropped() {
        let server = TestServer::start();
        let root = tempfile::tempdir().unwrap();
        server.route("/media/a", Route::Body(b"a".to_vec()));
        let resolver = Arc::new(StaticResolver::new(server.base_url()));

        let summary = execute(
            config(root.path(), 2),
            resolver,
            vec![photo("a"), photo("a")],
            CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.total(), 1);
        assert_eq!(server.hits("/media/a"), 1);
    }

    #[tokio::test]
    async fn test_interrupted_transfer_leaves_no_files() {
        let server = TestServer::start();
        let root = tempfile::tempdir().unwrap();
        server.route("/media/a", Route::Stall(b"half a photo".to_vec()));
        let resolver = Arc::new(StaticResolver::new(server.base_url()));
        let cfg = config(root.path(), 1);
        let scratch = cfg.scratch_dir.clone();
        let shutdown = CancellationToken::new();

        let run = BackupRun::new(cfg, resolver).unwrap();
        let tracker = run.progress();
        let handle = tokio::spawn(run.execute(vec![photo("a"), photo("b")], shutdown.clone()));

        // Wait until bytes are streaming into scratch.
        let deadline = Instant::now() + Duration::from_secs(5);
        while tracker.snapshot().bytes_done == 0 {
            assert!(Instant::now() < deadline, "transfer never started");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let parts = files_under(&scratch);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].extension().unwrap(), "part");
        assert!(!root.path().join("unknown").exists());

        shutdown.cancel();
        let summary = handle.await.unwrap().unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.cancelled, 2);
        assert_eq!(summary.succeeded, 0);
        assert!(files_under(&scratch).is_empty());
        assert!(!root.path().join("unknown").exists());
        assert_eq!(tracker.snapshot().bytes_done, 0);
    }

    #[tokio::test]
    async fn test_stale_parts_are_swept() {
        let root = tempfile::tempdir().unwrap();
        let cfg = config(root.path(), 1);
        std::fs::create_dir_all(&cfg.scratch_dir).unwrap();
        std::fs::write(cfg.scratch_dir.join("old-1234.part"), b"junk").unwrap();
        let resolver = Arc::new(StaticResolver::new("http://127.0.0.1:1"));
        let scratch = cfg.scratch_dir.clone();

        let summary = execute(cfg, resolver, Vec::new(), CancellationToken::new()).await;

        assert_eq!(summary.total(), 0);
        assert!(files_under(&scratch).is_empty());
    }
}
