//! Bounded-concurrency dispatcher.
//!
//! Tasks are pulled in input order and driven concurrently up to the
//! configured limit; a slot frees as soon as its task reaches a terminal
//! outcome. Each task runs its own retry loop through
//! [`DownloadTask::advance`] and hands finished downloads to the organizer.

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use indicatif::ProgressBar;
use tokio_util::sync::CancellationToken;

use super::error::{FailureReason, RunFatal};
use super::fetch::{FetchWorker, TempFile};
use super::organize::{Organizer, PlacementResult};
use super::progress::{ItemState, ProgressTracker};
use super::task::{DownloadTask, Step, TaskOutcome};
use crate::retry::RetryConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub item_id: String,
    pub attempts: u32,
    pub outcome: TaskOutcome,
}

pub struct Scheduler<'a> {
    pub worker: &'a FetchWorker,
    pub organizer: &'a Organizer,
    pub tracker: &'a ProgressTracker,
    pub retry: RetryConfig,
    pub concurrency: usize,
    /// Cancelled on shutdown or by the first run-level failure.
    pub cancel: CancellationToken,
    pub pb: ProgressBar,
}

impl Scheduler<'_> {
    /// Drive every task to a terminal outcome. Once `cancel` fires no further
    /// task is started; tasks never started are absent from the result.
    pub async fn run(&self, tasks: Vec<DownloadTask>) -> Vec<TaskReport> {
        stream::iter(tasks)
            .take_while(|_| std::future::ready(!self.cancel.is_cancelled()))
            .map(|task| self.drive(task))
            .buffer_unordered(self.concurrency.max(1))
            .collect()
            .await
    }

    // Boxed: reqwest and stream futures are large enough to overflow the
    // stack in debug builds when nested inline.
    fn drive(&self, mut task: DownloadTask) -> BoxFuture<'_, TaskReport> {
        async move {
            let id = task.item.id.clone();
            self.tracker.start(&id);

            let outcome = self.run_task(&mut task).await;

            let state = match &outcome {
                TaskOutcome::Placed { path, bytes } => {
                    tracing::debug!(item = %id, bytes, path = %path.display(), "placed");
                    ItemState::Succeeded
                }
                TaskOutcome::Duplicate { path } => {
                    tracing::debug!(item = %id, path = %path.display(), "already backed up");
                    ItemState::SkippedDuplicate
                }
                TaskOutcome::Failed(reason) => {
                    self.pb
                        .suspend(|| tracing::error!("Download failed: {}: {}", id, reason));
                    ItemState::Failed
                }
                TaskOutcome::Aborted(fatal) => {
                    self.cancel.cancel();
                    self.pb.suspend(|| {
                        tracing::error!("Run-level failure on {}: {}, stopping", id, fatal)
                    });
                    ItemState::Failed
                }
                TaskOutcome::Cancelled => ItemState::Cancelled,
            };
            self.tracker.finish(&id, state);

            TaskReport {
                item_id: id,
                attempts: task.attempts,
                outcome,
            }
        }
        .boxed()
    }

    async fn run_task(&self, task: &mut DownloadTask) -> TaskOutcome {
        let organizer = self.organizer.clone();
        let item = task.item.clone();
        match tokio::task::spawn_blocking(move || organizer.existing_copy(&item)).await {
            Ok(Some(path)) => return task.finish(TaskOutcome::Duplicate { path }),
            Ok(None) => {}
            Err(e) => tracing::debug!(item = %task.item.id, "existing copy check failed: {}", e),
        }

        loop {
            let attempt = task.begin_attempt();
            self.tracker.record_attempt(&task.item.id);
            let outcome = self.worker.fetch(task, &self.cancel).await;

            match task.advance(outcome, &self.retry) {
                Step::Done(outcome) => return outcome,
                Step::Place(temp) => return self.place(task, temp).await,
                Step::Retry(delay) => {
                    self.pb.suspend(|| {
                        tracing::warn!(
                            "Attempt {} for {} failed ({}), retrying in {:?}",
                            attempt,
                            task.item.id,
                            task.last_error.as_deref().unwrap_or("unknown error"),
                            delay
                        )
                    });
                    tokio::select! {
                        _ = self.cancel.cancelled() => return task.finish(TaskOutcome::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn place(&self, task: &mut DownloadTask, temp: TempFile) -> TaskOutcome {
        let bytes = temp.len();
        let organizer = self.organizer.clone();
        let item = task.item.clone();
        let placed = tokio::task::spawn_blocking(move || organizer.place(temp, &item)).await;

        let outcome = match placed {
            Ok(Ok(PlacementResult::Placed(path))) => TaskOutcome::Placed { path, bytes },
            Ok(Ok(PlacementResult::Duplicate(path))) => TaskOutcome::Duplicate { path },
            Ok(Err(e)) if e.is_storage_failure() => {
                TaskOutcome::Aborted(RunFatal::Storage(e.to_string()))
            }
            Ok(Err(e)) => TaskOutcome::Failed(FailureReason::Placement(e.to_string())),
            Err(e) => TaskOutcome::Failed(FailureReason::Placement(format!(
                "placement task failed: {}",
                e
            ))),
        };
        if !matches!(outcome, TaskOutcome::Placed { .. }) {
            self.tracker.remove_bytes(bytes);
        }
        task.finish(outcome)
    }
}
