//! Per-item retry state machine.
//!
//! The scheduler owns one [`DownloadTask`] per item while it is in flight and
//! feeds every [`FetchOutcome`] through [`DownloadTask::advance`], which
//! decides between placing the file, backing off, or finishing.

use std::path::PathBuf;
use std::time::Duration;

use super::error::{FailureReason, RunFatal};
use super::fetch::{Fatal, FetchOutcome, TempFile};
use super::item::MediaItem;
use crate::retry::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Attempting,
    Retrying,
    Succeeded,
    SkippedDuplicate,
    Failed,
    Cancelled,
}

/// Terminal result of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Placed { path: PathBuf, bytes: u64 },
    Duplicate { path: PathBuf },
    Failed(FailureReason),
    /// This item hit a run-level failure; the run is being cancelled.
    Aborted(RunFatal),
    Cancelled,
}

impl TaskOutcome {
    fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Placed { .. } => TaskState::Succeeded,
            TaskOutcome::Duplicate { .. } => TaskState::SkippedDuplicate,
            TaskOutcome::Failed(_) | TaskOutcome::Aborted(_) => TaskState::Failed,
            TaskOutcome::Cancelled => TaskState::Cancelled,
        }
    }
}

/// What the scheduler does next after an attempt.
#[derive(Debug)]
pub enum Step {
    /// The body is on disk; hand it to the organizer.
    Place(TempFile),
    /// Sleep for the given backoff, then attempt again.
    Retry(Duration),
    Done(TaskOutcome),
}

#[derive(Debug)]
pub struct DownloadTask {
    pub item: MediaItem,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Bytes of the attempt currently (or most recently) streaming.
    pub bytes_transferred: u64,
    state: TaskState,
}

impl DownloadTask {
    pub fn new(item: MediaItem) -> Self {
        Self {
            item,
            attempts: 0,
            last_error: None,
            bytes_transferred: 0,
            state: TaskState::Pending,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self.state,
            TaskState::Pending | TaskState::Attempting | TaskState::Retrying
        )
    }

    /// Pending/Retrying -> Attempting. Returns the attempt number.
    pub fn begin_attempt(&mut self) -> u32 {
        debug_assert!(!self.is_terminal(), "attempt on finished task");
        self.attempts += 1;
        self.bytes_transferred = 0;
        self.state = TaskState::Attempting;
        self.attempts
    }

    /// Consume the outcome of the current attempt.
    pub fn advance(&mut self, outcome: FetchOutcome, retry: &RetryConfig) -> Step {
        match outcome {
            FetchOutcome::Fetched(temp) => Step::Place(temp),
            FetchOutcome::Cancelled => Step::Done(self.finish(TaskOutcome::Cancelled)),
            FetchOutcome::Fatal(Fatal::Item(reason)) => {
                self.last_error = Some(reason.to_string());
                Step::Done(self.finish(TaskOutcome::Failed(reason)))
            }
            FetchOutcome::Fatal(Fatal::Run(fatal)) => {
                self.last_error = Some(fatal.to_string());
                Step::Done(self.finish(TaskOutcome::Aborted(fatal)))
            }
            FetchOutcome::Retryable(error) => {
                let message = error.to_string();
                // Every retry starts from a freshly resolved URL.
                self.item.invalidate_url();
                if retry.allows_another(self.attempts) {
                    let delay = retry.delay_for_retry(self.attempts.saturating_sub(1));
                    self.last_error = Some(message);
                    self.state = TaskState::Retrying;
                    Step::Retry(delay)
                } else {
                    self.last_error = Some(message.clone());
                    Step::Done(self.finish(TaskOutcome::Failed(
                        FailureReason::RetriesExhausted {
                            attempts: self.attempts,
                            last_error: message,
                        },
                    )))
                }
            }
        }
    }

    /// Record a terminal outcome and hand it back.
    pub fn finish(&mut self, outcome: TaskOutcome) -> TaskOutcome {
        self.state = outcome.state();
        outcome
    }
}
