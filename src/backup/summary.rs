use std::fmt::Display;
use std::time::Duration;

use serde::{Serialize, Serializer};

use super::error::{FailureReason, RunFatal};
use super::scheduler::TaskReport;
use super::task::TaskOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub item_id: String,
    #[serde(serialize_with = "as_display")]
    pub reason: FailureReason,
}

/// Final account of one run. Every failed item appears in `failures`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_duplicate: usize,
    pub cancelled: usize,
    /// Bytes of files actually placed in this run.
    pub bytes_transferred: u64,
    pub failures: Vec<ItemFailure>,
    /// Set when a run-level failure stopped the run.
    #[serde(serialize_with = "option_as_display")]
    pub aborted: Option<RunFatal>,
    /// Set when a shutdown signal stopped the run.
    pub interrupted: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

fn as_display<T: Display, S: Serializer>(value: &T, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(value)
}

fn option_as_display<T: Display, S: Serializer>(
    value: &Option<T>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => s.collect_str(v),
        None => s.serialize_none(),
    }
}

impl RunSummary {
    /// Tally task reports. `undispatched` items never started because the run
    /// was cancelled and count as cancelled.
    pub fn from_reports(reports: Vec<TaskReport>, undispatched: usize) -> Self {
        let mut summary = RunSummary {
            cancelled: undispatched,
            ..Default::default()
        };
        for report in reports {
            match report.outcome {
                TaskOutcome::Placed { bytes, .. } => {
                    summary.succeeded += 1;
                    summary.bytes_transferred += bytes;
                }
                TaskOutcome::Duplicate { .. } => summary.skipped_duplicate += 1,
                TaskOutcome::Cancelled => summary.cancelled += 1,
                TaskOutcome::Failed(reason) => {
                    summary.failed += 1;
                    summary.failures.push(ItemFailure {
                        item_id: report.item_id,
                        reason,
                    });
                }
                TaskOutcome::Aborted(fatal) => {
                    summary.failed += 1;
                    summary.failures.push(ItemFailure {
                        item_id: report.item_id,
                        reason: FailureReason::RunAborted(fatal.to_string()),
                    });
                    summary.aborted.get_or_insert(fatal);
                }
            }
        }
        summary.failures.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        summary
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped_duplicate + self.cancelled
    }

    /// Nothing failed, nothing was left undone.
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.cancelled == 0 && self.aborted.is_none() && !self.interrupted
    }

    pub fn log(&self) {
        tracing::info!("── Summary ──");
        tracing::info!(
            "  {} downloaded, {} skipped, {} failed, {} cancelled, {} total",
            self.succeeded,
            self.skipped_duplicate,
            self.failed,
            self.cancelled,
            self.total()
        );
        tracing::info!("  transferred: {}", format_bytes(self.bytes_transferred));
        tracing::info!("  elapsed: {}", format_duration(self.elapsed));
        for failure in &self.failures {
            tracing::error!("  failed: {}: {}", failure.item_id, failure.reason);
        }
        if let Some(fatal) = &self.aborted {
            tracing::error!("Run aborted: {}", fatal);
        } else if self.interrupted {
            tracing::warn!("Interrupted, {} items left for the next run", self.cancelled);
        }
    }
}

/// Human-readable byte count with one decimal, `B` through `TB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} PB", size)
}

pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
