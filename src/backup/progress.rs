//! Live progress for a backup run.
//!
//! [`ProgressTracker`] is the single owner of per-item and aggregate state.
//! Item counts change under one short mutex (never held across an await) so a
//! [`ProgressSnapshot`] is always internally consistent; byte progress is a
//! separate atomic so the streaming hot path never takes the lock.

use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::summary::format_bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    InFlight,
    Succeeded,
    SkippedDuplicate,
    Failed,
    Cancelled,
}

impl ItemState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ItemState::Pending | ItemState::InFlight)
    }
}

/// Point-in-time copy of the aggregate counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub bytes_done: u64,
    /// Sum of catalog-reported sizes; zero when the catalog reports none.
    pub bytes_total: u64,
}

impl ProgressSnapshot {
    /// Items that reached a terminal outcome.
    pub fn finished(&self) -> usize {
        self.succeeded + self.skipped_duplicate + self.failed + self.cancelled
    }
}

#[derive(Debug)]
struct ItemProgress {
    state: ItemState,
    attempts: u32,
}

#[derive(Debug, Default)]
struct Counts {
    pending: usize,
    in_flight: usize,
    succeeded: usize,
    skipped_duplicate: usize,
    failed: usize,
    cancelled: usize,
}

impl Counts {
    fn slot(&mut self, state: ItemState) -> &mut usize {
        match state {
            ItemState::Pending => &mut self.pending,
            ItemState::InFlight => &mut self.in_flight,
            ItemState::Succeeded => &mut self.succeeded,
            ItemState::SkippedDuplicate => &mut self.skipped_duplicate,
            ItemState::Failed => &mut self.failed,
            ItemState::Cancelled => &mut self.cancelled,
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    items: HashMap<String, ItemProgress>,
    counts: Counts,
    bytes_total: u64,
}

impl TrackerState {
    /// Move `id` from one of `from` to `to`, adjusting counts. Returns false
    /// (and changes nothing) if the item is unknown or not in an allowed state.
    fn transition(&mut self, id: &str, from: &[ItemState], to: ItemState) -> bool {
        let Some(item) = self.items.get_mut(id) else {
            return false;
        };
        if !from.contains(&item.state) {
            return false;
        }
        let prev = std::mem::replace(&mut item.state, to);
        *self.counts.slot(prev) -= 1;
        *self.counts.slot(to) += 1;
        true
    }
}

#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: Mutex<TrackerState>,
    bytes_done: AtomicU64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an item in the Pending state. Returns false if the id is already known.
    pub fn register(&self, id: &str, expected_size: Option<u64>) -> bool {
        let mut state = self.lock();
        if state.items.contains_key(id) {
            return false;
        }
        state.items.insert(
            id.to_string(),
            ItemProgress {
                state: ItemState::Pending,
                attempts: 0,
            },
        );
        state.counts.pending += 1;
        state.bytes_total += expected_size.unwrap_or(0);
        true
    }

    /// Pending -> InFlight. Only the first call for an item counts.
    pub fn start(&self, id: &str) -> bool {
        self.lock()
            .transition(id, &[ItemState::Pending], ItemState::InFlight)
    }

    /// Bump the per-item attempt counter and return the new value. Does not
    /// touch the aggregate counts.
    pub fn record_attempt(&self, id: &str) -> u32 {
        let mut state = self.lock();
        match state.items.get_mut(id) {
            Some(item) => {
                item.attempts += 1;
                item.attempts
            }
            None => 0,
        }
    }

    /// Move an item to a terminal state. Only the first terminal transition
    /// counts; later calls return false.
    pub fn finish(&self, id: &str, outcome: ItemState) -> bool {
        if !outcome.is_terminal() {
            return false;
        }
        self.lock().transition(
            id,
            &[ItemState::Pending, ItemState::InFlight],
            outcome,
        )
    }

    /// Cancel every item that was never dispatched. Returns how many.
    pub fn cancel_pending(&self) -> usize {
        let mut state = self.lock();
        let ids: Vec<String> = state
            .items
            .iter()
            .filter(|(_, item)| item.state == ItemState::Pending)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            state.transition(id, &[ItemState::Pending], ItemState::Cancelled);
        }
        ids.len()
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_done.fetch_add(n, Ordering::Relaxed);
    }

    /// Roll back bytes from an attempt whose file was not kept.
    pub fn remove_bytes(&self, n: u64) {
        let _ = self
            .bytes_done
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_sub(n))
            });
    }

    pub fn state_of(&self, id: &str) -> Option<ItemState> {
        self.lock().items.get(id).map(|item| item.state)
    }

    pub fn attempts(&self, id: &str) -> Option<u32> {
        self.lock().items.get(id).map(|item| item.attempts)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.lock();
        ProgressSnapshot {
            total: state.items.len(),
            pending: state.counts.pending,
            in_flight: state.counts.in_flight,
            succeeded: state.counts.succeeded,
            skipped_duplicate: state.counts.skipped_duplicate,
            failed: state.counts.failed,
            cancelled: state.counts.cancelled,
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
            bytes_total: state.bytes_total,
        }
    }
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY (e.g. piped output, cron jobs).
pub fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    match ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        Ok(style) => pb.set_style(style.progress_chars("=> ")),
        Err(e) => tracing::debug!("Invalid progress template: {}", e),
    }
    pb
}

const REPORT_INTERVAL: Duration = Duration::from_millis(250);

/// Poll the tracker and mirror it onto `pb` until `stop` is cancelled.
pub fn spawn_reporter(
    tracker: Arc<ProgressTracker>,
    pb: ProgressBar,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REPORT_INTERVAL);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            render(&tracker.snapshot(), &pb);
        }
        render(&tracker.snapshot(), &pb);
    })
}

fn render(snap: &ProgressSnapshot, pb: &ProgressBar) {
    pb.set_position(snap.finished() as u64);
    let mut msg = format!("{} active, {}", snap.in_flight, format_bytes(snap.bytes_done));
    if snap.failed > 0 {
        msg.push_str(&format!(", {} failed", snap.failed));
    }
    pb.set_message(msg);
}
