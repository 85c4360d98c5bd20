use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

/// Events emitted by the [`super::Dispatcher`].
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    RunStarted {
        items: usize,
        workers: usize,
    },
    ItemStarted {
        task_id: String,
        slice_rows: usize,
    },
    ItemStaged {
        task_id: String,
        staging_path: PathBuf,
    },
    ItemSucceeded {
        task_id: String,
        fragment_path: PathBuf,
        elapsed: Duration,
    },
    ItemFailed {
        task_id: String,
        error: String,
        elapsed: Duration,
    },
    /// The staging file outlived its item. Never changes the item's outcome.
    StagingCleanupFailed {
        task_id: String,
        staging_path: PathBuf,
        error: String,
    },
    RunFinished {
        elapsed: Duration,
        metrics: DispatchMetricsSnapshot,
    },
}

/// Observer hook for dispatch events.
pub trait DispatchObserver: Send + Sync {
    fn on_event(&self, event: &DispatchEvent);
}

/// Forwards dispatch events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl DispatchObserver for TracingObserver {
    fn on_event(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::RunStarted { items, workers } => {
                info!(items, workers, "dispatch started");
            }
            DispatchEvent::ItemStarted {
                task_id,
                slice_rows,
            } => {
                info!(task_id = %task_id, slice_rows, "processing slice");
            }
            DispatchEvent::ItemStaged {
                task_id,
                staging_path,
            } => {
                debug!(task_id = %task_id, staging_path = %staging_path.display(), "slice staged");
            }
            DispatchEvent::ItemSucceeded {
                task_id,
                fragment_path,
                elapsed,
            } => {
                debug!(
                    task_id = %task_id,
                    fragment = %fragment_path.display(),
                    elapsed = ?elapsed,
                    "work item succeeded"
                );
            }
            DispatchEvent::ItemFailed {
                task_id,
                error,
                elapsed,
            } => {
                error!(task_id = %task_id, error = %error, elapsed = ?elapsed, "work item failed");
            }
            DispatchEvent::StagingCleanupFailed {
                task_id,
                staging_path,
                error,
            } => {
                warn!(
                    task_id = %task_id,
                    staging_path = %staging_path.display(),
                    error = %error,
                    "failed to remove staging file"
                );
            }
            DispatchEvent::RunFinished { elapsed, metrics } => {
                info!(elapsed = ?elapsed, "dispatch finished: {metrics}");
            }
        }
    }
}

/// Live counters for a dispatch run.
///
/// The dispatcher updates these from its workers; callers can snapshot them at any time.
pub struct DispatchMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,

    items_started: AtomicU64,
    items_succeeded: AtomicU64,
    items_failed: AtomicU64,
    cleanup_failures: AtomicU64,

    active_workers: AtomicUsize,
    max_active_workers: AtomicUsize,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            items_started: AtomicU64::new(0),
            items_succeeded: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            cleanup_failures: AtomicU64::new(0),
            active_workers: AtomicUsize::new(0),
            max_active_workers: AtomicUsize::new(0),
        }
    }

    pub fn begin_run(&self) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst);

        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.items_started.store(0, Ordering::SeqCst);
        self.items_succeeded.store(0, Ordering::SeqCst);
        self.items_failed.store(0, Ordering::SeqCst);
        self.cleanup_failures.store(0, Ordering::SeqCst);
        self.active_workers.store(0, Ordering::SeqCst);
        self.max_active_workers.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    pub fn on_item_start(&self) {
        let _ = self.items_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_workers.fetch_add(1, Ordering::SeqCst) + 1;
        update_max_usize(&self.max_active_workers, now);
    }

    pub fn on_item_end(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.items_succeeded
        } else {
            &self.items_failed
        };
        let _ = counter.fetch_add(1, Ordering::SeqCst);
        let _ = self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn on_cleanup_failure(&self) {
        let _ = self.cleanup_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        let elapsed = if elapsed_ns > 0 {
            Some(Duration::from_nanos(elapsed_ns))
        } else {
            None
        };

        DispatchMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed,
            items_started: self.items_started.load(Ordering::SeqCst),
            items_succeeded: self.items_succeeded.load(Ordering::SeqCst),
            items_failed: self.items_failed.load(Ordering::SeqCst),
            cleanup_failures: self.cleanup_failures.load(Ordering::SeqCst),
            max_active_workers: self.max_active_workers.load(Ordering::SeqCst),
        }
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn update_max_usize(dst: &AtomicUsize, now: usize) {
    let _ = dst.fetch_max(now, Ordering::SeqCst);
}

/// Immutable snapshot of [`DispatchMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub items_started: u64,
    pub items_succeeded: u64,
    pub items_failed: u64,
    pub cleanup_failures: u64,
    pub max_active_workers: usize,
}

impl fmt::Display for DispatchMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, items={}/{} ok, failed={}, cleanup_failures={}, max_active_workers={}, elapsed={:?}",
            self.run_id,
            self.items_succeeded,
            self.items_started,
            self.items_failed,
            self.cleanup_failures,
            self.max_active_workers,
            self.elapsed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_outcomes_and_peak_concurrency() {
        let m = DispatchMetrics::new();
        m.begin_run();
        m.on_item_start();
        m.on_item_start();
        m.on_item_end(true);
        m.on_item_start();
        m.on_item_end(false);
        m.on_item_end(true);
        m.on_cleanup_failure();
        m.end_run(Duration::from_millis(5));

        let snap = m.snapshot();
        assert_eq!(snap.run_id, 1);
        assert_eq!(snap.items_started, 3);
        assert_eq!(snap.items_succeeded, 2);
        assert_eq!(snap.items_failed, 1);
        assert_eq!(snap.cleanup_failures, 1);
        assert_eq!(snap.max_active_workers, 2);
        assert_eq!(snap.elapsed, Some(Duration::from_millis(5)));
    }

    #[test]
    fn begin_run_resets_counters() {
        let m = DispatchMetrics::new();
        m.begin_run();
        m.on_item_start();
        m.on_item_end(false);
        m.begin_run();

        let snap = m.snapshot();
        assert_eq!(snap.run_id, 2);
        assert_eq!(snap.items_started, 0);
        assert_eq!(snap.items_failed, 0);
        assert_eq!(snap.elapsed, None);
    }
}
