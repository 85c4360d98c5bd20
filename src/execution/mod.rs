//! Dispatch of slices to a transform engine on a bounded worker pool.
//!
//! The [`Dispatcher`] owns a rayon pool of exactly `worker_count` threads. Each slice becomes a
//! [`WorkItem`] whose staging and fragment paths are namespaced by the slice index, so workers
//! never touch the same file and no locking is needed on the data path.
//!
//! Failure policy: every dispatched item runs to completion even after a sibling fails. The
//! aggregate [`PipelineOutcome`] is a success only if every item succeeded.

mod observer;

use std::any::Any;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::warn;

use crate::error::{ItemError, PipelineError, PipelineResult};
use crate::slicer::Slice;
use crate::transform::{ResultFragment, TransformEngine, fragment_path};

pub use observer::{
    DispatchEvent, DispatchMetrics, DispatchMetricsSnapshot, DispatchObserver, TracingObserver,
};

/// Configuration for the [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Size of the worker pool. Must be >= 1.
    pub worker_count: usize,
    /// Directory holding each worker's private copy of its slice.
    pub staging_dir: PathBuf,
    /// Directory the transform engine writes fragments into.
    pub fragments_dir: PathBuf,
}

impl DispatchOptions {
    pub fn new(
        worker_count: usize,
        staging_dir: impl Into<PathBuf>,
        fragments_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            worker_count,
            staging_dir: staging_dir.into(),
            fragments_dir: fragments_dir.into(),
        }
    }
}

/// `data_{index}.bin`
pub fn staging_file_name(index: usize) -> String {
    format!("data_{index}.bin")
}

/// One unit of dispatch: a slice plus the paths its worker owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub slice: Slice,
    pub task_id: String,
    pub staging_path: PathBuf,
    pub fragment_output_path: PathBuf,
}

impl WorkItem {
    pub fn for_slice(slice: &Slice, staging_dir: &Path, fragments_dir: &Path) -> Self {
        let task_id = slice.task_id();
        Self {
            staging_path: staging_dir.join(staging_file_name(slice.index)),
            fragment_output_path: fragment_path(fragments_dir, &task_id),
            task_id,
            slice: slice.clone(),
        }
    }
}

/// Result of one work item.
#[derive(Debug)]
pub struct ItemReport {
    pub task_id: String,
    pub result: Result<ResultFragment, ItemError>,
    pub elapsed: Duration,
    /// `false` if the staging file could not be removed afterwards.
    pub staging_cleaned: bool,
}

impl ItemReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Aggregate of every work item of a dispatch run.
#[derive(Debug)]
pub struct PipelineOutcome {
    /// `true` iff every item succeeded.
    pub success: bool,
    pub failed_task_ids: BTreeSet<String>,
    /// One report per item, in slice order.
    pub reports: Vec<ItemReport>,
}

impl PipelineOutcome {
    fn from_reports(reports: Vec<ItemReport>) -> Self {
        let failed_task_ids: BTreeSet<String> = reports
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| r.task_id.clone())
            .collect();
        Self {
            success: failed_task_ids.is_empty(),
            failed_task_ids,
            reports,
        }
    }

    /// Fragments produced by successful items.
    pub fn fragments(&self) -> impl Iterator<Item = &ResultFragment> {
        self.reports.iter().filter_map(|r| r.result.as_ref().ok())
    }

    /// Turn an unsuccessful outcome into [`PipelineError::DispatchFailed`].
    pub fn into_result(self) -> PipelineResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(PipelineError::DispatchFailed {
                failed_task_ids: self.failed_task_ids,
            })
        }
    }
}

/// Runs work items on a fixed-size pool.
pub struct Dispatcher {
    pool: ThreadPool,
    opts: DispatchOptions,
    observer: Option<Arc<dyn DispatchObserver>>,
    metrics: Arc<DispatchMetrics>,
}

impl Dispatcher {
    /// Build a dispatcher and its worker pool.
    pub fn new(opts: DispatchOptions) -> PipelineResult<Self> {
        if opts.worker_count == 0 {
            return Err(PipelineError::InvalidConfig {
                message: "worker_count must be >= 1".to_string(),
            });
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(opts.worker_count)
            .thread_name(|i| format!("etl-worker-{i}"))
            .build()?;

        Ok(Self {
            pool,
            opts,
            observer: None,
            metrics: Arc::new(DispatchMetrics::new()),
        })
    }

    /// Attach an observer for dispatch events.
    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time dispatch metrics.
    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn worker_count(&self) -> usize {
        self.opts.worker_count
    }

    /// Run one work item per slice and wait for all of them.
    ///
    /// Slice indices must be unique; they namespace the staging and fragment paths.
    pub fn run(&self, slices: &[Slice], engine: &dyn TransformEngine) -> PipelineOutcome {
        let start = Instant::now();
        self.metrics.begin_run();
        self.emit(DispatchEvent::RunStarted {
            items: slices.len(),
            workers: self.opts.worker_count,
        });

        // A failure here resurfaces as a staging or transform error on every item.
        for dir in [&self.opts.staging_dir, &self.opts.fragments_dir] {
            if let Err(err) = fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), error = %err, "failed to create dispatch directory");
            }
        }

        let items: Vec<WorkItem> = slices
            .iter()
            .map(|s| WorkItem::for_slice(s, &self.opts.staging_dir, &self.opts.fragments_dir))
            .collect();

        let reports: Vec<ItemReport> = self.pool.install(|| {
            items
                .par_iter()
                .with_max_len(1)
                .map(|item| self.run_item(item, engine))
                .collect()
        });
        let outcome = PipelineOutcome::from_reports(reports);

        self.metrics.end_run(start.elapsed());
        self.emit(DispatchEvent::RunFinished {
            elapsed: start.elapsed(),
            metrics: self.metrics.snapshot(),
        });
        outcome
    }

    fn run_item(&self, item: &WorkItem, engine: &dyn TransformEngine) -> ItemReport {
        let start = Instant::now();
        self.metrics.on_item_start();
        self.emit(DispatchEvent::ItemStarted {
            task_id: item.task_id.clone(),
            slice_rows: item.slice.row_count,
        });

        let staging = StagingFile::new(&item.staging_path);
        let result = self.process(item, engine);
        let staging_cleaned = match staging.remove() {
            Ok(()) => true,
            Err(err) => {
                self.metrics.on_cleanup_failure();
                self.emit(DispatchEvent::StagingCleanupFailed {
                    task_id: item.task_id.clone(),
                    staging_path: item.staging_path.clone(),
                    error: err.to_string(),
                });
                false
            }
        };

        let elapsed = start.elapsed();
        match &result {
            Ok(fragment) => self.emit(DispatchEvent::ItemSucceeded {
                task_id: item.task_id.clone(),
                fragment_path: fragment.path.clone(),
                elapsed,
            }),
            Err(err) => self.emit(DispatchEvent::ItemFailed {
                task_id: item.task_id.clone(),
                error: err.to_string(),
                elapsed,
            }),
        }
        self.metrics.on_item_end(result.is_ok());

        ItemReport {
            task_id: item.task_id.clone(),
            result,
            elapsed,
            staging_cleaned,
        }
    }

    fn process(&self, item: &WorkItem, engine: &dyn TransformEngine) -> Result<ResultFragment, ItemError> {
        fs::copy(&item.slice.path, &item.staging_path).map_err(|source| ItemError::Staging {
            path: item.staging_path.clone(),
            source,
        })?;
        self.emit(DispatchEvent::ItemStaged {
            task_id: item.task_id.clone(),
            staging_path: item.staging_path.clone(),
        });

        let invoked = panic::catch_unwind(AssertUnwindSafe(|| {
            engine.run(&item.staging_path, &item.task_id, &self.opts.fragments_dir)
        }));
        match invoked {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(ItemError::Transform(err)),
            Err(payload) => return Err(ItemError::Panicked(panic_message(payload.as_ref()))),
        }

        if !item.fragment_output_path.is_file() {
            return Err(ItemError::MissingFragment {
                path: item.fragment_output_path.clone(),
            });
        }
        Ok(ResultFragment {
            task_id: item.task_id.clone(),
            path: item.fragment_output_path.clone(),
        })
    }

    fn emit(&self, event: DispatchEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

/// Staging file owned by one work item.
///
/// [`StagingFile::remove`] reports the cleanup result; if the guard is dropped without it (an
/// unwinding worker), the file is still removed and a failure is only logged.
struct StagingFile<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> StagingFile<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, armed: true }
    }

    fn remove(mut self) -> io::Result<()> {
        self.armed = false;
        remove_if_exists(self.path)
    }
}

impl Drop for StagingFile<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = remove_if_exists(self.path) {
                warn!(path = %self.path.display(), error = %err, "failed to remove staging file");
            }
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
