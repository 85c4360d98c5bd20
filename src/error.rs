use std::collections::BTreeSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Convenience result type for pipeline stages.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Fatal error returned by a pipeline stage.
///
/// Every variant aborts the stage that raised it; the top-level run never advances to the next
/// stage after one of these.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The run configuration is malformed or violates an invariant (e.g. `worker_count == 0`).
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The source dataset could not be fetched, or the fetch returned no bytes.
    #[error("source '{location}' unavailable: {message}")]
    SourceUnavailable { location: String, message: String },

    /// The fetched dataset declares zero rows.
    #[error("dataset is empty (0 rows)")]
    EmptyDataset,

    /// A required directory or file could not be created or written.
    #[error("failed to write {}: {message}", path.display())]
    WriteFailure { path: PathBuf, message: String },

    /// A required directory could not be listed or read.
    #[error("failed to read {}: {message}", path.display())]
    ReadFailure { path: PathBuf, message: String },

    /// The slices directory holds nothing to dispatch.
    #[error("no slices found in {}", dir.display())]
    NoSlices { dir: PathBuf },

    /// At least one work item failed; the ids of all failed items are listed.
    #[error("{} work item(s) failed: {}", failed_task_ids.len(), join_ids(failed_task_ids))]
    DispatchFailed { failed_task_ids: BTreeSet<String> },

    /// The assembler found no fragment that contributed rows.
    #[error("no valid result fragments in {}", dir.display())]
    NoValidFragments { dir: PathBuf },

    /// Parquet decoder/encoder error.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// The worker thread pool could not be built.
    #[error("worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl PipelineError {
    pub(crate) fn write_failure(path: impl AsRef<Path>, err: impl Display) -> Self {
        Self::WriteFailure {
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }

    pub(crate) fn read_failure(path: impl AsRef<Path>, err: impl Display) -> Self {
        Self::ReadFailure {
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }
}

fn join_ids(ids: &BTreeSet<String>) -> String {
    ids.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Error raised by a [`crate::transform::TransformEngine`] invocation.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Underlying I/O error (e.g. the staged input vanished).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Parquet decoding of the staged slice failed.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Writing the CSV body of a fragment failed.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Engine-specific failure.
    #[error("{0}")]
    Failed(String),
}

/// Why a single work item failed.
///
/// Item errors never abort the dispatcher loop; they are collected into
/// [`crate::execution::PipelineOutcome`].
#[derive(Debug, Error)]
pub enum ItemError {
    /// Copying the slice into its staging path failed.
    #[error("staging {} failed: {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The transform engine returned an error.
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    /// The transform engine panicked.
    #[error("transform panicked: {0}")]
    Panicked(String),

    /// The engine reported success but left no fragment at the expected path.
    #[error("transform produced no fragment at {}", path.display())]
    MissingFragment { path: PathBuf },
}

/// Why a fragment file was rejected by the assembler.
#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Framing lines are missing or do not match the fragment convention.
    #[error("malformed framing: {0}")]
    Framing(String),
}
