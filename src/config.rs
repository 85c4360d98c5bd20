//! Run configuration.
//!
//! A [`RunConfig`] is built once at startup (from `params.json`, optionally overridden by CLI
//! flags) and passed by reference into every stage. Nothing reads the process environment for
//! configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assembly::FragmentOrder;
use crate::error::{PipelineError, PipelineResult};

/// Rows per slice when the configuration does not say otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 5_000;

/// Upper bound for the default worker count.
pub const MAX_DEFAULT_WORKERS: usize = 4;

/// Default dataset location.
pub const DEFAULT_SOURCE_URL: &str =
    "https://storage.googleapis.com/video-test-public/yellow_tripdata_2024-01.parquet";

/// Default bound on the source fetch, in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// `min(available parallelism, 4)`, never below 1.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_DEFAULT_WORKERS)
}

/// Names of the working directories a run owns.
///
/// Relative entries are resolved against a base directory with [`WorkspaceLayout::rooted_at`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceLayout {
    /// Where the slicer writes `slice_{i}.parquet`.
    pub slices_dir: PathBuf,
    /// Where workers stage their private copy of a slice.
    pub staging_dir: PathBuf,
    /// Where the transform engine writes result fragments.
    pub fragments_dir: PathBuf,
    /// Where the final artifact is written.
    pub output_dir: PathBuf,
    /// File name of the final artifact inside `output_dir`.
    pub artifact_name: String,
}

impl Default for WorkspaceLayout {
    fn default() -> Self {
        Self {
            slices_dir: PathBuf::from("chunks_dir"),
            staging_dir: PathBuf::from("source_dir"),
            fragments_dir: PathBuf::from("task_results_dir"),
            output_dir: PathBuf::from("output_dir"),
            artifact_name: "result.parquet".to_string(),
        }
    }
}

impl WorkspaceLayout {
    /// Resolve every relative directory against `base`. Absolute entries are kept as-is.
    pub fn rooted_at(&self, base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            slices_dir: base.join(&self.slices_dir),
            staging_dir: base.join(&self.staging_dir),
            fragments_dir: base.join(&self.fragments_dir),
            output_dir: base.join(&self.output_dir),
            artifact_name: self.artifact_name.clone(),
        }
    }

    /// All directories reset at the start of a run.
    pub fn directories(&self) -> [&Path; 4] {
        [
            self.slices_dir.as_path(),
            self.staging_dir.as_path(),
            self.fragments_dir.as_path(),
            self.output_dir.as_path(),
        ]
    }

    /// Full path of the final artifact.
    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(&self.artifact_name)
    }
}

/// Parameters of a single pipeline run.
///
/// Unknown keys are ignored; missing keys take their defaults. The legacy key names
/// `dataset_url` and `num_threads` are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Rows per slice.
    pub chunk_size: usize,
    /// Dataset location: `http(s)://` URL, `file://` URL or local path.
    #[serde(alias = "dataset_url")]
    pub source_url: String,
    /// Size of the worker pool.
    #[serde(alias = "num_threads")]
    pub worker_count: usize,
    /// Bound on the source fetch.
    pub fetch_timeout_secs: u64,
    /// How fragments are ordered before concatenation.
    pub fragment_order: FragmentOrder,
    /// Working directory names.
    pub workspace: WorkspaceLayout,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            source_url: DEFAULT_SOURCE_URL.to_string(),
            worker_count: default_worker_count(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            fragment_order: FragmentOrder::default(),
            workspace: WorkspaceLayout::default(),
        }
    }
}

impl RunConfig {
    /// Parse a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> PipelineResult<Self> {
        read_json(path.as_ref())
    }

    /// Parse `path`, writing a default configuration there first if it does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> PipelineResult<Self> {
        load_or_create_json(path.as_ref())
    }

    /// Reject configurations the pipeline must not start with.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.chunk_size == 0 {
            return Err(PipelineError::InvalidConfig {
                message: "chunk_size must be >= 1".to_string(),
            });
        }
        if self.worker_count == 0 {
            return Err(PipelineError::InvalidConfig {
                message: "worker_count must be >= 1".to_string(),
            });
        }
        if self.source_url.trim().is_empty() {
            return Err(PipelineError::InvalidConfig {
                message: "source_url must not be empty".to_string(),
            });
        }
        if self.workspace.artifact_name.is_empty() {
            return Err(PipelineError::InvalidConfig {
                message: "workspace.artifact_name must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Descriptive job metadata, logged at the start of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobMetadata {
    pub job_name: String,
    pub version: String,
    pub created_at: Option<String>,
}

impl Default for JobMetadata {
    fn default() -> Self {
        Self {
            job_name: "batch-etl".to_string(),
            version: "1.0".to_string(),
            created_at: None,
        }
    }
}

impl JobMetadata {
    /// Parse `path`, writing default metadata there first if it does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> PipelineResult<Self> {
        load_or_create_json(path.as_ref())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> PipelineResult<T> {
    let raw = fs::read_to_string(path).map_err(|e| PipelineError::read_failure(path, e))?;
    serde_json::from_str(&raw).map_err(|e| PipelineError::InvalidConfig {
        message: format!("{}: {e}", path.display()),
    })
}

fn load_or_create_json<T>(path: &Path) -> PipelineResult<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    if !path.exists() {
        info!(path = %path.display(), "config file not found, writing defaults");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PipelineError::write_failure(parent, e))?;
        }
        let body = serde_json::to_string_pretty(&T::default())
            .map_err(|e| PipelineError::write_failure(path, e))?;
        fs::write(path, body).map_err(|e| PipelineError::write_failure(path, e))?;
    }
    read_json(path)
}
