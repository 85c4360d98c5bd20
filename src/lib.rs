//! `rust-batch-etl` runs a local split → parallel map → reduce job over a Parquet dataset.
//!
//! A run has four stages, each finishing before the next starts:
//!
//! 1. [`workspace::reset_directories`] makes the working directories exist and be empty.
//! 2. [`slicer::Slicer`] fetches the source and writes `ceil(rows / chunk_size)` slice files.
//! 3. [`execution::Dispatcher`] copies every slice into a private staging file and hands it to a
//!    [`transform::TransformEngine`] on a bounded rayon pool. Any failed item fails the run.
//! 4. [`assembly::assemble`] validates the per-slice result fragments and merges them into one
//!    zstd-compressed Parquet artifact.
//!
//! [`pipeline::run_pipeline`] sequences the stages from a [`config::RunConfig`].
//!
//! ## Quick example
//!
//! ```no_run
//! use std::path::Path;
//! use rust_batch_etl::config::RunConfig;
//! use rust_batch_etl::pipeline::run_pipeline;
//! use rust_batch_etl::transform::DataSetEngine;
//!
//! # fn main() -> Result<(), rust_batch_etl::PipelineError> {
//! let config = RunConfig {
//!     source_url: "trips.parquet".to_string(),
//!     chunk_size: 5_000,
//!     worker_count: 3,
//!     ..RunConfig::default()
//! };
//! let summary = run_pipeline(&config, Path::new("work"), &DataSetEngine::drop_nulls())?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom transforms
//!
//! Any `Fn(&Path, &str, &Path) -> Result<(), TransformError>` is an engine. It receives the
//! staged slice, the task id and the fragments directory, and must write
//! `chunk_result_{task_id}.txt` there (see [`transform::write_fragment`]).
//!
//! ## Modules
//!
//! - [`config`]: run parameters and job metadata (`params.json`, `metadata.json`)
//! - [`workspace`]: working directory reset
//! - [`slicer`]: source fetch and partitioning
//! - [`execution`]: worker pool, work items, dispatch events and metrics
//! - [`transform`]: engine boundary and the fragment file format
//! - [`assembly`]: fragment merge and Parquet output
//! - [`types`]: in-memory dataset types
//! - [`error`]: error types used across stages

pub mod assembly;
pub mod config;
pub mod error;
pub mod execution;
pub mod pipeline;
pub mod slicer;
pub mod transform;
pub mod types;
pub mod workspace;

pub use error::{ItemError, PipelineError, PipelineResult, TransformError};
