//! Top-level run: reset, partition, dispatch, assemble.
//!
//! Each stage finishes before the next one starts. A fatal condition in any stage stops the run
//! with the corresponding [`PipelineError`]; in particular, a dispatch with any failed item never
//! reaches assembly, so no artifact is written for it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::assembly::{AssembleOptions, AssemblyReport, assemble_with};
use crate::config::RunConfig;
use crate::error::PipelineResult;
use crate::execution::{DispatchOptions, Dispatcher, TracingObserver};
use crate::slicer::{Slicer, Source, discover_slices};
use crate::transform::TransformEngine;
use crate::workspace::reset_directories;

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub slices: usize,
    pub source_rows: usize,
    pub assembly: AssemblyReport,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn artifact_path(&self) -> &PathBuf {
        &self.assembly.output_path
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "success: {} slices, {} source rows, {} rows written to {} ({} fragments skipped) in {:?}",
            self.slices,
            self.source_rows,
            self.assembly.rows,
            self.assembly.output_path.display(),
            self.assembly.fragments_skipped.len(),
            self.elapsed
        )
    }
}

/// Run the whole job for `config`, with the workspace rooted at `base_dir`.
pub fn run_pipeline(
    config: &RunConfig,
    base_dir: &Path,
    engine: &dyn TransformEngine,
) -> PipelineResult<RunSummary> {
    let source = Source::from_location(&config.source_url);
    run_pipeline_from(config, &source, base_dir, engine)
}

/// Like [`run_pipeline`], reading from an explicit `source` instead of `config.source_url`.
pub fn run_pipeline_from(
    config: &RunConfig,
    source: &Source,
    base_dir: &Path,
    engine: &dyn TransformEngine,
) -> PipelineResult<RunSummary> {
    let start = Instant::now();
    config.validate()?;
    let layout = config.workspace.rooted_at(base_dir);

    let reset = reset_directories(&layout.directories())?;
    if !reset.is_clean() {
        warn!(failures = reset.failures.len(), "workspace reset left entries behind");
    }

    let slicer = Slicer::new(config.chunk_size)?.with_fetch_timeout(config.fetch_timeout());
    slicer.partition(source, &layout.slices_dir)?;

    let slices = discover_slices(&layout.slices_dir)?;
    let source_rows = slices.iter().map(|s| s.row_count).sum();
    info!(slices = slices.len(), rows = source_rows, "dispatching slices");

    let dispatcher = Dispatcher::new(DispatchOptions::new(
        config.worker_count,
        &layout.staging_dir,
        &layout.fragments_dir,
    ))?
    .with_observer(Arc::new(TracingObserver));
    dispatcher.run(&slices, engine).into_result()?;

    let assembly = assemble_with(
        &layout.fragments_dir,
        &layout.artifact_path(),
        &AssembleOptions {
            order: config.fragment_order,
            ..Default::default()
        },
    )?;

    Ok(RunSummary {
        slices: slices.len(),
        source_rows,
        assembly,
        elapsed: start.elapsed(),
    })
}
