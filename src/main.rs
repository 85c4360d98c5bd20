use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{debug, error, info};

use rust_batch_etl::assembly::FragmentOrder;
use rust_batch_etl::config::{JobMetadata, RunConfig};
use rust_batch_etl::pipeline::run_pipeline;
use rust_batch_etl::transform::DataSetEngine;

/// Slice a Parquet dataset, transform the slices in parallel and assemble one artifact
#[derive(Parser)]
#[command(name = "batch-etl", version)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory the working directories are created under
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Run parameters; written with defaults if missing
    #[arg(long, default_value = "params.json")]
    params: PathBuf,

    /// Job metadata; written with defaults if missing
    #[arg(long, default_value = "metadata.json")]
    metadata: PathBuf,

    /// Rows per slice (overrides params)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Worker pool size (overrides params)
    #[arg(long)]
    workers: Option<usize>,

    /// Source dataset URL or path (overrides params)
    #[arg(long)]
    source: Option<String>,

    /// Transform applied to every slice
    #[arg(long, value_enum, default_value_t = TransformKind::DropNulls)]
    transform: TransformKind,

    /// Order in which fragments are concatenated (overrides params)
    #[arg(long, value_enum)]
    fragment_order: Option<OrderArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum TransformKind {
    Passthrough,
    DropNulls,
    TripMetrics,
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Listing,
    TaskId,
}

impl From<OrderArg> for FragmentOrder {
    fn from(o: OrderArg) -> Self {
        match o {
            OrderArg::Listing => FragmentOrder::Listing,
            OrderArg::TaskId => FragmentOrder::TaskId,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .with_thread_names(cli.verbose >= 1)
        .init();

    debug!("batch-etl started with verbosity level: {}", cli.verbose);

    if let Err(e) = run(cli) {
        error!("Fatal error: {e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let metadata = JobMetadata::load_or_create(&cli.metadata)
        .with_context(|| format!("loading {}", cli.metadata.display()))?;
    let mut config = RunConfig::load_or_create(&cli.params)
        .with_context(|| format!("loading {}", cli.params.display()))?;

    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(workers) = cli.workers {
        config.worker_count = workers;
    }
    if let Some(source) = cli.source {
        config.source_url = source;
    }
    if let Some(order) = cli.fragment_order {
        config.fragment_order = order.into();
    }

    let engine = match cli.transform {
        TransformKind::Passthrough => DataSetEngine::passthrough(),
        TransformKind::DropNulls => DataSetEngine::drop_nulls(),
        TransformKind::TripMetrics => DataSetEngine::trip_metrics(),
    };

    info!(
        job = %metadata.job_name,
        version = %metadata.version,
        source = %config.source_url,
        chunk_size = config.chunk_size,
        workers = config.worker_count,
        transform = engine.name(),
        "starting run"
    );

    let summary = run_pipeline(&config, &cli.base_dir, &engine)?;
    info!("{summary}");
    println!("{summary}");
    Ok(())
}
