//! Hopper - resumable dataset transformation and ingestion

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hopper_common::logging::{init_logging, LogConfig, LogLevel};
use hopper_ingest::archive::PairLayout;
use hopper_ingest::config::{IngestConfig, ServiceConfig, TransformConfig};
use hopper_ingest::ingest::{ArchiveIngestPipeline, IngestMode};
use hopper_ingest::service::ChatTransformClient;
use hopper_ingest::sink::LocalDatasetSink;
use hopper_ingest::transform::TransformPipeline;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "hopper")]
#[command(author, version, about = "Resumable dataset transformation and ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Translate CSV columns with checkpointing
    Transform(TransformArgs),

    /// Unpack paired audio/label archives and publish them to a dataset directory
    Ingest(IngestArgs),
}

#[derive(Args, Debug)]
struct TransformArgs {
    /// Input CSV file
    #[arg(short, long)]
    input: PathBuf,

    /// Comma-separated columns to transform
    #[arg(short, long, value_delimiter = ',', required = true)]
    fields: Vec<String>,

    /// Output CSV (default: <input_stem>_translated.csv next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Units per batch
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Processed units between checkpoints (0 disables)
    #[arg(long)]
    checkpoint_interval: Option<usize>,

    /// Concurrent service calls within a batch
    #[arg(long)]
    max_workers: Option<usize>,

    /// Directory for checkpoint files
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Suffix of the output column for each field
    #[arg(long)]
    suffix: Option<String>,

    /// Service API key
    #[arg(long, env = "HOPPER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Chat model used for translation
    #[arg(long)]
    model: Option<String>,

    /// Language to translate into
    #[arg(long)]
    target_language: Option<String>,
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Directory containing the Validation/ and Training/ splits
    #[arg(long)]
    base_path: PathBuf,

    /// Output dataset directory
    #[arg(long)]
    sink_dir: PathBuf,

    /// Which splits to ingest: test, validation, training or all
    #[arg(long, default_value = "test")]
    mode: IngestMode,

    /// Archive pairs per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Parent directory of the per-batch staging workspaces
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Concurrent archive extractions within a batch
    #[arg(long)]
    max_workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("hopper")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Transform(args) => transform(args).await,
        Command::Ingest(args) => ingest(args).await,
    }
}

async fn transform(args: TransformArgs) -> Result<()> {
    let mut config = TransformConfig::from_env()?.with_progress(true);
    if let Some(n) = args.chunk_size {
        config = config.with_chunk_size(n);
    }
    if let Some(n) = args.checkpoint_interval {
        config = config.with_checkpoint_interval(n);
    }
    if let Some(n) = args.max_workers {
        config = config.with_max_workers(n);
    }
    if let Some(dir) = args.checkpoint_dir {
        config = config.with_checkpoint_dir(dir);
    }
    if let Some(suffix) = args.suffix {
        config = config.with_output_suffix(suffix);
    }

    let mut service_config = ServiceConfig::from_env()?;
    if let Some(key) = args.api_key {
        service_config = service_config.with_api_key(key);
    }
    if let Some(model) = args.model {
        service_config = service_config.with_model(model);
    }
    if let Some(language) = args.target_language {
        service_config = service_config.with_target_language(language);
    }
    if service_config.api_key.is_none() {
        warn!("No API key configured (HOPPER_API_KEY or OPENAI_API_KEY)");
    }

    let service = Arc::new(ChatTransformClient::new(service_config)?);
    let pipeline = TransformPipeline::new(config, service);

    let report = pipeline
        .run(&args.input, &args.fields, args.output.as_deref())
        .await
        .with_context(|| format!("Transformation of {} failed", args.input.display()))?;

    info!(
        output = ?report.output_path,
        transformed = report.transformed(),
        soft_failed = report.soft_failed(),
        checkpoints = report.checkpoints_saved,
        "Transformation complete"
    );
    Ok(())
}

async fn ingest(args: IngestArgs) -> Result<()> {
    let mut config = IngestConfig::from_env()?.with_progress(true);
    if let Some(n) = args.batch_size {
        config = config.with_batch_size(n);
    }
    if let Some(dir) = args.staging_dir {
        config = config.with_staging_root(dir);
    }
    if let Some(n) = args.max_workers {
        config = config.with_max_workers(n);
    }

    let sink = Arc::new(LocalDatasetSink::new(&args.sink_dir));
    let mut pipeline = ArchiveIngestPipeline::new(config, sink);

    let reports = pipeline
        .run(&args.base_path, args.mode, &PairLayout::default())
        .await
        .with_context(|| format!("Ingestion from {} failed", args.base_path.display()))?;

    for report in &reports {
        info!(
            split = %report.split,
            pairs = report.pairs,
            records = report.records_published,
            dropped = report.unmatched_content + report.unmatched_labels + report.malformed_labels,
            "Split ingested"
        );
    }
    info!(sink = %args.sink_dir.display(), "Ingestion complete");
    Ok(())
}
