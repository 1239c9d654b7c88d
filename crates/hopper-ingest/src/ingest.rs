//! Batched archive ingestion
//!
//! For every batch of archive pairs: acquire a staging workspace, unpack and
//! match the pairs on the bounded pool, publish the resulting records, then
//! release the workspace. The workspace is released before any error from the
//! batch is returned.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::archive::{discover_pairs, ArchivePair, PairLayout, PrefixScheme};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::labels::IngestionRecord;
use crate::progress::{create_progress_bar, format_bytes};
use crate::scheduler::{Batch, BatchScheduler};
use crate::sink::{DatasetSink, SinkPublisher};
use crate::staging::{match_records, stage_pair, MatchOutcome, StagingWorkspace, StagingWorkspaceManager};

/// Pairs ingested in test mode
pub const TEST_MODE_PAIRS: usize = 2;

/// Which splits an ingestion run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// First two validation pairs only
    Test,
    Validation,
    Training,
    /// Validation, then training
    All,
}

impl FromStr for IngestMode {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "test" => Ok(IngestMode::Test),
            "validation" => Ok(IngestMode::Validation),
            "training" => Ok(IngestMode::Training),
            "all" => Ok(IngestMode::All),
            other => Err(IngestError::config(format!(
                "unknown ingest mode '{other}' (expected test, validation, training or all)"
            ))),
        }
    }
}

/// One source split: where its archives live and what to publish it as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSource {
    /// Directory name under the base path
    pub dir_name: &'static str,
    /// Split name at the sink
    pub split: &'static str,
    pub scheme: PrefixScheme,
    pub limit: Option<usize>,
}

impl SplitSource {
    pub fn validation() -> Self {
        Self {
            dir_name: "Validation",
            split: "validation",
            scheme: PrefixScheme::validation(),
            limit: None,
        }
    }

    pub fn training() -> Self {
        Self {
            dir_name: "Training",
            split: "train",
            scheme: PrefixScheme::training(),
            limit: None,
        }
    }

    /// Discover this split's pairs under `base`
    pub fn pairs(&self, base: &Path, layout: &PairLayout) -> Result<Vec<ArchivePair>> {
        let mut pairs = discover_pairs(&base.join(self.dir_name), layout, &self.scheme)?;
        if let Some(limit) = self.limit {
            pairs.truncate(limit);
        }
        Ok(pairs)
    }
}

impl IngestMode {
    /// Splits to ingest, in order
    pub fn sources(&self) -> Vec<SplitSource> {
        match self {
            IngestMode::Test => vec![SplitSource {
                limit: Some(TEST_MODE_PAIRS),
                ..SplitSource::validation()
            }],
            IngestMode::Validation => vec![SplitSource::validation()],
            IngestMode::Training => vec![SplitSource::training()],
            IngestMode::All => vec![SplitSource::validation(), SplitSource::training()],
        }
    }
}

/// Counts for one split
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub split: String,
    pub pairs: usize,
    pub batches: usize,
    pub publishes: usize,
    pub records_published: usize,
    pub unmatched_content: usize,
    pub unmatched_labels: usize,
    pub malformed_labels: usize,
}

impl IngestReport {
    fn absorb(&mut self, outcome: &MatchOutcome) {
        self.unmatched_content += outcome.unmatched_content;
        self.unmatched_labels += outcome.unmatched_labels;
        self.malformed_labels += outcome.malformed_labels;
    }
}

pub struct ArchiveIngestPipeline {
    config: IngestConfig,
    staging: StagingWorkspaceManager,
    scheduler: BatchScheduler,
    publisher: SinkPublisher,
}

impl ArchiveIngestPipeline {
    pub fn new(config: IngestConfig, sink: Arc<dyn DatasetSink>) -> Self {
        Self {
            staging: StagingWorkspaceManager::new(&config.staging_root),
            scheduler: BatchScheduler::new(config.batch_size, config.max_workers),
            publisher: SinkPublisher::new(sink, config.retry),
            config,
        }
    }

    pub fn publisher(&self) -> &SinkPublisher {
        &self.publisher
    }

    /// Ingest every split of `mode` found under `base`
    pub async fn run(&mut self, base: &Path, mode: IngestMode, layout: &PairLayout) -> Result<Vec<IngestReport>> {
        let mut reports = Vec::new();
        for source in mode.sources() {
            let pairs = source.pairs(base, layout)?;
            info!(split = source.split, pairs = pairs.len(), "Ingesting split");
            reports.push(self.ingest_split(source.split, pairs).await?);
        }
        Ok(reports)
    }

    /// Ingest `pairs` into `split`, one batch at a time
    pub async fn ingest_split(&mut self, split: &str, pairs: Vec<ArchivePair>) -> Result<IngestReport> {
        let mut report = IngestReport {
            split: split.to_string(),
            pairs: pairs.len(),
            ..IngestReport::default()
        };

        let batches = self.scheduler.plan(pairs);
        report.batches = batches.len();
        let bar = create_progress_bar(batches.len() as u64, split, self.config.show_progress);

        for batch in &batches {
            info!(
                split,
                batch = batch.number(),
                total = batch.total,
                pairs = batch.len(),
                "Processing batch"
            );

            let workspace = self.staging.acquire(split, batch.number())?;
            let outcome = self.process_batch(&workspace, split, batch, &mut report).await;

            let path = workspace.path().to_path_buf();
            match workspace.release() {
                Ok(()) => debug!(path = %path.display(), "Released staging workspace"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to release staging workspace"),
            }

            outcome?;
            bar.inc(1);
        }

        bar.finish_and_clear();
        info!(
            split,
            records = report.records_published,
            publishes = report.publishes,
            unmatched_content = report.unmatched_content,
            unmatched_labels = report.unmatched_labels,
            malformed_labels = report.malformed_labels,
            "Split complete"
        );
        Ok(report)
    }

    async fn process_batch(
        &mut self,
        workspace: &StagingWorkspace,
        split: &str,
        batch: &Batch<ArchivePair>,
        report: &mut IngestReport,
    ) -> Result<()> {
        let root = workspace.path().to_path_buf();

        // Every blocking task is awaited, even after a failure, so none outlives the workspace
        let staged = self
            .scheduler
            .dispatch_all(batch, |pair| unpack_and_match(root.clone(), pair.clone()))
            .await;

        let mut records: Vec<IngestionRecord> = Vec::new();
        for outcome in staged {
            let outcome = outcome?;
            report.absorb(&outcome);
            records.extend(outcome.records);
        }

        debug!(
            split,
            batch = batch.number(),
            staged = %format_bytes(dir_size(&root)),
            "Batch staged"
        );

        if let Some(receipt) = self.publisher.publish(split, batch.number(), &records).await? {
            report.publishes += 1;
            report.records_published += receipt.records_written;
        }

        Ok(())
    }
}

async fn unpack_and_match(root: PathBuf, pair: ArchivePair) -> Result<MatchOutcome> {
    tokio::task::spawn_blocking(move || {
        let staged = stage_pair(&root, &pair)?;
        match_records(&staged)
    })
    .await
    .map_err(|e| IngestError::Worker(e.to_string()))?
}

/// Total size of regular files under `dir`
fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(t) if t.is_dir() => dir_size(&entry.path()),
            Ok(_) => entry.metadata().map(|m| m.len()).unwrap_or(0),
            Err(_) => 0,
        })
        .sum()
}
