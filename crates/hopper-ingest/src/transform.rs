//! Checkpointed field transformation
//!
//! [`TransformPipeline::run`] loads a CSV, transforms every pending cell of
//! the requested fields batch by batch, checkpoints whenever the processed
//! count crosses an interval boundary, writes the output table and finally
//! clears the checkpoint. If the run stops early, the next run with the same
//! input and field set resumes from the last checkpoint.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::adapter::CallAdapter;
use crate::checkpoint::{CheckpointStore, Progress};
use crate::config::TransformConfig;
use crate::enumerate::{ResumePoint, WorkUnitEnumerator};
use crate::error::{IngestError, Result};
use crate::progress::create_progress_bar;
use crate::records::{RecordTable, UnitStatus};
use crate::scheduler::BatchScheduler;
use crate::service::TransformService;

/// Per-field counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldReport {
    pub field: String,
    pub pending: usize,
    pub transformed: usize,
    pub soft_failed: usize,
    pub batches: usize,
}

/// What a run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformReport {
    pub total_rows: usize,
    pub fields: Vec<FieldReport>,
    pub checkpoints_saved: usize,
    /// Field and processed count the run resumed from
    pub resumed_field: Option<String>,
    pub resumed_rows: usize,
    pub output_path: Option<PathBuf>,
}

impl TransformReport {
    pub fn transformed(&self) -> usize {
        self.fields.iter().map(|f| f.transformed).sum()
    }

    pub fn soft_failed(&self) -> usize {
        self.fields.iter().map(|f| f.soft_failed).sum()
    }

    /// Units handed to the call adapter
    pub fn units_dispatched(&self) -> usize {
        self.fields.iter().map(|f| f.pending).sum()
    }
}

/// True when going from `before` to `after` processed units passes a multiple of `interval`
pub fn checkpoint_due(before: usize, after: usize, interval: usize) -> bool {
    interval > 0 && after / interval > before / interval
}

/// Checkpoint run key for an input file: its stem
pub fn run_key_for(input: &Path) -> String {
    input
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("records")
        .to_string()
}

/// `<stem>_translated.csv` next to the input
pub fn default_output_path(input: &Path) -> PathBuf {
    input.with_file_name(format!("{}_translated.csv", run_key_for(input)))
}

pub struct TransformPipeline {
    config: TransformConfig,
    adapter: CallAdapter,
    store: CheckpointStore,
    enumerator: WorkUnitEnumerator,
    scheduler: BatchScheduler,
}

impl TransformPipeline {
    pub fn new(config: TransformConfig, service: Arc<dyn TransformService>) -> Self {
        Self {
            adapter: CallAdapter::new(service, config.retry),
            store: CheckpointStore::new(&config.checkpoint_dir),
            enumerator: WorkUnitEnumerator::new(&config.output_suffix),
            scheduler: BatchScheduler::new(config.chunk_size, config.max_workers),
            config,
        }
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    pub fn checkpoint_store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Transform `fields` of the CSV at `input` and write the result.
    ///
    /// The checkpoint is cleared only after the output is written.
    pub async fn run(
        &self,
        input: &Path,
        fields: &[String],
        output: Option<&Path>,
    ) -> Result<TransformReport> {
        let run_key = run_key_for(input);
        let output_path = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_output_path(input));

        info!(input = %input.display(), run_key = %run_key, "Loading records");
        let table = RecordTable::from_csv_path(input)?;

        let (table, mut report) = self.process(&run_key, table, fields).await?;

        table.save_csv(&output_path)?;
        info!(output = %output_path.display(), rows = table.len(), "Output written");

        self.store.clear(&run_key)?;
        report.output_path = Some(output_path);

        Ok(report)
    }

    /// Transform `fields` of `table` in memory, checkpointing under `run_key`.
    ///
    /// Does not clear the checkpoint.
    pub async fn process(
        &self,
        run_key: &str,
        table: RecordTable,
        fields: &[String],
    ) -> Result<(RecordTable, TransformReport)> {
        let fields = dedup_fields(fields);
        if fields.is_empty() {
            return Err(IngestError::config("no fields requested"));
        }

        let missing = table.missing_columns(&fields);
        if !missing.is_empty() {
            return Err(IngestError::MissingFields(missing));
        }

        let mut table = table;
        let mut report = TransformReport {
            total_rows: table.len(),
            ..TransformReport::default()
        };

        let resume = match self.store.load(run_key, &fields)? {
            Some(checkpoint) if checkpoint.table.missing_columns(&fields).is_empty() => {
                let resume = ResumePoint::from(&checkpoint.progress);
                report.resumed_field = Some(resume.field.clone());
                report.resumed_rows = resume.processed_rows;
                table = checkpoint.table;
                Some(resume)
            }
            Some(_) => {
                info!(run_key, "Checkpoint snapshot lacks requested fields, starting fresh");
                None
            }
            None => None,
        };

        if resume.is_none() {
            info!(run_key, fields = ?fields, rows = table.len(), "Starting fresh run");
        }

        for pass in self.enumerator.passes(&fields, resume.as_ref()) {
            let out_col = table.ensure_column(&self.enumerator.output_column(&pass.field));
            let pending = self.enumerator.pending(&table, &pass);

            let mut field_report = FieldReport {
                field: pass.field.clone(),
                pending: pending.len(),
                ..FieldReport::default()
            };

            if pending.is_empty() {
                info!(field = %pass.field, "Nothing pending");
                report.fields.push(field_report);
                continue;
            }

            let batches = self.scheduler.plan(pending);
            field_report.batches = batches.len();
            info!(
                field = %pass.field,
                pending = field_report.pending,
                batches = batches.len(),
                "Processing field"
            );

            let bar = create_progress_bar(
                field_report.pending as u64,
                &pass.field,
                self.config.show_progress,
            );
            let mut processed = pass.skip_below;

            for batch in &batches {
                debug!(
                    field = %pass.field,
                    batch = batch.number(),
                    total = batch.total,
                    units = batch.len(),
                    "Dispatching batch"
                );

                let outcomes = self
                    .scheduler
                    .dispatch(batch, |unit| self.adapter.call(unit))
                    .await?;

                for unit in outcomes {
                    match unit.status {
                        UnitStatus::Done => field_report.transformed += 1,
                        UnitStatus::SoftFailed => field_report.soft_failed += 1,
                        UnitStatus::Pending => {}
                    }
                    table.set(unit.row, out_col, unit.transformed_value);
                }
                bar.inc(batch.len() as u64);

                let before = processed;
                processed += batch.len();
                if checkpoint_due(before, processed, self.config.checkpoint_interval) {
                    self.store.save(
                        run_key,
                        &table,
                        &Progress {
                            processed_rows: processed,
                            total_rows: table.len(),
                            target_fields: &fields,
                            current_field: &pass.field,
                        },
                    )?;
                    report.checkpoints_saved += 1;
                }
            }

            bar.finish_and_clear();
            info!(
                field = %pass.field,
                transformed = field_report.transformed,
                soft_failed = field_report.soft_failed,
                "Field complete"
            );
            report.fields.push(field_report);
        }

        Ok((table, report))
    }
}

/// Requested fields in order, first occurrence wins
fn dedup_fields(fields: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    fields
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty() && seen.insert(f.to_string()))
        .map(str::to_string)
        .collect()
}
