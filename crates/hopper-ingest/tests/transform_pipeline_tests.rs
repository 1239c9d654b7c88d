//! Integration tests for the checkpointed transformation pipeline
//!
//! Covers batching and checkpoint cadence, soft-failure containment, resume
//! after a fatal error, idempotent re-runs and output ordering under
//! concurrency. The transformation service is scripted; see `common`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{column, no_backoff, write_rows_csv, ScriptedService, TRANSLATED};
use hopper_ingest::checkpoint::{CheckpointStore, Progress};
use hopper_ingest::config::TransformConfig;
use hopper_ingest::records::RecordTable;
use hopper_ingest::transform::TransformPipeline;
use hopper_ingest::IngestError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn fields(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Batch 5, interval 5, one worker
fn small_config(checkpoints: &Path) -> TransformConfig {
    TransformConfig::default()
        .with_chunk_size(5)
        .with_checkpoint_interval(5)
        .with_max_workers(1)
        .with_checkpoint_dir(checkpoints)
        .with_retry(no_backoff())
}

struct Workspace {
    _dir: TempDir,
    input: PathBuf,
    checkpoints: PathBuf,
}

fn workspace(rows: usize) -> Workspace {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("captions.csv");
    let checkpoints = dir.path().join("checkpoints");
    write_rows_csv(&input, rows);
    Workspace {
        input,
        checkpoints,
        _dir: dir,
    }
}

fn expected_text(rows: usize) -> Vec<Option<String>> {
    (0..rows).map(|i| Some(format!("{TRANSLATED}row {i}"))).collect()
}

// ============================================================================
// Batching and checkpoint cadence
// ============================================================================

#[tokio::test]
async fn test_twelve_rows_three_batches_two_checkpoints() {
    let ws = workspace(12);
    let service = Arc::new(ScriptedService::new());
    let pipeline = TransformPipeline::new(small_config(&ws.checkpoints), service.clone());
    let table = RecordTable::from_csv_path(&ws.input).unwrap();

    let (table, report) = pipeline.process("captions", table, &fields(&["text"])).await.unwrap();

    assert_eq!(report.fields[0].batches, 3);
    assert_eq!(report.checkpoints_saved, 2);
    assert_eq!(service.calls(), 12);
    assert_eq!(column(&table, "text_ko"), expected_text(12));

    // The last checkpoint was taken at the 10-unit boundary, not at 12
    let checkpoint = CheckpointStore::new(&ws.checkpoints)
        .load("captions", &fields(&["text"]))
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.progress.processed_rows, 10);
    assert_eq!(checkpoint.progress.total_rows, 12);
    assert_eq!(column(&checkpoint.table, "text_ko")[9], Some(format!("{TRANSLATED}row 9")));
    assert_eq!(column(&checkpoint.table, "text_ko")[10], None);
}

#[tokio::test]
async fn test_run_writes_output_and_clears_checkpoint() {
    let ws = workspace(12);
    let service = Arc::new(ScriptedService::new());
    let pipeline = TransformPipeline::new(small_config(&ws.checkpoints), service.clone());

    let report = pipeline.run(&ws.input, &fields(&["text"]), None).await.unwrap();

    let output = ws.input.with_file_name("captions_translated.csv");
    assert_eq!(report.output_path.as_deref(), Some(output.as_path()));
    let table = RecordTable::from_csv_path(&output).unwrap();
    assert_eq!(table.headers(), &["id", "text", "title", "text_ko"]);
    assert_eq!(column(&table, "text_ko"), expected_text(12));
    assert_eq!(column(&table, "title")[3].as_deref(), Some("title 3"));

    assert_eq!(common::entry_count(&ws.checkpoints), 0);
}

// ============================================================================
// Soft failures
// ============================================================================

#[tokio::test]
async fn test_row_seven_failure_keeps_original_value() {
    let ws = workspace(12);
    let service = Arc::new(ScriptedService::new().failing_on("row 7"));
    let pipeline = TransformPipeline::new(small_config(&ws.checkpoints), service.clone());

    let report = pipeline.run(&ws.input, &fields(&["text"]), None).await.unwrap();

    assert_eq!(report.transformed(), 11);
    assert_eq!(report.soft_failed(), 1);
    // 11 successes plus three attempts for row 7
    assert_eq!(service.calls(), 14);

    let table = RecordTable::from_csv_path(report.output_path.as_ref().unwrap()).unwrap();
    let text_ko = column(&table, "text_ko");
    for (row, value) in text_ko.iter().enumerate() {
        if row == 7 {
            assert_eq!(value.as_deref(), Some("row 7"));
        } else {
            assert_eq!(value, &Some(format!("{TRANSLATED}row {row}")));
        }
    }
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_rerun_over_finished_output_makes_no_calls() {
    let ws = workspace(12);
    let first = TransformPipeline::new(small_config(&ws.checkpoints), Arc::new(ScriptedService::new()));
    let report = first.run(&ws.input, &fields(&["text"]), None).await.unwrap();
    let finished = report.output_path.unwrap();

    let service = Arc::new(ScriptedService::new());
    let second = TransformPipeline::new(small_config(&ws.checkpoints), service.clone());
    let rerun_output = finished.with_file_name("rerun.csv");
    let report = second
        .run(&finished, &fields(&["text"]), Some(&rerun_output))
        .await
        .unwrap();

    assert_eq!(service.calls(), 0);
    assert_eq!(report.units_dispatched(), 0);
    assert_eq!(report.checkpoints_saved, 0);
    assert_eq!(
        RecordTable::from_csv_path(&rerun_output).unwrap(),
        RecordTable::from_csv_path(&finished).unwrap()
    );
}

#[tokio::test]
async fn test_empty_cells_are_not_sent() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("sparse.csv");
    std::fs::write(&input, "id,text\n0,hello\n1,\n2,  \n3,bye\n").unwrap();

    let service = Arc::new(ScriptedService::new());
    let pipeline = TransformPipeline::new(small_config(&dir.path().join("cp")), service.clone());
    let report = pipeline.run(&input, &fields(&["text"]), None).await.unwrap();

    assert_eq!(service.seen(), vec!["hello", "bye"]);
    let table = RecordTable::from_csv_path(report.output_path.as_ref().unwrap()).unwrap();
    assert_eq!(column(&table, "text_ko")[1], None);
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn test_resume_after_fatal_error_completes_every_row() {
    let ws = workspace(12);

    // Crash on row 7: the checkpoint taken after the first batch survives
    let crashing = Arc::new(ScriptedService::new().fatal_on("row 7"));
    let pipeline = TransformPipeline::new(small_config(&ws.checkpoints), crashing.clone());
    let err = pipeline.run(&ws.input, &fields(&["text"]), None).await.unwrap_err();
    assert!(matches!(err, IngestError::Service(_)), "{err}");
    assert!(!ws.input.with_file_name("captions_translated.csv").exists());

    let store = CheckpointStore::new(&ws.checkpoints);
    let checkpoint = store.load("captions", &fields(&["text"])).unwrap().unwrap();
    assert_eq!(checkpoint.progress.processed_rows, 5);

    // Second run resumes at row 5 and finishes the remaining seven rows
    let healthy = Arc::new(ScriptedService::new());
    let pipeline = TransformPipeline::new(small_config(&ws.checkpoints), healthy.clone());
    let report = pipeline.run(&ws.input, &fields(&["text"]), None).await.unwrap();

    assert_eq!(report.resumed_field.as_deref(), Some("text"));
    assert_eq!(report.resumed_rows, 5);
    assert_eq!(healthy.calls(), 7);
    assert_eq!(healthy.seen().first().map(String::as_str), Some("row 5"));

    let table = RecordTable::from_csv_path(report.output_path.as_ref().unwrap()).unwrap();
    assert_eq!(column(&table, "text_ko"), expected_text(12));
    assert_eq!(common::entry_count(&ws.checkpoints), 0);
}

#[tokio::test]
async fn test_resume_continues_with_later_fields() {
    let ws = workspace(6);
    let config = || small_config(&ws.checkpoints).with_chunk_size(2).with_checkpoint_interval(2);

    // Fails on the second field after its first checkpoint
    let crashing = Arc::new(ScriptedService::new().fatal_on("title 3"));
    let pipeline = TransformPipeline::new(config(), crashing);
    assert!(pipeline.run(&ws.input, &fields(&["text", "title"]), None).await.is_err());

    let healthy = Arc::new(ScriptedService::new());
    let pipeline = TransformPipeline::new(config(), healthy.clone());
    let report = pipeline.run(&ws.input, &fields(&["text", "title"]), None).await.unwrap();

    // The text field was finished before the crash, so nothing of it is pending
    assert_eq!(report.resumed_field.as_deref(), Some("title"));
    assert!(healthy.seen().iter().all(|s| s.starts_with("title")));
    assert_eq!(healthy.calls(), 4);

    let table = RecordTable::from_csv_path(report.output_path.as_ref().unwrap()).unwrap();
    assert_eq!(column(&table, "text_ko"), expected_text(6));
    assert!(column(&table, "title_ko").iter().all(|v| v.as_deref().is_some_and(|s| s.starts_with(TRANSLATED))));
}

#[tokio::test]
async fn test_resume_with_reordered_fields_visits_every_field() {
    let ws = workspace(4);
    let config = || small_config(&ws.checkpoints).with_chunk_size(2).with_checkpoint_interval(2);

    // Stops inside the first field, after its first checkpoint
    let crashing = Arc::new(ScriptedService::new().fatal_on("row 3"));
    let pipeline = TransformPipeline::new(config(), crashing);
    assert!(pipeline.run(&ws.input, &fields(&["text", "title"]), None).await.is_err());

    let healthy = Arc::new(ScriptedService::new());
    let pipeline = TransformPipeline::new(config(), healthy.clone());
    let report = pipeline.run(&ws.input, &fields(&["title", "text"]), None).await.unwrap();

    assert_eq!(report.resumed_field.as_deref(), Some("text"));
    assert_eq!(
        healthy.seen(),
        vec!["title 0", "title 1", "title 2", "title 3", "row 2", "row 3"]
    );

    let table = RecordTable::from_csv_path(report.output_path.as_ref().unwrap()).unwrap();
    assert_eq!(column(&table, "text_ko"), expected_text(4));
    assert_eq!(
        column(&table, "title_ko"),
        (0..4).map(|i| Some(format!("{TRANSLATED}title {i}"))).collect::<Vec<_>>()
    );
    assert_eq!(common::entry_count(&ws.checkpoints), 0);
}

#[tokio::test]
async fn test_checkpoint_for_other_fields_is_ignored() {
    let ws = workspace(4);
    let store = CheckpointStore::new(&ws.checkpoints);
    let stale_fields = fields(&["title"]);
    store
        .save(
            "captions",
            &RecordTable::from_csv_path(&ws.input).unwrap(),
            &Progress {
                processed_rows: 3,
                total_rows: 4,
                target_fields: &stale_fields,
                current_field: "title",
            },
        )
        .unwrap();

    let service = Arc::new(ScriptedService::new());
    let pipeline = TransformPipeline::new(small_config(&ws.checkpoints), service.clone());
    let report = pipeline.run(&ws.input, &fields(&["text"]), None).await.unwrap();

    assert_eq!(report.resumed_field, None);
    assert_eq!(service.calls(), 4);
    assert_eq!(common::entry_count(&ws.checkpoints), 0);
}

// ============================================================================
// Validation and ordering
// ============================================================================

#[tokio::test]
async fn test_missing_fields_are_reported() {
    let ws = workspace(3);
    let service = Arc::new(ScriptedService::new());
    let pipeline = TransformPipeline::new(small_config(&ws.checkpoints), service.clone());

    let err = pipeline
        .run(&ws.input, &fields(&["text", "summary"]), None)
        .await
        .unwrap_err();

    match err {
        IngestError::MissingFields(missing) => assert_eq!(missing, vec!["summary"]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(service.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_completion_keeps_row_order() {
    let ws = workspace(40);
    let service = Arc::new(ScriptedService::new().with_jitter());
    let config = small_config(&ws.checkpoints)
        .with_chunk_size(16)
        .with_max_workers(6)
        .with_checkpoint_interval(0);
    let pipeline = TransformPipeline::new(config, service.clone());

    let report = pipeline.run(&ws.input, &fields(&["text"]), None).await.unwrap();

    assert_eq!(report.fields[0].batches, 3);
    assert_eq!(report.checkpoints_saved, 0);
    let table = RecordTable::from_csv_path(report.output_path.as_ref().unwrap()).unwrap();
    assert_eq!(column(&table, "text_ko"), expected_text(40));
}
