//! Dataset sink and split-aware publisher
//!
//! [`SinkPublisher`] decides between create and append per split: the first
//! non-empty publish of a split in this process creates it, every later one
//! appends. The decision lives only in memory, so a run that stops between a
//! publish and its bookkeeping may republish that batch when restarted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

use crate::labels::IngestionRecord;
use crate::retry::RetryPolicy;

/// Records file inside each split directory of a [`LocalDatasetSink`]
pub const DATA_FILE: &str = "data.jsonl";

/// Commit log at the root of a [`LocalDatasetSink`]
pub const COMMIT_LOG: &str = "_commits.jsonl";

const AUDIO_DIR: &str = "audio";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Credentials rejected by the sink
    #[error("sink refused credentials: {0}")]
    Unauthorized(String),

    /// Sink could not be reached or could not store the batch
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishMode {
    Create,
    Append,
}

impl PublishMode {
    pub fn action(&self) -> &'static str {
        match self {
            PublishMode::Create => "Create",
            PublishMode::Append => "Append",
        }
    }
}

/// `"<action> <split> batch <n>"`
pub fn commit_label(mode: PublishMode, split: &str, batch_number: usize) -> String {
    format!("{} {split} batch {batch_number}", mode.action())
}

/// One batch handed to a sink
#[derive(Debug, Clone)]
pub struct PublishRequest<'a> {
    pub split: &'a str,
    pub batch_number: usize,
    pub mode: PublishMode,
    pub commit_label: String,
    pub records: &'a [IngestionRecord],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub records_written: usize,
    /// Records in the split after this publish
    pub split_total: usize,
}

/// Destination of published batches
#[async_trait]
pub trait DatasetSink: Send + Sync {
    /// Store `request.records`. `Create` replaces whatever the split held,
    /// `Append` adds to it and never truncates.
    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, SinkError>;
}

/// Per-split publishing state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSplit {
    pub name: String,
    /// True until the split's first successful publish
    pub first_write: bool,
    pub batches_published: usize,
    pub records_published: usize,
}

impl SinkSplit {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            first_write: true,
            batches_published: 0,
            records_published: 0,
        }
    }
}

pub struct SinkPublisher {
    sink: Arc<dyn DatasetSink>,
    policy: RetryPolicy,
    splits: HashMap<String, SinkSplit>,
}

impl SinkPublisher {
    pub fn new(sink: Arc<dyn DatasetSink>, policy: RetryPolicy) -> Self {
        Self {
            sink,
            policy,
            splits: HashMap::new(),
        }
    }

    pub fn split(&self, name: &str) -> Option<&SinkSplit> {
        self.splits.get(name)
    }

    /// Publish one batch of `split`. Returns `None` for an empty batch.
    pub async fn publish(
        &mut self,
        split: &str,
        batch_number: usize,
        records: &[IngestionRecord],
    ) -> Result<Option<PublishReceipt>, SinkError> {
        if records.is_empty() {
            debug!(split, batch = batch_number, "Empty batch, nothing to publish");
            return Ok(None);
        }

        let state = self
            .splits
            .entry(split.to_string())
            .or_insert_with(|| SinkSplit::new(split));
        let mode = if state.first_write {
            PublishMode::Create
        } else {
            PublishMode::Append
        };

        let request = PublishRequest {
            split,
            batch_number,
            mode,
            commit_label: commit_label(mode, split, batch_number),
            records,
        };

        let sink = &self.sink;
        let receipt = self
            .policy
            .run(|| sink.publish(&request), SinkError::is_retryable)
            .await
            .map_err(|exhausted| exhausted.last_error)?;

        state.first_write = false;
        state.batches_published += 1;
        state.records_published += receipt.records_written;

        info!(
            split,
            batch = batch_number,
            commit = %request.commit_label,
            records = receipt.records_written,
            split_total = receipt.split_total,
            "Published batch"
        );
        Ok(Some(receipt))
    }
}

// ============================================================================
// Local directory sink
// ============================================================================

#[derive(Debug, Serialize)]
struct CommitEntry<'a> {
    label: &'a str,
    split: &'a str,
    mode: PublishMode,
    records: usize,
    sha256: String,
    committed_at: DateTime<Utc>,
}

/// Sink that writes each split as JSON lines plus copied audio under a root
/// directory, and appends every publish to a commit log.
#[derive(Debug)]
pub struct LocalDatasetSink {
    root: PathBuf,
    totals: Mutex<HashMap<String, usize>>,
}

fn unavailable(context: &str, err: impl std::fmt::Display) -> SinkError {
    SinkError::Unavailable(format!("{context}: {err}"))
}

/// Non-empty single path component that is not `.` or `..`
fn is_plain_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(c)), None) if c == std::ffi::OsStr::new(name)
    )
}

impl LocalDatasetSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            totals: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_path(&self, split: &str) -> PathBuf {
        self.root.join(split).join(DATA_FILE)
    }

    /// Copy audio out of staging and serialise the batch as JSON lines
    fn stage_payload(&self, split_dir: &Path, records: &[IngestionRecord]) -> Result<Vec<u8>, SinkError> {
        let audio_dir = split_dir.join(AUDIO_DIR);
        std::fs::create_dir_all(&audio_dir).map_err(|e| unavailable("creating audio dir", e))?;

        let mut payload = Vec::new();
        for record in records {
            let source = Path::new(&record.audio);
            let file_name = source
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| unavailable("audio path has no file name", &record.audio))?;
            if !is_plain_component(&record.pair_id) {
                return Err(unavailable("invalid pair id", &record.pair_id));
            }

            // File names repeat across pairs, so each pair gets its own folder
            let pair_dir = audio_dir.join(&record.pair_id);
            std::fs::create_dir_all(&pair_dir).map_err(|e| unavailable("creating audio dir", e))?;
            std::fs::copy(source, pair_dir.join(file_name))
                .map_err(|e| unavailable(&format!("copying {}", record.audio), e))?;

            let stored = IngestionRecord {
                audio: format!("{AUDIO_DIR}/{}/{file_name}", record.pair_id),
                ..record.clone()
            };
            serde_json::to_writer(&mut payload, &stored).map_err(|e| unavailable("serialising record", e))?;
            payload.push(b'\n');
        }

        Ok(payload)
    }

    fn write_data(&self, mode: PublishMode, path: &Path, payload: &[u8]) -> Result<(), SinkError> {
        match mode {
            PublishMode::Create => {
                hopper_common::atomic::write_bytes(path, payload).map_err(|e| unavailable("writing split", e))
            }
            PublishMode::Append => {
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| unavailable("opening split", e))?;
                file.write_all(payload).map_err(|e| unavailable("appending to split", e))?;
                file.sync_all().map_err(|e| unavailable("syncing split", e))
            }
        }
    }

    fn log_commit(&self, request: &PublishRequest<'_>, payload: &[u8]) -> Result<(), SinkError> {
        let entry = CommitEntry {
            label: &request.commit_label,
            split: request.split,
            mode: request.mode,
            records: request.records.len(),
            sha256: hopper_common::checksum::sha256_hex(payload),
            committed_at: Utc::now(),
        };
        let mut line = serde_json::to_vec(&entry).map_err(|e| unavailable("serialising commit", e))?;
        line.push(b'\n');

        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(COMMIT_LOG))
            .map_err(|e| unavailable("opening commit log", e))?;
        log.write_all(&line).map_err(|e| unavailable("writing commit log", e))
    }

    fn count_lines(path: &Path) -> usize {
        std::fs::read(path)
            .map(|bytes| bytecount_newlines(&bytes))
            .unwrap_or(0)
    }
}

fn bytecount_newlines(bytes: &[u8]) -> usize {
    bytes.iter().filter(|b| **b == b'\n').count()
}

#[async_trait]
impl DatasetSink for LocalDatasetSink {
    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, SinkError> {
        let split_dir = self.root.join(request.split);

        if request.mode == PublishMode::Create && split_dir.exists() {
            std::fs::remove_dir_all(&split_dir).map_err(|e| unavailable("replacing split", e))?;
        }
        std::fs::create_dir_all(&split_dir).map_err(|e| unavailable("creating split dir", e))?;

        let payload = self.stage_payload(&split_dir, request.records)?;
        let data_path = split_dir.join(DATA_FILE);
        self.write_data(request.mode, &data_path, &payload)?;
        self.log_commit(request, &payload)?;

        let written = request.records.len();
        let split_total = {
            let mut totals = self
                .totals
                .lock()
                .map_err(|_| SinkError::Unavailable("split totals lock poisoned".to_string()))?;
            let total = totals
                .entry(request.split.to_string())
                .or_insert_with(|| match request.mode {
                    PublishMode::Create => 0,
                    PublishMode::Append => Self::count_lines(&data_path).saturating_sub(written),
                });
            *total = match request.mode {
                PublishMode::Create => written,
                PublishMode::Append => *total + written,
            };
            *total
        };

        Ok(PublishReceipt {
            records_written: written,
            split_total,
        })
    }
}
