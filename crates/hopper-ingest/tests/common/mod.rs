//! Shared fixtures for the pipeline integration tests
//!
//! - [`ScriptedService`]: deterministic transformation service with
//!   configurable transient and fatal failures
//! - [`RecordingSink`]: in-memory sink that records every publish
//! - archive builders for zip and tar.gz fixture trees

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use hopper_ingest::labels::IngestionRecord;
use hopper_ingest::records::RecordTable;
use hopper_ingest::retry::RetryPolicy;
use hopper_ingest::service::{ServiceError, TransformService};
use hopper_ingest::sink::{DatasetSink, PublishMode, PublishReceipt, PublishRequest, SinkError};
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Transformation service
// ============================================================================

/// Prefix the scripted service puts in front of every successful result
pub const TRANSLATED: &str = "[ko] ";

/// Transformation service whose behaviour is keyed on the input text
#[derive(Default)]
pub struct ScriptedService {
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
    /// Inputs that fail with a retryable error on every attempt
    always_fail: HashSet<String>,
    /// Input that fails with an authorisation error
    fatal_on: Option<String>,
    /// Per-call latency derived from the input length, to shuffle completion order
    jitter: bool,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, input: &str) -> Self {
        self.always_fail.insert(input.to_string());
        self
    }

    pub fn fatal_on(mut self, input: &str) -> Self {
        self.fatal_on = Some(input.to_string());
        self
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransformService for ScriptedService {
    async fn transform(&self, _field: &str, input: &str) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(input.to_string());

        if self.jitter {
            let hash = input.bytes().fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            tokio::time::sleep(Duration::from_millis(hash % 40)).await;
        }

        if self.fatal_on.as_deref() == Some(input) {
            return Err(ServiceError::Unauthorized {
                status: 401,
                message: "invalid api key".to_string(),
            });
        }
        if self.always_fail.contains(input) {
            return Err(ServiceError::Status {
                status: 503,
                message: "overloaded".to_string(),
            });
        }

        Ok(format!("{TRANSLATED}{input}"))
    }
}

/// Retry policy without backoff sleeps
pub fn no_backoff() -> RetryPolicy {
    RetryPolicy::new(3, Duration::ZERO)
}

/// CSV with `rows` rows: `id,text,title`, text is `row N`, title is `title N`
pub fn write_rows_csv(path: &Path, rows: usize) {
    let mut body = String::from("id,text,title\n");
    for i in 0..rows {
        body.push_str(&format!("{i},row {i},title {i}\n"));
    }
    std::fs::write(path, body).unwrap();
}

pub fn column(table: &RecordTable, name: &str) -> Vec<Option<String>> {
    let col = table.column_index(name).unwrap();
    (0..table.len()).map(|row| table.get(row, col).map(str::to_string)).collect()
}

// ============================================================================
// Sink
// ============================================================================

/// One publish as seen by the [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub split: String,
    pub mode: PublishMode,
    pub label: String,
    pub records: Vec<IngestionRecord>,
    pub split_total: usize,
}

#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<Published>>,
    reject_with: Option<SinkError>,
}

impl RecordingSink {
    pub fn rejecting(err: SinkError) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            reject_with: Some(err),
        }
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatasetSink for RecordingSink {
    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt, SinkError> {
        if let Some(err) = &self.reject_with {
            return Err(err.clone());
        }

        // Audio must still be readable while the batch is being published
        for record in request.records {
            assert!(Path::new(&record.audio).is_file(), "audio gone before publish: {}", record.audio);
        }

        let mut published = self.published.lock().unwrap();
        let previous: usize = match request.mode {
            PublishMode::Create => 0,
            PublishMode::Append => published
                .iter()
                .rev()
                .find(|p| p.split == request.split)
                .map(|p| p.split_total)
                .unwrap_or(0),
        };
        let split_total = previous + request.records.len();

        published.push(Published {
            split: request.split.to_string(),
            mode: request.mode,
            label: request.commit_label.clone(),
            records: request.records.to_vec(),
            split_total,
        });

        Ok(PublishReceipt {
            records_written: request.records.len(),
            split_total,
        })
    }
}

// ============================================================================
// Archives
// ============================================================================

pub fn write_zip(path: &Path, entries: &[(String, Vec<u8>)]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in entries {
        zip.start_file(name.as_str(), options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

pub fn write_tar_gz(path: &Path, entries: &[(String, Vec<u8>)]) {
    let encoder = flate2::write::GzEncoder::new(File::create(path).unwrap(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Label JSON for one utterance
pub fn label_json(dialog_id: &str, text: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "DialogID": dialog_id,
        "Category": "일상",
        "SubCategory": "학교",
        "Speakers": [{"Gender": "남", "AgeGroup": "20대", "Locate": "경기"}],
        "Dialogs": [{
            "SpeakerText": text,
            "WordInfo": [{"WordType": "은어", "WordDefine": "뜻"}]
        }]
    }))
    .unwrap()
}

/// Archive flavour for [`SplitFixture::add_pair`]
#[derive(Debug, Clone, Copy)]
pub enum Flavour {
    Zip,
    TarGz,
}

impl Flavour {
    fn extension(self) -> &'static str {
        match self {
            Flavour::Zip => "zip",
            Flavour::TarGz => "tar.gz",
        }
    }

    fn write(self, path: &Path, entries: &[(String, Vec<u8>)]) {
        match self {
            Flavour::Zip => write_zip(path, entries),
            Flavour::TarGz => write_tar_gz(path, entries),
        }
    }
}

/// Builds `<base>/<dir>/{01.원천데이터,02.라벨링데이터}` trees
pub struct SplitFixture<'a> {
    pub base: &'a Path,
    pub dir: &'static str,
    pub content_prefix: &'static str,
    pub label_prefix: &'static str,
}

impl<'a> SplitFixture<'a> {
    pub fn validation(base: &'a Path) -> Self {
        Self {
            base,
            dir: "Validation",
            content_prefix: "VS_",
            label_prefix: "VL_",
        }
    }

    pub fn training(base: &'a Path) -> Self {
        Self {
            base,
            dir: "Training",
            content_prefix: "TS_",
            label_prefix: "TL_",
        }
    }

    fn content_dir(&self) -> std::path::PathBuf {
        let dir = self.base.join(self.dir).join("01.원천데이터");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn label_dir(&self) -> std::path::PathBuf {
        let dir = self.base.join(self.dir).join("02.라벨링데이터");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Add a pair named `body` whose content holds `stems` as `.wav` and whose
    /// label archive holds `labelled` as `.json`
    pub fn add_pair(&self, body: &str, flavour: Flavour, stems: &[&str], labelled: &[&str]) {
        let ext = flavour.extension();
        let audio: Vec<(String, Vec<u8>)> = stems
            .iter()
            .map(|s| (format!("{body}/wav/{s}.wav"), format!("RIFF-{s}").into_bytes()))
            .collect();
        let labels: Vec<(String, Vec<u8>)> = labelled
            .iter()
            .map(|s| (format!("{body}/json/{s}.json"), label_json(&format!("D-{s}"), &format!("text {s}"))))
            .collect();

        flavour.write(&self.content_dir().join(format!("{}{body}.{ext}", self.content_prefix)), &audio);
        flavour.write(&self.label_dir().join(format!("{}{body}.{ext}", self.label_prefix)), &labels);
    }

    /// Content archive without a label counterpart
    pub fn add_orphan_content(&self, body: &str) {
        write_zip(
            &self.content_dir().join(format!("{}{body}.zip", self.content_prefix)),
            &[("x.wav".to_string(), b"RIFF".to_vec())],
        );
        let _ = self.label_dir();
    }

    /// Pair whose content archive is not a valid zip
    pub fn add_corrupt_pair(&self, body: &str) {
        std::fs::write(
            self.content_dir().join(format!("{}{body}.zip", self.content_prefix)),
            b"this is not a zip archive",
        )
        .unwrap();
        write_zip(
            &self.label_dir().join(format!("{}{body}.zip", self.label_prefix)),
            &[("x.json".to_string(), label_json("D-x", "x"))],
        );
    }
}

/// Number of entries directly under `dir` (0 when it does not exist)
pub fn entry_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}
