//! Per-batch ephemeral workspaces
//!
//! Each ingestion batch unpacks its archives into its own uniquely named
//! directory under the staging root. The directory is a [`TempDir`], so it is
//! removed when the workspace is released or dropped, on success, error or
//! panic alike.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::archive::{extract_matching, ArchivePair};
use crate::error::{IngestError, Result};
use crate::labels::{IngestionRecord, LabelDocument};

pub const CONTENT_EXTENSION: &str = ".wav";
pub const LABEL_EXTENSION: &str = ".json";

const CONTENT_SUBDIR: &str = "audio";
const LABEL_SUBDIR: &str = "label";

/// Creates workspaces under one root directory
#[derive(Debug, Clone)]
pub struct StagingWorkspaceManager {
    root: PathBuf,
}

impl StagingWorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh workspace for batch `batch_number` of `split`
    pub fn acquire(&self, split: &str, batch_number: usize) -> Result<StagingWorkspace> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            IngestError::staging(format!("creating staging root {}", self.root.display()), e)
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("hopper_{split}_b{batch_number}_"))
            .tempdir_in(&self.root)
            .map_err(|e| IngestError::staging("creating batch workspace", e))?;

        debug!(path = %dir.path().display(), split, batch = batch_number, "Acquired staging workspace");
        Ok(StagingWorkspace { dir })
    }
}

/// A batch's scratch directory; removed on release or drop
#[derive(Debug)]
pub struct StagingWorkspace {
    dir: TempDir,
}

impl StagingWorkspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the workspace now, reporting failures instead of ignoring them
    pub fn release(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|e| IngestError::staging(format!("removing {}", path.display()), e))
    }
}

/// Where one pair was unpacked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPair {
    pub id: String,
    pub content_dir: PathBuf,
    pub label_dir: PathBuf,
}

/// Unpack `pair` under `workspace_root/<id>/{audio,label}`
pub fn stage_pair(workspace_root: &Path, pair: &ArchivePair) -> Result<StagedPair> {
    let pair_dir = workspace_root.join(&pair.id);
    let content_dir = pair_dir.join(CONTENT_SUBDIR);
    let label_dir = pair_dir.join(LABEL_SUBDIR);

    // The workspace root must already exist; a released workspace is never recreated
    std::fs::create_dir(&pair_dir)
        .and_then(|_| std::fs::create_dir(&content_dir))
        .and_then(|_| std::fs::create_dir(&label_dir))
        .map_err(|e| IngestError::staging(format!("creating {}", pair_dir.display()), e))?;

    let audio = extract_matching(&pair.content, &content_dir, CONTENT_EXTENSION)?;
    let labels = extract_matching(&pair.label, &label_dir, LABEL_EXTENSION)?;
    debug!(pair = %pair.id, audio, labels, "Staged archive pair");

    Ok(StagedPair {
        id: pair.id.clone(),
        content_dir,
        label_dir,
    })
}

/// Records of one staged pair plus what had to be dropped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    pub records: Vec<IngestionRecord>,
    pub unmatched_content: usize,
    pub unmatched_labels: usize,
    pub malformed_labels: usize,
}

impl MatchOutcome {
    pub fn dropped(&self) -> usize {
        self.unmatched_content + self.unmatched_labels + self.malformed_labels
    }
}

/// Map file stem to path for files in `dir` ending in `extension`
fn files_by_stem(dir: &Path, extension: &str) -> Result<BTreeMap<String, PathBuf>> {
    let mut files = BTreeMap::new();
    let entries =
        std::fs::read_dir(dir).map_err(|e| IngestError::staging(format!("listing {}", dir.display()), e))?;

    for entry in entries {
        let entry = entry.map_err(|e| IngestError::staging(format!("listing {}", dir.display()), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.len() > extension.len() && name.to_ascii_lowercase().ends_with(extension) {
            let stem = name[..name.len() - extension.len()].to_string();
            files.insert(stem, entry.path());
        }
    }

    Ok(files)
}

/// Join audio and label files of a staged pair by file stem
pub fn match_records(staged: &StagedPair) -> Result<MatchOutcome> {
    let audio = files_by_stem(&staged.content_dir, CONTENT_EXTENSION)?;
    let labels = files_by_stem(&staged.label_dir, LABEL_EXTENSION)?;
    let mut outcome = MatchOutcome::default();

    for (stem, label_path) in &labels {
        let Some(audio_path) = audio.get(stem) else {
            outcome.unmatched_labels += 1;
            continue;
        };

        let bytes = std::fs::read(label_path)
            .map_err(|e| IngestError::staging(format!("reading {}", label_path.display()), e))?;
        match LabelDocument::parse(&bytes) {
            Ok(doc) => outcome.records.push(doc.to_record(&staged.id, stem.as_str(), audio_path)),
            Err(e) => {
                warn!(pair = %staged.id, label = %stem, error = %e, "Malformed label file, dropping");
                outcome.malformed_labels += 1;
            }
        }
    }

    let label_stems: BTreeSet<&String> = labels.keys().collect();
    outcome.unmatched_content = audio.keys().filter(|stem| !label_stems.contains(stem)).count();

    if outcome.unmatched_content + outcome.unmatched_labels > 0 {
        warn!(
            pair = %staged.id,
            unmatched_content = outcome.unmatched_content,
            unmatched_labels = outcome.unmatched_labels,
            "Dropped entries without a counterpart"
        );
    }

    Ok(outcome)
}
