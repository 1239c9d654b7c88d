//! Durable checkpoints for resumable transformation runs
//!
//! A checkpoint is two files in the checkpoint directory:
//!
//! - `<run_key>_checkpoint.<generation>.csv`: full snapshot of the record table
//! - `<run_key>_progress.json`: [`ProgressDescriptor`] naming its snapshot
//!
//! [`CheckpointStore::save`] writes a fresh snapshot generation, atomically
//! replaces the descriptor, and only then removes the superseded generation.
//! A reader therefore always finds a descriptor that points at a complete
//! snapshot, whichever instant the writer was interrupted at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{IngestError, Result};
use crate::records::RecordTable;

/// Progress as of the latest save
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressDescriptor {
    /// Units of `current_field` processed so far
    pub processed_rows: usize,
    pub total_rows: usize,
    /// Requested fields, in processing order
    pub target_fields: Vec<String>,
    pub current_field: String,
    /// File name of the snapshot generation, relative to the checkpoint directory
    pub snapshot: String,
    pub saved_at: DateTime<Utc>,
}

impl ProgressDescriptor {
    /// Whether the stored field set equals `fields`, ignoring order and duplicates
    pub fn matches_fields(&self, fields: &[String]) -> bool {
        let stored: HashSet<&str> = self.target_fields.iter().map(String::as_str).collect();
        let requested: HashSet<&str> = fields.iter().map(String::as_str).collect();
        stored == requested
    }
}

/// Progress values supplied by the pipeline when saving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress<'a> {
    pub processed_rows: usize,
    pub total_rows: usize,
    pub target_fields: &'a [String],
    pub current_field: &'a str,
}

/// A loaded checkpoint
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub progress: ProgressDescriptor,
    pub table: RecordTable,
}

/// Reads and writes checkpoints in one directory
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn progress_path(&self, run_key: &str) -> PathBuf {
        self.dir.join(format!("{run_key}_progress.json"))
    }

    fn snapshot_prefix(run_key: &str) -> String {
        format!("{run_key}_checkpoint.")
    }

    /// Load the checkpoint for `run_key` if it was saved for the same field set.
    ///
    /// A missing, unreadable or mismatched checkpoint yields `Ok(None)`.
    pub fn load(&self, run_key: &str, fields: &[String]) -> Result<Option<Checkpoint>> {
        let progress_path = self.progress_path(run_key);
        if !progress_path.exists() {
            debug!(run_key, "No checkpoint found");
            return Ok(None);
        }

        let progress = match read_descriptor(&progress_path) {
            Ok(progress) => progress,
            Err(e) => {
                warn!(path = %progress_path.display(), error = %e, "Ignoring unreadable checkpoint");
                return Ok(None);
            }
        };

        if !progress.matches_fields(fields) {
            warn!(
                run_key,
                stored = ?progress.target_fields,
                requested = ?fields,
                "Checkpoint was saved for a different field set, starting fresh"
            );
            return Ok(None);
        }

        if !is_plain_file_name(&progress.snapshot) {
            warn!(snapshot = %progress.snapshot, "Ignoring checkpoint with invalid snapshot name");
            return Ok(None);
        }

        let snapshot_path = self.dir.join(&progress.snapshot);
        let table = match RecordTable::from_csv_path(&snapshot_path) {
            Ok(table) => table,
            Err(e) => {
                warn!(
                    path = %snapshot_path.display(),
                    error = %e,
                    "Ignoring checkpoint whose snapshot cannot be read"
                );
                return Ok(None);
            }
        };

        info!(
            run_key,
            current_field = %progress.current_field,
            processed_rows = progress.processed_rows,
            total_rows = progress.total_rows,
            "Resuming from checkpoint"
        );

        Ok(Some(Checkpoint { progress, table }))
    }

    /// Persist `table` and `progress` as the new checkpoint for `run_key`
    pub fn save(&self, run_key: &str, table: &RecordTable, progress: &Progress<'_>) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            IngestError::checkpoint(format!("cannot create {}: {e}", self.dir.display()))
        })?;

        let progress_path = self.progress_path(run_key);
        let superseded = read_descriptor(&progress_path).ok().map(|p| p.snapshot);

        let snapshot = format!("{}{}.csv", Self::snapshot_prefix(run_key), Uuid::new_v4());
        table.save_csv(&self.dir.join(&snapshot))?;

        let descriptor = ProgressDescriptor {
            processed_rows: progress.processed_rows,
            total_rows: progress.total_rows,
            target_fields: progress.target_fields.to_vec(),
            current_field: progress.current_field.to_string(),
            snapshot: snapshot.clone(),
            saved_at: Utc::now(),
        };
        hopper_common::atomic::write_json(&progress_path, &descriptor)?;

        if let Some(old) = superseded.filter(|old| *old != snapshot && is_plain_file_name(old)) {
            remove_if_present(&self.dir.join(old));
        }

        info!(
            run_key,
            current_field = progress.current_field,
            processed_rows = progress.processed_rows,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Delete every checkpoint artifact of `run_key`, returning how many files went
    pub fn clear(&self, run_key: &str) -> Result<usize> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let progress_name = format!("{run_key}_progress.json");
        let snapshot_prefix = Self::snapshot_prefix(run_key);
        let mut removed = 0;

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            let ours = name == progress_name
                || (name.starts_with(&snapshot_prefix) && name.ends_with(".csv"));
            if ours {
                std::fs::remove_file(entry.path()).map_err(|e| {
                    IngestError::checkpoint(format!("cannot remove {name}: {e}"))
                })?;
                removed += 1;
            }
        }

        info!(run_key, removed, "Checkpoint cleared");
        Ok(removed)
    }
}

fn read_descriptor(path: &Path) -> Result<ProgressDescriptor> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}

fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed superseded snapshot"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove superseded snapshot"),
    }
}
