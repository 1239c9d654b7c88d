//! Error types for the batch pipelines
//!
//! Per-unit failures never appear here: the call adapter turns exhausted
//! retries into soft failures, and unmatched archive entries are dropped and
//! counted. Everything in [`IngestError`] stops the run, leaving the last
//! persisted checkpoint as the recovery point.

use thiserror::Error;

use crate::service::ServiceError;
use crate::sink::SinkError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Fatal pipeline errors
#[derive(Error, Debug)]
pub enum IngestError {
    /// Requested fields are not columns of the input table
    #[error("Fields not present in input: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    /// Checkpoint artifacts could not be written or removed
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Ephemeral workspace could not be created or populated
    #[error("Staging error: {context}: {source}")]
    Staging {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Archive could not be read
    #[error("Archive error in {path}: {message}")]
    Archive { path: String, message: String },

    /// Record table could not be parsed or written
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A data row has more cells than the header has columns
    #[error("Row {row} has {cells} cells but the header has {columns} columns")]
    RowTooWide { row: usize, cells: usize, columns: usize },

    /// External transformation service refused the run (e.g. bad credentials)
    #[error("Transformation service error: {0}")]
    Service(#[from] ServiceError),

    /// Sink rejected or could not accept a publish
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] hopper_common::HopperError),

    /// A blocking worker task panicked or was cancelled
    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl IngestError {
    /// Create a staging error with context
    pub fn staging(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Staging {
            context: context.into(),
            source,
        }
    }

    /// Create an archive error
    pub fn archive(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Archive {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
