//! Error types shared by Hopper crates

use thiserror::Error;

/// Result type alias for shared utilities
pub type Result<T> = std::result::Result<T, HopperError>;

/// Errors raised by the common utilities
#[derive(Error, Debug)]
pub enum HopperError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to replace {path}: {source}")]
    Replace {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
