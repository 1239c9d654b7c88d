//! Hopper Common Library
//!
//! Shared utilities for the Hopper batch pipelines.
//!
//! # Overview
//!
//! - **Error Handling**: [`HopperError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Checksums**: SHA-256 digests for published payloads
//! - **Atomic files**: write-then-rename replacement so readers never observe
//!   a half-written file
//!
//! # Example
//!
//! ```no_run
//! use hopper_common::{atomic, checksum, Result};
//!
//! fn persist(path: &std::path::Path, body: &[u8]) -> Result<String> {
//!     atomic::write_bytes(path, body)?;
//!     Ok(checksum::sha256_hex(body))
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod atomic;
pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{HopperError, Result};
