//! Hopper Ingest Library
//!
//! Resumable batch pipelines for preparing speech and caption datasets.
//!
//! # Pipelines
//!
//! - **Transformation** ([`transform`]): runs every pending cell of selected
//!   CSV columns through an external service (translation by default), in
//!   fixed-size batches on a bounded worker pool, with periodic atomic
//!   checkpoints so an interrupted run resumes where it stopped.
//! - **Ingestion** ([`ingest`]): unpacks paired audio/label archives batch by
//!   batch into throwaway staging directories, joins audio with label
//!   metadata, and publishes each batch to a dataset sink (create first,
//!   append after).
//!
//! Both share the [`scheduler`] (batch planning and ordered fan-out) and the
//! [`retry`] policy.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use hopper_ingest::config::{ServiceConfig, TransformConfig};
//! use hopper_ingest::service::ChatTransformClient;
//! use hopper_ingest::transform::TransformPipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = Arc::new(ChatTransformClient::new(ServiceConfig::from_env()?)?);
//!     let pipeline = TransformPipeline::new(TransformConfig::from_env()?, service);
//!
//!     let fields = vec!["caption".to_string()];
//!     let report = pipeline.run(Path::new("captions.csv"), &fields, None).await?;
//!     println!("{} transformed, {} kept", report.transformed(), report.soft_failed());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod adapter;
pub mod archive;
pub mod checkpoint;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod ingest;
pub mod labels;
pub mod progress;
pub mod records;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod sink;
pub mod staging;
pub mod transform;

pub use error::{IngestError, Result};
