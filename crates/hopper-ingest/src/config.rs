//! Configuration for the transformation and ingestion pipelines
//!
//! Every config starts from [`Default`], can be overridden from `HOPPER_*`
//! environment variables via `from_env`, and then adjusted with the chained
//! `with_*` setters (the CLI applies its flags that way).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{IngestError, Result};
use crate::retry::RetryPolicy;

// ============================================================================
// Defaults
// ============================================================================

/// Units per transformation batch
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Processed units between checkpoints
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 5000;

/// Width of the in-batch worker pool
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Archive pairs per ingestion batch
pub const DEFAULT_INGEST_BATCH_SIZE: usize = 5;

pub const DEFAULT_CHECKPOINT_DIR: &str = "checkpoints";
pub const DEFAULT_OUTPUT_SUFFIX: &str = "_ko";

pub const DEFAULT_SERVICE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_TARGET_LANGUAGE: &str = "Korean";
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 500;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Look up `key` and parse it, reporting the variable name on failure
fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| IngestError::config(format!("invalid {key}={raw:?}: {e}"))),
        _ => Ok(None),
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

// ============================================================================
// Transformation
// ============================================================================

/// Settings for a checkpointed field transformation run
#[derive(Debug, Clone, PartialEq)]
pub struct TransformConfig {
    pub chunk_size: usize,
    pub checkpoint_interval: usize,
    pub max_workers: usize,
    pub checkpoint_dir: PathBuf,
    /// Appended to a field name to form its output column
    pub output_suffix: String,
    pub retry: RetryPolicy,
    pub show_progress: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            max_workers: DEFAULT_MAX_WORKERS,
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            output_suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
            retry: RetryPolicy::default(),
            show_progress: false,
        }
    }
}

impl TransformConfig {
    /// Defaults overridden by `HOPPER_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "HOPPER_CHUNK_SIZE")? {
            config.chunk_size = v;
        }
        if let Some(v) = parse_var(&lookup, "HOPPER_CHECKPOINT_INTERVAL")? {
            config.checkpoint_interval = v;
        }
        if let Some(v) = parse_var(&lookup, "HOPPER_MAX_WORKERS")? {
            config.max_workers = v;
        }
        if let Some(dir) = lookup("HOPPER_CHECKPOINT_DIR").filter(|s| !s.is_empty()) {
            config.checkpoint_dir = PathBuf::from(dir);
        }
        if let Some(suffix) = lookup("HOPPER_OUTPUT_SUFFIX").filter(|s| !s.is_empty()) {
            config.output_suffix = suffix;
        }

        Ok(config)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// 0 disables periodic checkpoints
    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    pub fn with_output_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.output_suffix = suffix.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }
}

// ============================================================================
// Ingestion
// ============================================================================

/// Settings for an archive ingestion run
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub max_workers: usize,
    /// Parent of the per-batch staging workspaces
    pub staging_root: PathBuf,
    pub retry: RetryPolicy,
    pub show_progress: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_INGEST_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            staging_root: std::env::temp_dir(),
            retry: RetryPolicy::default(),
            show_progress: false,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "HOPPER_BATCH_SIZE")? {
            config.batch_size = v;
        }
        if let Some(v) = parse_var(&lookup, "HOPPER_MAX_WORKERS")? {
            config.max_workers = v;
        }
        if let Some(dir) = lookup("HOPPER_STAGING_DIR").filter(|s| !s.is_empty()) {
            config.staging_root = PathBuf::from(dir);
        }

        Ok(config)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }
}

// ============================================================================
// Transformation service
// ============================================================================

/// Connection settings for the chat-completions transformation service
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub target_language: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("target_language", &self.target_language)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVICE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            target_language: DEFAULT_TARGET_LANGUAGE.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("HOPPER_SERVICE_URL").filter(|s| !s.is_empty()) {
            config.base_url = url;
        }
        config.api_key = lookup("HOPPER_API_KEY")
            .filter(|s| !s.is_empty())
            .or_else(|| lookup("OPENAI_API_KEY").filter(|s| !s.is_empty()));
        if let Some(model) = lookup("HOPPER_MODEL").filter(|s| !s.is_empty()) {
            config.model = model;
        }
        if let Some(lang) = lookup("HOPPER_TARGET_LANGUAGE").filter(|s| !s.is_empty()) {
            config.target_language = lang;
        }
        if let Some(v) = parse_var(&lookup, "HOPPER_TIMEOUT_SECS")? {
            config.timeout_secs = v;
        }

        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = language.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
