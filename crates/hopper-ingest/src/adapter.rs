//! Retry wrapper around the transformation service
//!
//! A unit whose transient failures exhaust the retry budget is soft-failed:
//! its output becomes the untransformed input and the run continues. Only a
//! non-retryable [`ServiceError`] escapes.

use std::sync::Arc;
use tracing::warn;

use crate::records::WorkUnit;
use crate::retry::RetryPolicy;
use crate::service::{ServiceError, TransformService};

/// Characters of input shown when a soft failure is logged
pub const PREVIEW_CHARS: usize = 50;

/// First `max_chars` characters of `text`, never splitting a character
pub fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Shared service handle plus the retry policy applied to every call
#[derive(Clone)]
pub struct CallAdapter {
    service: Arc<dyn TransformService>,
    policy: RetryPolicy,
}

impl CallAdapter {
    pub fn new(service: Arc<dyn TransformService>, policy: RetryPolicy) -> Self {
        Self { service, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Transform one unit, returning it as done or soft-failed
    pub async fn call(&self, unit: &WorkUnit) -> Result<WorkUnit, ServiceError> {
        let outcome = self
            .policy
            .run(
                || self.service.transform(&unit.field, &unit.raw_value),
                ServiceError::is_retryable,
            )
            .await;

        match outcome {
            Ok(value) => Ok(unit.clone().complete(value)),
            Err(exhausted) if exhausted.retryable => {
                warn!(
                    row = unit.row,
                    field = %unit.field,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    preview = preview(&unit.raw_value, PREVIEW_CHARS),
                    "Transformation failed, keeping original value"
                );
                Ok(unit.clone().soft_fail())
            }
            Err(exhausted) => Err(exhausted.last_error),
        }
    }
}
