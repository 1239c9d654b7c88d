//! Bounded retry with exponential backoff
//!
//! Shared by the call adapter (transform requests) and the sink publisher.
//! Attempt `n` that fails with a retryable error sleeps `base_delay * 2^(n-1)`
//! before attempt `n + 1`; a non-retryable error stops immediately.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Attempts per operation, including the first
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay before the second attempt; doubles for every further attempt
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

/// The last error of an operation that did not succeed
#[derive(Debug)]
pub struct Exhausted<E> {
    pub last_error: E,
    pub attempts: u32,
    /// False when the operation stopped on a non-retryable error
    pub retryable: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Sleep that follows failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut op: F,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let retryable = is_retryable(&error);
                    if !retryable || attempt >= max_attempts {
                        return Err(Exhausted {
                            last_error: error,
                            attempts: attempt,
                            retryable,
                        });
                    }

                    let delay = self.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
