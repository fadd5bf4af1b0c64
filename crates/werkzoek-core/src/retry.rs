//! Caller-side retry policy.
//!
//! The gateway never retries on its own. Callers that want pull-to-refresh
//! style resilience wrap individual calls:
//!
//! ```rust,no_run
//! # use werkzoek_core::{ApiError, RetryPolicy};
//! # async fn run(fetch: impl Fn() -> std::future::Ready<Result<u32, ApiError>>) -> Result<(), ApiError> {
//! let policy = RetryPolicy::default();
//! let value = policy.run(|| fetch()).await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use crate::error::ApiError;

/// Exponential backoff, retrying only [`ApiError::is_retryable`] failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2,
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Delay before retry number `retry` (1-indexed).
    ///
    /// `initial * multiplier^(retry-1)`, capped by `max_backoff`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        std::cmp::min(
            self.initial_backoff.saturating_mul(factor),
            self.max_backoff,
        )
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = %delay.as_millis(),
                        code = e.code(),
                        error = %e,
                        "Retrying request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
