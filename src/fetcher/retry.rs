//! Bounded retry with exponential backoff for transient failures.

use std::future::Future;

use crate::downloader::config::{calculate_backoff, MAX_RETRIES};
use crate::fetcher::{FetcherError, FetcherResult};

/// Retry policy for operations that can fail transiently.
///
/// Only errors reporting [`is_transient`](FetcherError::is_transient) are
/// retried; everything else surfaces on the first attempt. Throttle waits
/// are handled inside the operation itself and do not consume attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// Policy allowing `max_attempts` total attempts (first try included).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run `operation` until it succeeds, fails fatally, or attempts run out.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> FetcherResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FetcherResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < self.max_attempts => {
                    let backoff = calculate_backoff(attempt);
                    tracing::warn!(
                        operation = label,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        tracing::error!(
                            operation = label,
                            attempts = self.max_attempts,
                            error = %err,
                            "retries exhausted"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_RETRIES)
    }
}
