//! Download configuration constants

use std::time::Duration;

/// Default number of rows requested per page.
/// 50,000 rows keeps individual responses around a few tens of megabytes
/// while keeping the request count low for large datasets.
pub const PAGE_SIZE: u64 = 50_000;

/// Initial size of the page worker pool.
pub const INITIAL_WORKERS: usize = 8;

/// Lower bound for the worker pool. Throttling never shrinks below this.
pub const MIN_WORKERS: usize = 2;

/// Minimum interval between consecutive pool scale-downs.
/// 30 seconds gives in-flight requests time to drain before the next
/// throttle response is allowed to halve the pool again.
pub const SCALE_COOLDOWN: Duration = Duration::from_secs(30);

/// Exponent cap for throttle waits: `2^min(n, THROTTLE_EXPONENT_CAP)`.
pub const THROTTLE_EXPONENT_CAP: u32 = 5;

/// Ceiling for a single throttle wait in seconds.
pub const MAX_THROTTLE_WAIT_SECS: u64 = 32;

/// Maximum number of retries for transient request failures.
/// 5 retries with exponential backoff allows recovery from flaky networks
/// while avoiding infinite loops on persistent failures.
pub const MAX_RETRIES: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
/// 30 seconds caps exponential backoff to prevent excessive wait times.
pub const MAX_BACKOFF_MS: u64 = 30_000; // 30 seconds

/// Timeout for a single page request. Large pages on slow datasets can take
/// minutes to materialize server-side.
pub const PAGE_TIMEOUT: Duration = Duration::from_secs(180);

/// Timeout for a row count request.
pub const COUNT_TIMEOUT: Duration = Duration::from_secs(60);

/// TCP connect timeout for the shared HTTP session.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Progress is logged every time completion advances by this many percent.
pub const PROGRESS_STEP_PCT: u64 = 5;

/// Calculate exponential backoff delay
pub fn calculate_backoff(retry_count: u32) -> Duration {
    let delay_ms = INITIAL_BACKOFF_MS * 2u64.pow(retry_count);
    let delay_ms = delay_ms.min(MAX_BACKOFF_MS);
    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_backoff(0), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(1), Duration::from_millis(2000));
        assert_eq!(calculate_backoff(2), Duration::from_millis(4000));
        assert_eq!(calculate_backoff(3), Duration::from_millis(8000));
        assert_eq!(calculate_backoff(4), Duration::from_millis(16000));
        // Should cap at MAX_BACKOFF_MS
        assert_eq!(calculate_backoff(10), Duration::from_millis(MAX_BACKOFF_MS));
    }
}
