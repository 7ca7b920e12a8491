//! Download orchestration: planning, pacing and parallel page fetching.
//!
//! The download path for one dataset is:
//!
//! 1. **Planning**: size an offset plan from an advisory row count
//!    ([`plan::FetchPlan`])
//! 2. **Pacing**: the worker pool reacts to portal throttling
//!    ([`rate_control::RateController`])
//! 3. **Execution**: pages are fetched in rounds and streamed to parquet
//!    artifacts ([`engine::ParallelDownloadEngine`])
//! 4. **Progress**: completed pages feed per-dataset counters
//!    ([`progress::ProgressTracker`])

pub mod config;
pub mod engine;
pub mod plan;
pub mod progress;
pub mod rate_control;

pub use engine::{DownloadSummary, ParallelDownloadEngine};
pub use plan::FetchPlan;
pub use progress::{DatasetProgress, ProgressTracker};
pub use rate_control::RateController;

use crate::fetcher::FetcherError;
use crate::store::StoreError;

/// Download errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Error from the portal fetcher
    #[error("fetch error: {0}")]
    Fetch(#[from] FetcherError),

    /// Error from the columnar store
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A page worker panicked or was torn down unexpectedly
    #[error("worker task failed: {0}")]
    TaskFailure(String),

    /// Invalid dataset or run configuration
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for download operations
pub type DownloadResult<T> = Result<T, DownloadError>;
