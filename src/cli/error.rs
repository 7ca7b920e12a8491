//! CLI error types and conversions

use crate::downloader::DownloadError;
use crate::fetcher::FetcherError;
use crate::store::StoreError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Download error
    #[error("download error: {0}")]
    DownloadError(#[from] DownloadError),

    /// Fetcher error
    #[error("fetcher error: {0}")]
    FetcherError(#[from] FetcherError),

    /// Store error
    #[error("store error: {0}")]
    StoreError(#[from] StoreError),

    /// HTTP client setup error
    #[error("http client error: {0}")]
    HttpClientError(#[from] reqwest::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// One or more datasets failed to download
    #[error("datasets failed: {0}")]
    DatasetsFailed(String),
}
