//! # Open Data Downloader Library
//!
//! A concurrent downloader for large tabular datasets published through
//! Socrata-style open data portals. Designed for keeping local parquet
//! mirrors of multi-million-row public registries up to date.
//!
//! ## Features
//!
//! - **Offset pagination**: datasets are fetched in fixed-size pages with
//!   `$limit`/`$offset`, in parallel
//! - **Adaptive pacing**: the worker pool shrinks when the portal answers
//!   with HTTP 429 and requests back off exponentially
//! - **Incremental fetch**: datasets with a date column only fetch rows at
//!   or past the last successful run's watermark
//! - **Deduplicated merge**: fresh rows are merged into the existing table
//!   by primary key, new data winning, with an atomic file swap
//! - **Bulk export**: whole-dataset CSV streaming for cases where paging
//!   is wasteful
//!
//! ## Quick Start
//!
//! ```no_run
//! use open_data_downloader::dataset::DatasetDescriptor;
//! use open_data_downloader::pipeline::{FetchPipeline, PipelineConfig};
//! use open_data_downloader::session::{Session, SessionConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::connect(SessionConfig::new("https://opendata.example.org"))?;
//! let pipeline = FetchPipeline::new(
//!     session,
//!     PipelineConfig {
//!         output_dir: "./data".into(),
//!         incremental: true,
//!         workers: None,
//!     },
//! );
//!
//! let vehicles = DatasetDescriptor::new("m9d7-ebf2", "vehicles", vec!["plate".to_string()])
//!     .with_date_field("first_seen");
//! let summary = pipeline.run(&[vehicles]).await;
//! assert!(summary.all_succeeded());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`session`] - pooled HTTP client and portal endpoints
//! - [`fetcher`] - page fetches, row counts, retries and bulk export
//! - [`downloader`] - offset planning, pacing and the parallel engine
//! - [`store`] - parquet page artifacts, merge and watermarks
//! - [`pipeline`] - per-dataset orchestration
//! - [`dataset`] - dataset descriptors and registry loading
//! - [`cli`] - command implementations

#![warn(missing_docs)]
#![warn(clippy::all)]

/// CLI command implementations
pub mod cli;

/// Dataset descriptors and registry loading
pub mod dataset;

/// Download orchestration
pub mod downloader;

/// Portal fetchers
pub mod fetcher;

/// Per-dataset fetch pipeline
pub mod pipeline;

/// HTTP session management
pub mod session;

/// Columnar store: page artifacts, merge, watermarks
pub mod store;

// Re-export commonly used types
pub use dataset::DatasetDescriptor;
pub use downloader::{DownloadError, FetchPlan, ParallelDownloadEngine, RateController};
pub use fetcher::{PageFetch, PageQuery, Record, SodaClient};
pub use pipeline::{FetchPipeline, PipelineConfig, RunSummary};
pub use session::{Session, SessionConfig};
pub use store::{MergeEngine, WatermarkStore};
