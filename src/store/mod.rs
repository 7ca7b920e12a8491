//! On-disk columnar store: page artifacts, merged tables, watermarks.

pub mod merge;
pub mod page;
pub mod watermark;

pub use merge::{MergeEngine, MergeOutcome};
pub use watermark::{Watermark, WatermarkStore};

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem error
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Parquet read/write error
    #[error("parquet: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow batch construction error
    #[error("arrow: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Watermark file (de)serialization error
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Existing table and new batch disagree on columns
    #[error("schema drift: existing table has columns [{existing}], new batch has [{incoming}]")]
    SchemaDrift {
        /// Column names of the table on disk
        existing: String,
        /// Column names of the freshly fetched batch
        incoming: String,
    },

    /// A primary key column is absent from the new batch
    #[error("primary key column '{0}' missing from fetched data")]
    MissingPrimaryKey(String),

    /// A table file is not in the expected all-string layout
    #[error("invalid table {path}: {reason}")]
    InvalidTable {
        /// Offending file
        path: String,
        /// What was wrong with it
        reason: String,
    },
}
