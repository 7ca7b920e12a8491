//! Portal fetcher implementations

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

pub mod bulk;
pub mod retry;
pub mod soda;

pub use bulk::BulkExporter;
pub use retry::RetryPolicy;
pub use soda::SodaClient;

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// Fatal HTTP status from the portal
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// Response status code
        status: u16,
        /// Response body text, truncated for logging
        body: String,
    },

    /// Connection-level failure (reset, refused, truncated transfer)
    #[error("network error: {0}")]
    NetworkError(String),

    /// Request or response exceeded its deadline
    #[error("timeout: {0}")]
    TimeoutError(String),

    /// Response body was not the expected shape
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structurally valid response missing required content
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Local file error while streaming a download
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl FetcherError {
    /// Whether a retry can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetcherError::NetworkError(_) | FetcherError::TimeoutError(_)
        )
    }

    /// Classify a transport error from the HTTP client.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetcherError::TimeoutError(err.to_string())
        } else {
            FetcherError::NetworkError(err.to_string())
        }
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// One row of a dataset, normalized to string fields.
///
/// The portal types columns loosely and pages can disagree on which fields
/// are present, so rows are kept as sorted field maps until they reach the
/// columnar store.
pub type Record = BTreeMap<String, String>;

/// Normalize one JSON object into a [`Record`].
///
/// Scalars become their string form, nulls are dropped, and nested
/// values are kept as compact JSON text.
pub fn record_from_value(value: Value) -> FetcherResult<Record> {
    let object = match value {
        Value::Object(map) => map,
        other => {
            return Err(FetcherError::ParseError(format!(
                "expected a JSON object row, got {other}"
            )))
        }
    };

    let mut record = Record::new();
    for (key, field) in object {
        let text = match field {
            Value::Null => continue,
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            nested => nested.to_string(),
        };
        record.insert(key, text);
    }
    Ok(record)
}

/// Query clauses applied to every page of a fetch.
#[derive(Debug, Clone, Default)]
pub struct PageQuery {
    /// `$select` projection
    pub select: Option<String>,
    /// `$where` filter
    pub filter: Option<String>,
    /// `$group` clause
    pub group: Option<String>,
    /// `$order` clause
    pub order: Option<String>,
}

/// Seam between the download pipeline and the wire.
///
/// The production implementation is [`SodaClient`]; tests substitute mock
/// sources to exercise dispatch, termination and failure paths offline.
#[async_trait]
pub trait PageFetch: Send + Sync {
    /// Fetch one page of rows at `offset`, requesting at most `limit` rows.
    async fn fetch_page(
        &self,
        dataset_id: &str,
        offset: u64,
        limit: u64,
        query: &PageQuery,
    ) -> FetcherResult<Vec<Record>>;

    /// Advisory row count for the dataset under `query`.
    async fn count_rows(&self, dataset_id: &str, query: &PageQuery) -> FetcherResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_normalization() {
        let record = record_from_value(json!({
            "plate": "AB123C",
            "mass": 1450,
            "approved": true,
            "notes": null,
            "history": ["a", "b"]
        }))
        .unwrap();

        assert_eq!(record.get("plate").map(String::as_str), Some("AB123C"));
        assert_eq!(record.get("mass").map(String::as_str), Some("1450"));
        assert_eq!(record.get("approved").map(String::as_str), Some("true"));
        assert!(!record.contains_key("notes"));
        assert_eq!(
            record.get("history").map(String::as_str),
            Some(r#"["a","b"]"#)
        );
    }

    #[test]
    fn test_record_rejects_non_object() {
        assert!(record_from_value(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_transient_classification() {
        assert!(FetcherError::NetworkError("reset".into()).is_transient());
        assert!(FetcherError::TimeoutError("deadline".into()).is_transient());
        assert!(!FetcherError::HttpError {
            status: 404,
            body: "missing".into()
        }
        .is_transient());
        assert!(!FetcherError::ParseError("bad row".into()).is_transient());
    }
}
