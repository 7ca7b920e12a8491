//! SODA resource API client: paginated page fetches and row counts.
//!
//! Pages are plain `GET {base}/resource/{id}.json` requests with `$limit`
//! and `$offset`, optionally narrowed by `$select`, `$where`, `$group` and
//! `$order`. The portal answers overload with HTTP 429; those responses are
//! routed to the [`RateController`] and retried without an attempt ceiling,
//! unlike transient transport faults which consume bounded retries.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::downloader::config::{COUNT_TIMEOUT, PAGE_TIMEOUT};
use crate::downloader::rate_control::RateController;
use crate::fetcher::retry::RetryPolicy;
use crate::fetcher::{record_from_value, FetcherError, FetcherResult, PageFetch, PageQuery, Record};
use crate::session::Session;

const ERROR_BODY_LIMIT: usize = 300;

/// Client for one portal session, shared across page workers.
#[derive(Debug, Clone)]
pub struct SodaClient {
    session: Session,
    rate: Arc<RateController>,
    retry: RetryPolicy,
}

impl SodaClient {
    /// Create a client over `session`, reporting throttles to `rate`.
    pub fn new(session: Session, rate: Arc<RateController>) -> Self {
        Self {
            session,
            rate,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the transient-failure retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Advisory row count for a dataset under the given query.
    ///
    /// Uses `$select=count(*)`, or `count(distinct <group>)` when the query
    /// groups rows. The result only sizes the offset plan; the short final
    /// page remains the authoritative end-of-data signal.
    pub async fn row_count(&self, dataset_id: &str, query: &PageQuery) -> FetcherResult<u64> {
        let url = self.session.resource_url(dataset_id);
        let params = count_params(query);
        let rows = self
            .retry
            .execute("row_count", || {
                self.request_rows(&url, &params, COUNT_TIMEOUT)
            })
            .await?;
        count_from_rows(&rows)
    }

    async fn request_rows(
        &self,
        url: &str,
        params: &[(String, String)],
        timeout: Duration,
    ) -> FetcherResult<Vec<Value>> {
        // Throttles loop here indefinitely; only transport faults escape to
        // the bounded retry policy.
        loop {
            let response = self
                .session
                .client()
                .get(url)
                .query(params)
                .timeout(timeout)
                .send()
                .await
                .map_err(FetcherError::from_transport)?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = self.rate.on_throttle();
                tracing::warn!(url, wait_secs = wait.as_secs(), "throttled by portal");
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FetcherError::HttpError {
                    status: status.as_u16(),
                    body: truncate_body(&body),
                });
            }

            // Read the full body first: a transfer cut short is a transport
            // fault, while a complete but malformed body is fatal.
            let body = response.text().await.map_err(FetcherError::from_transport)?;
            let rows: Vec<Value> = serde_json::from_str(&body)
                .map_err(|e| FetcherError::ParseError(format!("{url}: {e}")))?;

            self.rate.on_success();
            return Ok(rows);
        }
    }
}

#[async_trait]
impl PageFetch for SodaClient {
    async fn fetch_page(
        &self,
        dataset_id: &str,
        offset: u64,
        limit: u64,
        query: &PageQuery,
    ) -> FetcherResult<Vec<Record>> {
        let url = self.session.resource_url(dataset_id);
        let params = page_params(offset, limit, query);
        let rows = self
            .retry
            .execute("fetch_page", || {
                self.request_rows(&url, &params, PAGE_TIMEOUT)
            })
            .await?;
        rows.into_iter().map(record_from_value).collect()
    }

    async fn count_rows(&self, dataset_id: &str, query: &PageQuery) -> FetcherResult<u64> {
        self.row_count(dataset_id, query).await
    }
}

/// Query parameters for one page request.
fn page_params(offset: u64, limit: u64, query: &PageQuery) -> Vec<(String, String)> {
    let mut params = vec![
        ("$limit".to_string(), limit.to_string()),
        ("$offset".to_string(), offset.to_string()),
    ];
    if let Some(select) = &query.select {
        params.push(("$select".to_string(), select.clone()));
    }
    if let Some(filter) = &query.filter {
        params.push(("$where".to_string(), filter.clone()));
    }
    if let Some(group) = &query.group {
        params.push(("$group".to_string(), group.clone()));
    }
    if let Some(order) = &query.order {
        params.push(("$order".to_string(), order.clone()));
    }
    params
}

/// Query parameters for a count request under the same filter as the pages.
fn count_params(query: &PageQuery) -> Vec<(String, String)> {
    let select = match &query.group {
        Some(group) => format!("count(distinct {group})"),
        None => "count(*)".to_string(),
    };
    let mut params = vec![("$select".to_string(), select)];
    if let Some(filter) = &query.filter {
        params.push(("$where".to_string(), filter.clone()));
    }
    params
}

/// Extract the count from a `$select=count(...)` response.
///
/// The portal names the result column after the aggregate expression, so
/// the key is located by prefix instead of exact match.
fn count_from_rows(rows: &[Value]) -> FetcherResult<u64> {
    let row = rows
        .first()
        .and_then(Value::as_object)
        .ok_or_else(|| FetcherError::InvalidResponse("empty count response".to_string()))?;

    for (key, value) in row {
        if !key.to_lowercase().starts_with("count") {
            continue;
        }
        let parsed = match value {
            Value::String(s) => s.parse::<u64>().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        };
        return parsed.ok_or_else(|| {
            FetcherError::InvalidResponse(format!("unparseable count value: {value}"))
        });
    }

    Err(FetcherError::InvalidResponse(
        "no count column in response".to_string(),
    ))
}

fn truncate_body(body: &str) -> String {
    if body.len() <= ERROR_BODY_LIMIT {
        body.to_string()
    } else {
        let mut end = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}
