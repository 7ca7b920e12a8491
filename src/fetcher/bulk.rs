//! Whole-dataset CSV export, streamed to disk.
//!
//! For datasets where paging is wasteful the portal offers a server-side
//! CSV export. The body is streamed in chunks and never buffered whole; a
//! transient fault restarts the transfer from scratch under the same retry
//! policy as page fetches.

use futures_util::StreamExt;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::downloader::rate_control::RateController;
use crate::fetcher::retry::RetryPolicy;
use crate::fetcher::{FetcherError, FetcherResult};
use crate::session::Session;

/// Streaming exporter for the `rows.csv` endpoint.
#[derive(Debug, Clone)]
pub struct BulkExporter {
    session: Session,
    rate: Arc<RateController>,
    retry: RetryPolicy,
}

impl BulkExporter {
    /// Create an exporter over `session`.
    pub fn new(session: Session, rate: Arc<RateController>) -> Self {
        Self {
            session,
            rate,
            retry: RetryPolicy::default(),
        }
    }

    /// Download the full CSV export of `dataset_id` to `dest`.
    ///
    /// The file appears at `dest` only after the transfer completes; a
    /// partial transfer leaves nothing behind. Returns the byte count.
    pub async fn export_csv(&self, dataset_id: &str, dest: &Path) -> FetcherResult<u64> {
        let url = self.session.export_url(dataset_id);
        let part = part_path(dest);

        let result = self
            .retry
            .execute("bulk_export", || self.transfer(&url, &part))
            .await;

        match result {
            Ok(bytes) => {
                tokio::fs::rename(&part, dest).await?;
                tracing::info!(dataset_id, bytes, path = %dest.display(), "bulk export complete");
                Ok(bytes)
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(err)
            }
        }
    }

    async fn transfer(&self, url: &str, part: &Path) -> FetcherResult<u64> {
        loop {
            let response = self
                .session
                .client()
                .get(url)
                // Exports run as long as the server needs; only the connect
                // and idle-read limits of the client apply.
                .timeout(std::time::Duration::from_secs(3600))
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
                    body,
                });
            }

            let mut file = tokio::fs::File::create(part).await?;
            let mut stream = response.bytes_stream();
            let mut bytes: u64 = 0;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(FetcherError::from_transport)?;
                file.write_all(&chunk).await?;
                bytes += chunk.len() as u64;
            }
            file.flush().await?;

            self.rate.on_success();
            return Ok(bytes);
        }
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/data/vehicles.csv")),
            PathBuf::from("/data/vehicles.csv.part")
        );
    }
}
