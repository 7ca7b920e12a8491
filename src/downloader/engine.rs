//! Parallel page download engine.
//!
//! Pages are dispatched in rounds. Each round reads one worker-count
//! snapshot from the rate controller and spawns that many page tasks; the
//! pool is never resized mid-round, so a throttle-driven shrink takes
//! effect at the next round boundary. Every completed page is already
//! durable as its own parquet artifact when the round ends.

use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::downloader::plan::FetchPlan;
use crate::downloader::progress::DatasetProgress;
use crate::downloader::rate_control::RateController;
use crate::downloader::{DownloadError, DownloadResult};
use crate::fetcher::{PageFetch, PageQuery};
use crate::store::page::{list_pages, page_file_name, write_page};

/// Totals for one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Pages fetched
    pub pages: usize,
    /// Rows fetched
    pub rows: u64,
    /// Artifact bytes written
    pub bytes: u64,
    /// Whether a short page ended the fetch before the planned offsets ran out
    pub truncated: bool,
}

struct PageResult {
    rows: u64,
    bytes: u64,
}

/// Fetches the pages of one plan concurrently into a scratch directory.
pub struct ParallelDownloadEngine {
    fetcher: Arc<dyn PageFetch>,
    rate: Arc<RateController>,
}

impl ParallelDownloadEngine {
    /// Engine over `fetcher`, paced by `rate`.
    pub fn new(fetcher: Arc<dyn PageFetch>, rate: Arc<RateController>) -> Self {
        Self { fetcher, rate }
    }

    /// Fetch all planned pages of `dataset_id` into `scratch`.
    ///
    /// A page returning fewer rows than requested is the end of the data;
    /// offsets beyond the current round are skipped. The first failed page
    /// aborts the remaining tasks, removes every artifact already written
    /// to `scratch`, and returns the error. Artifacts are complete files or
    /// absent; there is no partial commit.
    pub async fn run(
        &self,
        dataset_id: &str,
        plan: &FetchPlan,
        query: &PageQuery,
        scratch: &Path,
        progress: &DatasetProgress,
    ) -> DownloadResult<DownloadSummary> {
        let offsets = plan.offsets();
        let page_size = plan.page_size();

        let mut summary = DownloadSummary {
            pages: 0,
            rows: 0,
            bytes: 0,
            truncated: false,
        };
        let mut next = 0;

        while next < offsets.len() && !summary.truncated {
            let width = self.rate.worker_count().max(1);
            let round = &offsets[next..(next + width).min(offsets.len())];
            tracing::debug!(
                dataset_id,
                round_pages = round.len(),
                workers = width,
                "dispatching page round"
            );

            let mut tasks: JoinSet<DownloadResult<PageResult>> = JoinSet::new();
            for (n, &offset) in round.iter().enumerate() {
                let fetcher = self.fetcher.clone();
                let dataset_id = dataset_id.to_string();
                let query = query.clone();
                let path = scratch.join(page_file_name(next + n));
                tasks.spawn(async move {
                    let records = fetcher
                        .fetch_page(&dataset_id, offset, page_size, &query)
                        .await?;
                    let rows = records.len() as u64;
                    // Parquet encoding is blocking IO; keep it off the
                    // async worker threads.
                    let bytes = tokio::task::spawn_blocking(move || write_page(&path, &records))
                        .await
                        .map_err(|e| DownloadError::TaskFailure(e.to_string()))??;
                    Ok(PageResult { rows, bytes })
                });
            }
            next += round.len();

            while let Some(joined) = tasks.join_next().await {
                let page = match joined {
                    Ok(Ok(page)) => page,
                    Ok(Err(err)) => {
                        Self::abort(&mut tasks, scratch).await;
                        return Err(err);
                    }
                    Err(join_err) if join_err.is_cancelled() => continue,
                    Err(join_err) => {
                        Self::abort(&mut tasks, scratch).await;
                        return Err(DownloadError::TaskFailure(join_err.to_string()));
                    }
                };

                summary.pages += 1;
                summary.rows += page.rows;
                summary.bytes += page.bytes;
                progress.record_page(page.rows, page.bytes);
                if page.rows < page_size {
                    summary.truncated = true;
                }
            }
        }

        if summary.truncated && summary.pages < plan.page_count() {
            progress.set_planned_pages(summary.pages);
            tracing::info!(
                dataset_id,
                pages = summary.pages,
                planned = plan.page_count(),
                "data ended before the planned offsets"
            );
        }

        Ok(summary)
    }

    async fn abort(tasks: &mut JoinSet<DownloadResult<PageResult>>, scratch: &Path) {
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        if let Ok(pages) = list_pages(scratch) {
            for page in pages {
                let _ = std::fs::remove_file(page);
            }
        }
    }
}
