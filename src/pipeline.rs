//! Dataset fetch pipeline: watermark, count, download, merge.
//!
//! One pipeline serves a whole run. Datasets are processed sequentially
//! (their pages download in parallel); a failing dataset is recorded and
//! the run moves on, so one broken resource cannot block the rest.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dataset::DatasetDescriptor;
use crate::downloader::{
    DownloadError, DownloadResult, FetchPlan, ParallelDownloadEngine, ProgressTracker,
    RateController,
};
use crate::fetcher::{PageFetch, PageQuery, SodaClient};
use crate::session::Session;
use crate::store::{MergeEngine, StoreError, WatermarkStore};

/// File holding the per-dataset watermarks, relative to the output directory.
pub const WATERMARK_FILE: &str = ".watermarks.json";

/// Pipeline settings for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory for merged tables, watermarks and scratch space
    pub output_dir: PathBuf,
    /// Whether datasets with a date field fetch incrementally
    pub incremental: bool,
    /// Initial worker pool size, when overriding the default
    pub workers: Option<usize>,
}

/// Result of one dataset run.
#[derive(Debug, Clone)]
pub struct DatasetReport {
    /// Dataset name
    pub name: String,
    /// Rows fetched in this run
    pub fetched_rows: u64,
    /// Rows in the merged table afterwards
    pub table_rows: u64,
    /// Wall time for the dataset
    pub elapsed: Duration,
}

/// Totals for a multi-dataset run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Successful datasets
    pub reports: Vec<DatasetReport>,
    /// Names of datasets that failed
    pub failed: Vec<String>,
}

impl RunSummary {
    /// Whether every dataset succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Orchestrates fetching and merging for a set of datasets.
pub struct FetchPipeline {
    fetcher: Arc<dyn PageFetch>,
    rate: Arc<RateController>,
    merge: MergeEngine,
    watermarks: WatermarkStore,
    progress: ProgressTracker,
    output_dir: PathBuf,
    incremental: bool,
}

impl FetchPipeline {
    /// Pipeline over `session` writing into `config.output_dir`.
    pub fn new(session: Session, config: PipelineConfig) -> Self {
        let rate = Arc::new(match config.workers {
            Some(workers) => {
                RateController::with_limits(workers, crate::downloader::config::MIN_WORKERS)
            }
            None => RateController::new(),
        });
        Self {
            fetcher: Arc::new(SodaClient::new(session, rate.clone())),
            rate,
            merge: MergeEngine::new(),
            watermarks: WatermarkStore::new(config.output_dir.join(WATERMARK_FILE)),
            progress: ProgressTracker::default(),
            output_dir: config.output_dir,
            incremental: config.incremental,
        }
    }

    /// Replace the page source, e.g. with a mock in tests.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetch>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Run every dataset, collecting per-dataset outcomes.
    pub async fn run(&self, datasets: &[DatasetDescriptor]) -> RunSummary {
        let mut summary = RunSummary::default();
        for dataset in datasets {
            match self.run_dataset(dataset).await {
                Ok(report) => {
                    tracing::info!(
                        dataset = %report.name,
                        fetched_rows = report.fetched_rows,
                        table_rows = report.table_rows,
                        elapsed_secs = report.elapsed.as_secs(),
                        "dataset complete"
                    );
                    summary.reports.push(report);
                }
                Err(err) => {
                    tracing::error!(dataset = %dataset.name, error = %err, "dataset failed");
                    summary.failed.push(dataset.name.clone());
                }
            }
        }
        summary
    }

    /// Fetch and merge one dataset.
    pub async fn run_dataset(&self, dataset: &DatasetDescriptor) -> DownloadResult<DatasetReport> {
        dataset.validate().map_err(DownloadError::Config)?;
        std::fs::create_dir_all(&self.output_dir).map_err(StoreError::from)?;

        let started = Instant::now();
        let watermark = self.incremental_watermark(dataset)?;
        let query = build_query(dataset, watermark.as_deref());
        if let Some(date) = &watermark {
            tracing::info!(dataset = %dataset.name, since = %date, "incremental fetch");
        } else {
            tracing::info!(dataset = %dataset.name, "full fetch");
        }

        let dest = self.table_path(dataset);
        let (fetched_rows, table_rows) = match self.fetch_and_merge(dataset, &query, &dest).await {
            Ok(counts) => counts,
            Err(DownloadError::Store(StoreError::SchemaDrift { existing, incoming })) => {
                tracing::warn!(
                    dataset = %dataset.name,
                    existing = %existing,
                    incoming = %incoming,
                    "schema drift, falling back to full refresh"
                );
                self.full_refresh(dataset, &dest).await?
            }
            Err(err) => return Err(err),
        };

        if dataset.date_field.is_some() {
            self.watermarks
                .set(&dataset.id, &WatermarkStore::today())
                .map_err(DownloadError::Store)?;
        }

        Ok(DatasetReport {
            name: dataset.name.clone(),
            fetched_rows,
            table_rows,
            elapsed: started.elapsed(),
        })
    }

    /// Download all pages for `query` and merge them into `dest`.
    async fn fetch_and_merge(
        &self,
        dataset: &DatasetDescriptor,
        query: &PageQuery,
        dest: &Path,
    ) -> DownloadResult<(u64, u64)> {
        let total = self.fetcher.count_rows(&dataset.id, query).await?;
        let plan = FetchPlan::new(total, dataset.page_size);
        tracing::info!(
            dataset = %dataset.name,
            estimated_rows = total,
            pages = plan.page_count(),
            "fetch planned"
        );

        let scratch = self.scratch_dir(dataset)?;
        let progress = self.progress.dataset(&dataset.name, plan.page_count());
        let engine = ParallelDownloadEngine::new(self.fetcher.clone(), self.rate.clone());
        let summary = engine
            .run(&dataset.id, &plan, query, scratch.path(), &progress)
            .await?;

        let outcome = self
            .merge
            .merge(scratch.path(), dest, &dataset.primary_key)?;
        Ok((summary.rows, outcome.rows))
    }

    /// Refetch the full dataset and rewrite the table from scratch.
    async fn full_refresh(
        &self,
        dataset: &DatasetDescriptor,
        dest: &Path,
    ) -> DownloadResult<(u64, u64)> {
        let query = build_query(dataset, None);
        let total = self.fetcher.count_rows(&dataset.id, &query).await?;
        let plan = FetchPlan::new(total, dataset.page_size);

        let scratch = self.scratch_dir(dataset)?;
        let progress = self.progress.dataset(&dataset.name, plan.page_count());
        let engine = ParallelDownloadEngine::new(self.fetcher.clone(), self.rate.clone());
        let summary = engine
            .run(&dataset.id, &plan, &query, scratch.path(), &progress)
            .await?;

        let outcome = self
            .merge
            .overwrite(scratch.path(), dest, &dataset.primary_key)?;
        Ok((summary.rows, outcome.rows))
    }

    fn incremental_watermark(
        &self,
        dataset: &DatasetDescriptor,
    ) -> DownloadResult<Option<String>> {
        if !self.incremental || dataset.date_field.is_none() {
            return Ok(None);
        }
        let mark = self
            .watermarks
            .get(&dataset.id)
            .map_err(DownloadError::Store)?;
        Ok(mark.map(|m| m.last_date))
    }

    /// Path of the merged table for a dataset.
    pub fn table_path(&self, dataset: &DatasetDescriptor) -> PathBuf {
        self.output_dir.join(format!("{}.parquet", dataset.name))
    }

    fn scratch_dir(&self, dataset: &DatasetDescriptor) -> DownloadResult<tempfile::TempDir> {
        tempfile::Builder::new()
            .prefix(&format!(".{}-pages-", dataset.name))
            .tempdir_in(&self.output_dir)
            .map_err(|e| DownloadError::Store(StoreError::Io(e)))
    }
}

/// Page query for a dataset, with the watermark filter applied when given.
fn build_query(dataset: &DatasetDescriptor, since_date: Option<&str>) -> PageQuery {
    let watermark_filter = match (&dataset.date_field, since_date) {
        (Some(field), Some(date)) => Some(format!("{field} >= '{date}'")),
        _ => None,
    };
    PageQuery {
        select: dataset.select.clone(),
        filter: combine_filters(dataset.filter.as_deref(), watermark_filter.as_deref()),
        group: dataset.group.clone(),
        order: dataset.order.clone(),
    }
}

fn combine_filters(base: Option<&str>, watermark: Option<&str>) -> Option<String> {
    match (base, watermark) {
        (Some(a), Some(b)) => Some(format!("({a}) AND ({b})")),
        (Some(a), None) => Some(a.to_string()),
        (None, Some(b)) => Some(b.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetDescriptor;

    #[test]
    fn test_build_query_with_watermark() {
        let dataset = DatasetDescriptor::new("m9d7-ebf2", "vehicles", vec!["plate".to_string()])
            .with_date_field("first_seen");
        let query = build_query(&dataset, Some("20240101"));
        assert_eq!(query.filter.as_deref(), Some("first_seen >= '20240101'"));
    }

    #[test]
    fn test_build_query_combines_filters() {
        let mut dataset =
            DatasetDescriptor::new("m9d7-ebf2", "vehicles", vec!["plate".to_string()])
                .with_date_field("first_seen");
        dataset.filter = Some("kind = 'car'".to_string());
        let query = build_query(&dataset, Some("20240101"));
        assert_eq!(
            query.filter.as_deref(),
            Some("(kind = 'car') AND (first_seen >= '20240101')")
        );
    }

    #[test]
    fn test_build_query_without_date_field() {
        let dataset = DatasetDescriptor::new("8ys7-d773", "fuel", vec!["plate".to_string()]);
        let query = build_query(&dataset, Some("20240101"));
        assert_eq!(query.filter, None);
    }
}
