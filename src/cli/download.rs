//! Download and export command implementations

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::dataset::{load_registry, DatasetDescriptor};
use crate::downloader::config::MIN_WORKERS;
use crate::downloader::RateController;
use crate::fetcher::BulkExporter;
use crate::pipeline::{FetchPipeline, PipelineConfig};
use crate::session::{Session, SessionConfig};

use super::CliError;

/// Upper bound for the worker pool to avoid self-inflicted throttling.
const MAX_WORKERS: usize = 32;

/// Command line interface
#[derive(Debug, Parser)]
#[command(name = "open-data-downloader")]
#[command(about = "Download and merge tabular datasets from an open data portal")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Download datasets page by page and merge them into parquet tables
    Download(DownloadArgs),

    /// Stream the whole CSV export of one dataset to disk
    Export(ExportArgs),

    /// List the datasets in the registry file
    Datasets(DatasetsArgs),
}

/// Connection options shared by the networked commands.
#[derive(Debug, Args)]
pub struct PortalArgs {
    /// Portal base URL, e.g. https://opendata.example.org
    #[arg(long, env = "SODA_BASE_URL")]
    pub base_url: String,

    /// Application token; raises the portal's throttling threshold
    #[arg(long, env = "SODA_APP_TOKEN")]
    pub app_token: Option<String>,

    /// Dataset registry file
    #[arg(long, default_value = "datasets.json")]
    pub datasets: PathBuf,
}

/// Arguments for the download command
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Dataset names or ids to download; all registry entries when omitted
    pub names: Vec<String>,

    #[command(flatten)]
    portal: PortalArgs,

    /// Output directory for merged tables
    #[arg(long, default_value = "data")]
    pub output_dir: PathBuf,

    /// Force a full fetch even where a watermark exists
    #[arg(long)]
    pub full: bool,

    /// Initial worker pool size; the pool never shrinks below two workers
    #[arg(long, value_parser = parse_workers)]
    pub workers: Option<usize>,
}

impl DownloadArgs {
    /// Run the download for the selected datasets.
    pub async fn execute(&self) -> Result<(), CliError> {
        let datasets = select_datasets(&self.portal, &self.names)?;
        let session = connect(&self.portal)?;

        let pipeline = FetchPipeline::new(
            session,
            PipelineConfig {
                output_dir: self.output_dir.clone(),
                incremental: !self.full,
                workers: self.workers,
            },
        );

        let summary = pipeline.run(&datasets).await;
        info!(
            succeeded = summary.reports.len(),
            failed = summary.failed.len(),
            "run finished"
        );
        for report in &summary.reports {
            println!(
                "{}: {} rows fetched, {} rows in table ({}s)",
                report.name,
                report.fetched_rows,
                report.table_rows,
                report.elapsed.as_secs()
            );
        }

        if summary.all_succeeded() {
            Ok(())
        } else {
            Err(CliError::DatasetsFailed(summary.failed.join(", ")))
        }
    }
}

/// Arguments for the export command
#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Dataset name or id to export
    pub name: String,

    #[command(flatten)]
    portal: PortalArgs,

    /// Output directory for the CSV file
    #[arg(long, default_value = "data")]
    pub output_dir: PathBuf,
}

impl ExportArgs {
    /// Stream the dataset's CSV export to disk.
    pub async fn execute(&self) -> Result<(), CliError> {
        let datasets = select_datasets(&self.portal, std::slice::from_ref(&self.name))?;
        let dataset = &datasets[0];
        let session = connect(&self.portal)?;

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
        let dest = self.output_dir.join(format!("{}.csv", dataset.name));

        let exporter = BulkExporter::new(session, Arc::new(RateController::new()));
        let bytes = exporter.export_csv(&dataset.id, &dest).await?;
        println!("{}: {} bytes written to {}", dataset.name, bytes, dest.display());
        Ok(())
    }
}

/// Arguments for the datasets command
#[derive(Debug, Args)]
pub struct DatasetsArgs {
    /// Dataset registry file
    #[arg(long, default_value = "datasets.json")]
    pub datasets: PathBuf,
}

impl DatasetsArgs {
    /// Print the registry contents.
    pub fn execute(&self) -> Result<(), CliError> {
        let datasets = load_registry(&self.datasets).map_err(CliError::InvalidArgument)?;
        for dataset in &datasets {
            let mode = match &dataset.date_field {
                Some(field) => format!("incremental on {field}"),
                None => "full".to_string(),
            };
            println!(
                "{:<24} {:<12} key [{}]  {}",
                dataset.name,
                dataset.id,
                dataset.primary_key.join(", "),
                mode
            );
        }
        Ok(())
    }
}

fn connect(portal: &PortalArgs) -> Result<Session, CliError> {
    let mut config = SessionConfig::new(&portal.base_url);
    if let Some(token) = &portal.app_token {
        config = config.with_app_token(token);
    }
    Ok(Session::connect(config)?)
}

/// Resolve requested names or ids against the registry; empty means all.
fn select_datasets(
    portal: &PortalArgs,
    names: &[String],
) -> Result<Vec<DatasetDescriptor>, CliError> {
    let registry = load_registry(&portal.datasets).map_err(CliError::InvalidArgument)?;
    if registry.is_empty() {
        return Err(CliError::InvalidArgument(format!(
            "registry {} contains no datasets",
            portal.datasets.display()
        )));
    }
    if names.is_empty() {
        return Ok(registry);
    }

    let mut selected = Vec::new();
    for name in names {
        let found = registry
            .iter()
            .find(|d| d.name == *name || d.id == *name)
            .cloned()
            .ok_or_else(|| {
                CliError::InvalidArgument(format!("unknown dataset '{name}'"))
            })?;
        selected.push(found);
    }
    Ok(selected)
}

fn parse_workers(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value < MIN_WORKERS {
        return Err(format!("workers must be at least {MIN_WORKERS}"));
    }
    if value > MAX_WORKERS {
        return Err(format!("workers {value} exceeds maximum of {MAX_WORKERS}"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workers() {
        assert_eq!(parse_workers("8"), Ok(8));
        assert_eq!(parse_workers("2"), Ok(2));
        assert!(parse_workers("0").is_err());
        // Below the pool floor.
        assert!(parse_workers("1").is_err());
        assert!(parse_workers("33").is_err());
        assert!(parse_workers("eight").is_err());
    }

    #[test]
    fn test_cli_parses_download_command() {
        let cli = Cli::try_parse_from([
            "open-data-downloader",
            "download",
            "vehicles",
            "--base-url",
            "https://opendata.example.org",
            "--full",
            "--workers",
            "4",
        ])
        .unwrap();

        match cli.command {
            Commands::Download(args) => {
                assert_eq!(args.names, vec!["vehicles"]);
                assert!(args.full);
                assert_eq!(args.workers, Some(4));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_oversized_worker_pool() {
        let result = Cli::try_parse_from([
            "open-data-downloader",
            "download",
            "--base-url",
            "https://opendata.example.org",
            "--workers",
            "64",
        ]);
        assert!(result.is_err());
    }
}
