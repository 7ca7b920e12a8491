//! CLI command implementations

pub mod download;
pub mod error;

pub use download::{Cli, Commands, DatasetsArgs, DownloadArgs, ExportArgs};
pub use error::CliError;
