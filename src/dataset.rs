//! Dataset descriptors and registry loading.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::downloader::config::PAGE_SIZE;

fn default_page_size() -> u64 {
    PAGE_SIZE
}

/// Describes one dataset on the portal: its resource id, how to identify a
/// row, and optional query clauses applied to every page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Portal resource identifier (e.g., "m9d7-ebf2")
    pub id: String,
    /// Short name used for output files and logging
    pub name: String,
    /// Columns that uniquely identify a row
    pub primary_key: Vec<String>,
    /// Column holding a YYYYMMDD date, enabling incremental fetch
    #[serde(default)]
    pub date_field: Option<String>,
    /// Optional `$select` projection
    #[serde(default)]
    pub select: Option<String>,
    /// Optional `$where` filter applied in addition to the watermark filter
    #[serde(default)]
    pub filter: Option<String>,
    /// Optional `$group` clause; when set, the row count uses
    /// `count(distinct <group>)`
    #[serde(default)]
    pub group: Option<String>,
    /// Optional `$order` clause
    #[serde(default)]
    pub order: Option<String>,
    /// Rows requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

impl DatasetDescriptor {
    /// Minimal descriptor with defaults for the optional clauses.
    pub fn new(id: impl Into<String>, name: impl Into<String>, primary_key: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            primary_key,
            date_field: None,
            select: None,
            filter: None,
            group: None,
            order: None,
            page_size: PAGE_SIZE,
        }
    }

    /// Set the incremental date column.
    pub fn with_date_field(mut self, field: impl Into<String>) -> Self {
        self.date_field = Some(field.into());
        self
    }

    /// Validate descriptor fields.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("Dataset id cannot be empty".to_string());
        }
        if self.name.is_empty() {
            return Err("Dataset name cannot be empty".to_string());
        }
        if self.primary_key.is_empty() {
            return Err(format!("Dataset '{}' has no primary key columns", self.name));
        }
        if self.page_size == 0 {
            return Err(format!("Dataset '{}' has a zero page size", self.name));
        }
        Ok(())
    }
}

/// Load and validate a dataset registry from a JSON file.
pub fn load_registry(path: &Path) -> Result<Vec<DatasetDescriptor>, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read dataset registry {}: {}", path.display(), e))?;
    let datasets: Vec<DatasetDescriptor> = serde_json::from_str(&raw)
        .map_err(|e| format!("Invalid dataset registry {}: {}", path.display(), e))?;
    for dataset in &datasets {
        dataset.validate()?;
    }
    Ok(datasets)
}
