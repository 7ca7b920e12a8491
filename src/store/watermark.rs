//! Per-dataset fetch watermarks.
//!
//! A watermark records the last date for which a dataset was fetched and
//! merged successfully. It is read to build the incremental filter and
//! written only after both the fetch and the merge complete, so a failed
//! run never advances it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::store::StoreError;

/// Date format stored in `last_date`.
pub const WATERMARK_DATE_FORMAT: &str = "%Y%m%d";

/// One dataset's watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Last fetched date, `YYYYMMDD`
    pub last_date: String,
    /// When the watermark was written, RFC 3339
    pub updated_at: String,
}

/// JSON-file store of watermarks keyed by dataset id.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    /// Store backed by the file at `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Watermark for `dataset_id`, if one has been recorded.
    pub fn get(&self, dataset_id: &str) -> Result<Option<Watermark>, StoreError> {
        Ok(self.load()?.remove(dataset_id))
    }

    /// Record `last_date` for `dataset_id`, stamped with the current time.
    pub fn set(&self, dataset_id: &str, last_date: &str) -> Result<(), StoreError> {
        let mut marks = self.load()?;
        marks.insert(
            dataset_id.to_string(),
            Watermark {
                last_date: last_date.to_string(),
                updated_at: Utc::now().to_rfc3339(),
            },
        );
        self.save(&marks)
    }

    /// Today's date in watermark format.
    pub fn today() -> String {
        Utc::now().format(WATERMARK_DATE_FORMAT).to_string()
    }

    fn load(&self) -> Result<BTreeMap<String, Watermark>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, marks: &BTreeMap<String, Watermark>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = temp_path(&self.path);
        fs::write(&tmp, serde_json::to_string_pretty(marks)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
