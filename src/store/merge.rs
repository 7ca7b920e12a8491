//! Primary-key merge of fetched pages into the dataset table.
//!
//! New rows are read before existing rows and the first occurrence of each
//! primary-key tuple wins, so a refetched row replaces its stored version
//! while rows only present on disk survive. Within the new batch the first
//! occurrence in page order wins, which makes reruns deterministic. The
//! merged table is written to a sibling temp file and renamed into place;
//! readers never observe a partial table.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, StringBuilder};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use crate::store::page::{file_columns, file_row_count, for_each_row, list_pages, utf8_schema, zstd_props};
use crate::store::StoreError;

const WRITE_BATCH_ROWS: usize = 50_000;

/// Result of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Rows in the table after the merge
    pub rows: u64,
    /// Whether the table file was rewritten
    pub updated: bool,
}

/// Merges page artifacts into a deduplicated parquet table.
#[derive(Debug, Clone, Default)]
pub struct MergeEngine;

impl MergeEngine {
    /// Create a merge engine.
    pub fn new() -> Self {
        Self
    }

    /// Merge the pages in `pages_dir` into the table at `dest`.
    ///
    /// An empty batch leaves `dest` untouched and reports its current row
    /// count. If `dest` exists but its column set differs from the batch,
    /// the merge fails with [`StoreError::SchemaDrift`] and the caller is
    /// expected to fall back to a full refresh.
    pub fn merge(
        &self,
        pages_dir: &Path,
        dest: &Path,
        primary_key: &[String],
    ) -> Result<MergeOutcome, StoreError> {
        let pages = list_pages(pages_dir)?;
        if pages.is_empty() {
            let rows = if dest.exists() {
                file_row_count(dest)?
            } else {
                0
            };
            tracing::info!(table = %dest.display(), rows, "no new rows, table unchanged");
            return Ok(MergeOutcome {
                rows,
                updated: false,
            });
        }

        let columns = union_columns(&pages)?;
        let existing = if dest.exists() {
            let existing_columns: BTreeSet<String> =
                file_columns(dest)?.into_iter().collect();
            let incoming: BTreeSet<String> = columns.iter().cloned().collect();
            if existing_columns != incoming {
                return Err(StoreError::SchemaDrift {
                    existing: join(&existing_columns),
                    incoming: join(&incoming),
                });
            }
            Some(dest.to_path_buf())
        } else {
            None
        };

        self.write_merged(&pages, existing.as_deref(), dest, &columns, primary_key)
    }

    /// Rewrite `dest` from the pages alone, discarding whatever is on disk.
    ///
    /// Used for full refreshes, including the schema-drift fallback. Rows
    /// are still deduplicated by primary key within the batch.
    pub fn overwrite(
        &self,
        pages_dir: &Path,
        dest: &Path,
        primary_key: &[String],
    ) -> Result<MergeOutcome, StoreError> {
        let pages = list_pages(pages_dir)?;
        if pages.is_empty() {
            let rows = if dest.exists() {
                file_row_count(dest)?
            } else {
                0
            };
            return Ok(MergeOutcome {
                rows,
                updated: false,
            });
        }
        let columns = union_columns(&pages)?;
        self.write_merged(&pages, None, dest, &columns, primary_key)
    }

    fn write_merged(
        &self,
        pages: &[PathBuf],
        existing: Option<&Path>,
        dest: &Path,
        columns: &[String],
        primary_key: &[String],
    ) -> Result<MergeOutcome, StoreError> {
        let key_indices = key_indices(columns, primary_key)?;

        let tmp = temp_path(dest);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut writer = TableWriter::create(&tmp, columns)?;
        let mut seen: HashSet<String> = HashSet::new();

        let mut ingest = |path: &Path,
                          writer: &mut TableWriter,
                          seen: &mut HashSet<String>|
         -> Result<(), StoreError> {
            for_each_row(path, columns, |row| {
                if seen.insert(encode_key(&row, &key_indices)) {
                    writer.push(row)?;
                }
                Ok(())
            })
        };

        for page in pages {
            ingest(page, &mut writer, &mut seen)?;
        }
        if let Some(existing) = existing {
            ingest(existing, &mut writer, &mut seen)?;
        }

        let rows = writer.close()?;
        fs::rename(&tmp, dest)?;
        tracing::info!(table = %dest.display(), rows, "table merged");

        Ok(MergeOutcome {
            rows,
            updated: true,
        })
    }
}

/// Sorted union of column names across page files.
fn union_columns(pages: &[PathBuf]) -> Result<Vec<String>, StoreError> {
    let mut names = BTreeSet::new();
    for page in pages {
        names.extend(file_columns(page)?);
    }
    Ok(names.into_iter().collect())
}

fn key_indices(columns: &[String], primary_key: &[String]) -> Result<Vec<usize>, StoreError> {
    primary_key
        .iter()
        .map(|key| {
            columns
                .iter()
                .position(|c| c == key)
                .ok_or_else(|| StoreError::MissingPrimaryKey(key.clone()))
        })
        .collect()
}

/// Encode a primary-key tuple as a set key.
///
/// Each component is length-prefixed, so component boundaries survive any
/// byte the portal can put in a value, and a null component is distinct
/// from every string.
fn encode_key(row: &[Option<String>], key_indices: &[usize]) -> String {
    use std::fmt::Write;

    let mut key = String::new();
    for index in key_indices {
        match &row[*index] {
            Some(value) => {
                let _ = write!(key, "{}:{};", value.len(), value);
            }
            None => key.push_str("n;"),
        }
    }
    key
}

fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn join(names: &BTreeSet<String>) -> String {
    names.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Buffered batch writer over one parquet file.
struct TableWriter {
    writer: ArrowWriter<fs::File>,
    columns: Vec<String>,
    buffer: Vec<Vec<Option<String>>>,
    written: u64,
}

impl TableWriter {
    fn create(path: &Path, columns: &[String]) -> Result<Self, StoreError> {
        let file = fs::File::create(path)?;
        let writer = ArrowWriter::try_new(file, utf8_schema(columns), Some(zstd_props()))?;
        Ok(Self {
            writer,
            columns: columns.to_vec(),
            buffer: Vec::new(),
            written: 0,
        })
    }

    fn push(&mut self, row: Vec<Option<String>>) -> Result<(), StoreError> {
        self.buffer.push(row);
        if self.buffer.len() >= WRITE_BATCH_ROWS {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut builders: Vec<StringBuilder> =
            self.columns.iter().map(|_| StringBuilder::new()).collect();
        for row in &self.buffer {
            for (value, builder) in row.iter().zip(builders.iter_mut()) {
                builder.append_option(value.as_deref());
            }
        }
        let arrays: Vec<ArrayRef> = builders
            .into_iter()
            .map(|mut b| Arc::new(b.finish()) as ArrayRef)
            .collect();
        let batch = RecordBatch::try_new(utf8_schema(&self.columns), arrays)?;
        self.writer.write(&batch)?;
        self.written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    fn close(mut self) -> Result<u64, StoreError> {
        self.flush()?;
        self.writer.close()?;
        Ok(self.written)
    }
}
