//! Parquet page artifacts.
//!
//! Every fetched page lands on disk as its own parquet file before any
//! merging happens. Columns are nullable Utf8 across the board; the portal
//! types its fields loosely and different pages of one dataset can carry
//! different column subsets, so typing is deferred to downstream consumers.

use arrow::array::{Array, ArrayRef, StringArray, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::fetcher::Record;
use crate::store::StoreError;

const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// File name for the page at `index` within a fetch.
pub fn page_file_name(index: usize) -> String {
    format!("page_{index:05}.parquet")
}

/// Writer properties shared by all table files.
pub fn zstd_props() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::ZSTD(
            ZstdLevel::try_new(DEFAULT_ZSTD_LEVEL).unwrap_or_else(|_| ZstdLevel::default()),
        ))
        .set_dictionary_enabled(true)
        .build()
}

/// All-nullable Utf8 schema over `columns`.
pub fn utf8_schema(columns: &[String]) -> SchemaRef {
    Arc::new(Schema::new(
        columns
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ))
}

/// Write one page of records to `path`. Returns the file size in bytes.
///
/// The schema is the sorted union of field names in the page; a record
/// missing a field contributes a null. An empty page writes nothing and
/// reports zero bytes.
pub fn write_page(path: &Path, records: &[Record]) -> Result<u64, StoreError> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut names = BTreeSet::new();
    for record in records {
        for key in record.keys() {
            names.insert(key.clone());
        }
    }
    let columns: Vec<String> = names.into_iter().collect();

    let mut builders: Vec<StringBuilder> = columns.iter().map(|_| StringBuilder::new()).collect();
    for record in records {
        for (column, builder) in columns.iter().zip(builders.iter_mut()) {
            builder.append_option(record.get(column));
        }
    }
    let arrays: Vec<ArrayRef> = builders
        .into_iter()
        .map(|mut b| Arc::new(b.finish()) as ArrayRef)
        .collect();
    let batch = RecordBatch::try_new(utf8_schema(&columns), arrays)?;

    let file = fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(zstd_props()))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(fs::metadata(path)?.len())
}

/// Page artifacts in `dir`, sorted by file name (page index order).
pub fn list_pages(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut pages = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
            pages.push(path);
        }
    }
    pages.sort();
    Ok(pages)
}

/// Column names of a table file, in file order.
pub fn file_columns(path: &Path) -> Result<Vec<String>, StoreError> {
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    Ok(builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect())
}

/// Row count of a table file, from parquet metadata.
pub fn file_row_count(path: &Path) -> Result<u64, StoreError> {
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    Ok(builder.metadata().file_metadata().num_rows().max(0) as u64)
}

/// Stream a table file row by row, projected onto `columns`.
///
/// Columns absent from the file yield nulls, so files with differing column
/// subsets can be read against one union schema.
pub fn for_each_row<F>(path: &Path, columns: &[String], mut on_row: F) -> Result<(), StoreError>
where
    F: FnMut(Vec<Option<String>>) -> Result<(), StoreError>,
{
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let indices: Vec<Option<usize>> = columns
        .iter()
        .map(|name| schema.index_of(name).ok())
        .collect();
    let reader = builder.build()?;

    for batch in reader {
        let batch = batch?;
        let mut arrays: Vec<Option<&StringArray>> = Vec::with_capacity(indices.len());
        for (column, index) in columns.iter().zip(&indices) {
            match index {
                None => arrays.push(None),
                Some(i) => {
                    let array = batch
                        .column(*i)
                        .as_any()
                        .downcast_ref::<StringArray>()
                        .ok_or_else(|| StoreError::InvalidTable {
                            path: path.display().to_string(),
                            reason: format!("column '{column}' is not Utf8"),
                        })?;
                    arrays.push(Some(array));
                }
            }
        }

        for row in 0..batch.num_rows() {
            let values = arrays
                .iter()
                .map(|array| match array {
                    Some(a) if !a.is_null(row) => Some(a.value(row).to_string()),
                    _ => None,
                })
                .collect();
            on_row(values)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_page_file_name() {
        assert_eq!(page_file_name(0), "page_00000.parquet");
        assert_eq!(page_file_name(12), "page_00012.parquet");
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(page_file_name(0));

        let records = vec![
            record(&[("plate", "AB1"), ("mass", "1450")]),
            record(&[("plate", "AB2")]),
        ];
        let bytes = write_page(&path, &records).unwrap();
        assert!(bytes > 0);
        assert_eq!(file_row_count(&path).unwrap(), 2);
        assert_eq!(file_columns(&path).unwrap(), vec!["mass", "plate"]);

        let columns = vec!["plate".to_string(), "mass".to_string()];
        let mut rows = Vec::new();
        for_each_row(&path, &columns, |row| {
            rows.push(row);
            Ok(())
        })
        .unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Some("AB1".to_string()), Some("1450".to_string())],
                vec![Some("AB2".to_string()), None],
            ]
        );
    }

    #[test]
    fn test_missing_column_projects_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(page_file_name(0));
        write_page(&path, &[record(&[("plate", "AB1")])]).unwrap();

        let columns = vec!["plate".to_string(), "color".to_string()];
        let mut rows = Vec::new();
        for_each_row(&path, &columns, |row| {
            rows.push(row);
            Ok(())
        })
        .unwrap();
        assert_eq!(rows, vec![vec![Some("AB1".to_string()), None]]);
    }

    #[test]
    fn test_empty_page_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(page_file_name(0));
        assert_eq!(write_page(&path, &[]).unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_list_pages_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for index in [2usize, 0, 1] {
            let path = dir.path().join(page_file_name(index));
            write_page(&path, &[record(&[("k", "v")])]).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let pages = list_pages(dir.path()).unwrap();
        let names: Vec<_> = pages
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "page_00000.parquet",
                "page_00001.parquet",
                "page_00002.parquet"
            ]
        );
    }
}
