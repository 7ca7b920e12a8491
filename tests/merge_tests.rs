//! Integration tests for the primary-key merge over real parquet files.

use std::collections::HashSet;
use std::path::Path;

use open_data_downloader::fetcher::Record;
use open_data_downloader::store::page::{file_row_count, for_each_row, page_file_name, write_page};
use open_data_downloader::store::MergeEngine;

fn row(id: u64, value: &str) -> Record {
    let mut record = Record::new();
    record.insert("id".to_string(), id.to_string());
    record.insert("value".to_string(), value.to_string());
    record
}

fn pk() -> Vec<String> {
    vec!["id".to_string()]
}

fn read_pairs(path: &Path) -> Vec<(String, String)> {
    let columns = vec!["id".to_string(), "value".to_string()];
    let mut rows = Vec::new();
    for_each_row(path, &columns, |r| {
        rows.push((r[0].clone().unwrap(), r[1].clone().unwrap()));
        Ok(())
    })
    .unwrap();
    rows
}

#[test]
fn incremental_batch_replaces_overlapping_keys() {
    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("table.parquet");
    let engine = MergeEngine::new();

    // Seed the table with keys 1..=1000.
    let seed = tempfile::tempdir().unwrap();
    let initial: Vec<Record> = (1..=1000).map(|id| row(id, "old")).collect();
    write_page(&seed.path().join(page_file_name(0)), &initial).unwrap();
    assert_eq!(engine.merge(seed.path(), &dest, &pk()).unwrap().rows, 1000);

    // New batch covers keys 995..=1004: six overlaps, four fresh rows.
    let batch = tempfile::tempdir().unwrap();
    let fresh: Vec<Record> = (995..=1004).map(|id| row(id, "new")).collect();
    write_page(&batch.path().join(page_file_name(0)), &fresh).unwrap();

    let outcome = engine.merge(batch.path(), &dest, &pk()).unwrap();
    assert_eq!(outcome.rows, 1004);
    assert_eq!(file_row_count(&dest).unwrap(), 1004);

    let rows = read_pairs(&dest);
    for (id, value) in &rows {
        let id: u64 = id.parse().unwrap();
        let expected = if (995..=1004).contains(&id) { "new" } else { "old" };
        assert_eq!(value, expected, "key {id}");
    }
}

#[test]
fn merged_table_has_no_duplicate_keys() {
    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("table.parquet");
    let engine = MergeEngine::new();

    // Two pages with overlapping keys, merged twice over the same table.
    for _ in 0..2 {
        let batch = tempfile::tempdir().unwrap();
        let a: Vec<Record> = (0..100).map(|id| row(id, "a")).collect();
        let b: Vec<Record> = (50..150).map(|id| row(id, "b")).collect();
        write_page(&batch.path().join(page_file_name(0)), &a).unwrap();
        write_page(&batch.path().join(page_file_name(1)), &b).unwrap();
        engine.merge(batch.path(), &dest, &pk()).unwrap();
    }

    let rows = read_pairs(&dest);
    assert_eq!(rows.len(), 150);
    let keys: HashSet<&String> = rows.iter().map(|(id, _)| id).collect();
    assert_eq!(keys.len(), rows.len());
}

#[test]
fn empty_batch_reports_existing_rows() {
    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("table.parquet");
    let engine = MergeEngine::new();

    let seed = tempfile::tempdir().unwrap();
    let initial: Vec<Record> = (0..10).map(|id| row(id, "v")).collect();
    write_page(&seed.path().join(page_file_name(0)), &initial).unwrap();
    engine.merge(seed.path(), &dest, &pk()).unwrap();

    let empty = tempfile::tempdir().unwrap();
    let outcome = engine.merge(empty.path(), &dest, &pk()).unwrap();
    assert_eq!(outcome.rows, 10);
    assert!(!outcome.updated);
    assert_eq!(read_pairs(&dest).len(), 10);
}
