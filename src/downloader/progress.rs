//! Progress tracking for concurrent dataset downloads.
//!
//! Each dataset registers its own handle with independent counters; page
//! workers clone the handle and report completed pages. A structured log
//! line is emitted whenever completion crosses the configured percentage
//! step, and exactly once at 100%.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::downloader::config::PROGRESS_STEP_PCT;

/// Factory configuring the emission cadence for dataset handles.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    min_step_pct: u64,
}

impl ProgressTracker {
    /// Tracker emitting at every `min_step_pct` percent of completed pages.
    pub fn new(min_step_pct: u64) -> Self {
        Self {
            min_step_pct: min_step_pct.max(1),
        }
    }

    /// Register a dataset with its planned page count.
    pub fn dataset(&self, name: &str, planned_pages: usize) -> DatasetProgress {
        DatasetProgress {
            inner: Arc::new(Mutex::new(ProgressState {
                name: name.to_string(),
                planned_pages,
                pages: 0,
                rows: 0,
                bytes: 0,
                last_reported_pct: 0,
                started: Instant::now(),
            })),
            min_step_pct: self.min_step_pct,
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(PROGRESS_STEP_PCT)
    }
}

#[derive(Debug)]
struct ProgressState {
    name: String,
    planned_pages: usize,
    pages: usize,
    rows: u64,
    bytes: u64,
    last_reported_pct: u64,
    started: Instant,
}

impl ProgressState {
    fn percentage(&self) -> u64 {
        if self.planned_pages == 0 {
            return 100;
        }
        (self.pages as u64 * 100) / self.planned_pages as u64
    }
}

/// Point-in-time counters for one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Pages completed so far
    pub pages: usize,
    /// Rows fetched so far
    pub rows: u64,
    /// Bytes written so far
    pub bytes: u64,
}

/// Cloneable per-dataset progress handle.
#[derive(Debug, Clone)]
pub struct DatasetProgress {
    inner: Arc<Mutex<ProgressState>>,
    min_step_pct: u64,
}

impl DatasetProgress {
    /// Record one completed page. Returns whether a progress line was logged.
    pub fn record_page(&self, rows: u64, bytes: u64) -> bool {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.pages += 1;
        state.rows += rows;
        state.bytes += bytes;

        let pct = state.percentage();
        let crossed_step = pct >= state.last_reported_pct + self.min_step_pct;
        let finished = pct >= 100 && state.last_reported_pct < 100;
        if !crossed_step && !finished {
            return false;
        }

        tracing::info!(
            dataset = %state.name,
            pages = state.pages,
            planned_pages = state.planned_pages,
            rows = state.rows,
            bytes = state.bytes,
            percent = pct.min(100),
            elapsed = %format_duration(state.started.elapsed()),
            "download progress"
        );
        state.last_reported_pct = pct;
        true
    }

    /// Shrink the planned page count after an early end-of-data signal, so
    /// completion can still reach 100%.
    pub fn set_planned_pages(&self, planned_pages: usize) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.planned_pages = planned_pages;
    }

    /// Current counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        ProgressSnapshot {
            pages: state.pages,
            rows: state.rows,
            bytes: state.bytes,
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emission_at_step_boundaries() {
        let tracker = ProgressTracker::new(5);
        let progress = tracker.dataset("vehicles", 40);

        // 40 pages at 2.5% each: every second page crosses a 5% boundary.
        let emitted = (0..40).filter(|_| progress.record_page(100, 1000)).count();
        assert_eq!(emitted, 20);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.pages, 40);
        assert_eq!(snapshot.rows, 4000);
        assert_eq!(snapshot.bytes, 40_000);
    }

    #[test]
    fn test_final_page_always_emits() {
        let tracker = ProgressTracker::new(5);
        let progress = tracker.dataset("vehicles", 3);

        assert!(progress.record_page(50_000, 1));
        assert!(progress.record_page(50_000, 1));
        assert!(progress.record_page(20_000, 1));
        assert_eq!(progress.snapshot().rows, 120_000);
    }

    #[test]
    fn test_shrunk_plan_reaches_completion() {
        let tracker = ProgressTracker::new(5);
        let progress = tracker.dataset("vehicles", 10);

        progress.record_page(10, 1);
        progress.set_planned_pages(2);
        // Second page is now the last one and must report 100%.
        assert!(progress.record_page(5, 1));
    }

    #[test]
    fn test_independent_dataset_handles() {
        let tracker = ProgressTracker::default();
        let a = tracker.dataset("vehicles", 2);
        let b = tracker.dataset("defects", 2);

        a.record_page(10, 100);
        assert_eq!(a.snapshot().pages, 1);
        assert_eq!(b.snapshot().pages, 0);
    }
}
