//! Backup progress reporting.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::info;

/// Progress information during a backup run.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    /// Source entries processed so far.
    pub entries_processed: u64,
    /// Files copied as new.
    pub copied: u64,
    /// Files copied because they changed.
    pub modified: u64,
    /// Destination entries removed.
    pub deleted: u64,
    /// Failures so far.
    pub errors: u64,
    /// Entry that triggered this report.
    pub current_path: PathBuf,
    /// Time since the run started.
    pub elapsed: Duration,
}

impl SyncProgress {
    /// Calculate throughput in entries per second.
    pub fn entries_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.entries_processed as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// Event counter shared by reconciliation workers.
///
/// Every `interval` processed entries it logs a progress line and publishes
/// a [`SyncProgress`] to subscribers.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    start_time: Instant,
    interval: u64,
    tx: broadcast::Sender<SyncProgress>,
    processed: AtomicU64,
    copied: AtomicU64,
    modified: AtomicU64,
    deleted: AtomicU64,
    errors: AtomicU64,
}

impl ProgressTracker {
    pub fn new(interval: u64, tx: broadcast::Sender<SyncProgress>) -> Self {
        Self {
            start_time: Instant::now(),
            interval,
            tx,
            processed: AtomicU64::new(0),
            copied: AtomicU64::new(0),
            modified: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn record_processed(&self, path: &Path) {
        let count = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if self.interval > 0 && count % self.interval == 0 {
            let progress = self.snapshot(path);
            info!(
                "processed {} entries ({:.0}/s; {} copied, {} modified, {} deleted, {} errors)",
                progress.entries_processed,
                progress.entries_per_second(),
                progress.copied,
                progress.modified,
                progress.deleted,
                progress.errors
            );
            // No subscribers is fine.
            let _ = self.tx.send(progress);
        }
    }

    pub fn record_copied(&self) {
        self.copied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_modified(&self) {
        self.modified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, current_path: &Path) -> SyncProgress {
        SyncProgress {
            entries_processed: self.processed.load(Ordering::Relaxed),
            copied: self.copied.load(Ordering::Relaxed),
            modified: self.modified.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            current_path: current_path.to_path_buf(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_every_interval() {
        let (tx, mut rx) = broadcast::channel(16);
        let tracker = ProgressTracker::new(2, tx);

        tracker.record_copied();
        tracker.record_processed(Path::new("/a"));
        assert!(rx.try_recv().is_err());

        tracker.record_processed(Path::new("/b"));
        let progress = rx.try_recv().unwrap();
        assert_eq!(progress.entries_processed, 2);
        assert_eq!(progress.copied, 1);
        assert_eq!(progress.current_path, PathBuf::from("/b"));
    }

    #[test]
    fn test_zero_interval_is_silent() {
        let (tx, mut rx) = broadcast::channel(16);
        let tracker = ProgressTracker::new(0, tx);
        for _ in 0..10 {
            tracker.record_processed(Path::new("/a"));
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.snapshot(Path::new("/a")).entries_processed, 10);
    }
}
