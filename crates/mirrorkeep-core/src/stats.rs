//! Reconciliation counters.

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// Counters accumulated while reconciling a subtree.
///
/// Every recursion level returns its own value and the caller merges it,
/// so totals aggregate bottom-up from leaf directories to the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Source entries (files and directories) visited.
    pub checked: u64,
    /// Files copied because the destination had no entry of that name.
    pub copied: u64,
    /// Files copied because their content changed.
    pub modified: u64,
    /// Destination entries removed.
    pub deleted: u64,
    /// Files whose content was hashed.
    pub hashed: u64,
    /// Bytes written into the destination.
    pub bytes_copied: u64,
    /// Entry and subtree failures.
    pub errors: u64,
}

impl SyncStats {
    /// Create new empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge another set of counters into this one.
    pub fn merge(&mut self, other: &SyncStats) {
        self.checked += other.checked;
        self.copied += other.copied;
        self.modified += other.modified;
        self.deleted += other.deleted;
        self.hashed += other.hashed;
        self.bytes_copied += other.bytes_copied;
        self.errors += other.errors;
    }

    /// Number of copy and delete actions taken.
    pub fn changes(&self) -> u64 {
        self.copied + self.modified + self.deleted
    }

    /// Check whether any failure was recorded.
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

impl AddAssign for SyncStats {
    fn add_assign(&mut self, rhs: Self) {
        self.merge(&rhs);
    }
}

impl std::iter::Sum for SyncStats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::new(), |mut acc, s| {
            acc += s;
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_default() {
        let stats = SyncStats::default();
        assert_eq!(stats.changes(), 0);
        assert!(!stats.has_errors());
    }

    #[test]
    fn test_stats_merge() {
        let mut total = SyncStats::new();
        total += SyncStats {
            checked: 3,
            copied: 1,
            bytes_copied: 10,
            ..Default::default()
        };
        total += SyncStats {
            checked: 2,
            deleted: 1,
            errors: 1,
            ..Default::default()
        };

        assert_eq!(total.checked, 5);
        assert_eq!(total.changes(), 2);
        assert_eq!(total.bytes_copied, 10);
        assert!(total.has_errors());
    }

    #[test]
    fn test_stats_sum() {
        let parts = vec![
            SyncStats { modified: 1, ..Default::default() },
            SyncStats { modified: 2, ..Default::default() },
        ];
        let total: SyncStats = parts.into_iter().sum();
        assert_eq!(total.modified, 3);
    }
}
