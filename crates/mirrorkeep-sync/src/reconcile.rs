//! Tree reconciliation: make a destination directory mirror a source one.
//!
//! For each directory the reconciler:
//!
//! 1. ensures the destination directory exists,
//! 2. drops source entries matching the root's exclusion patterns,
//! 3. classifies and copies files (on the worker pool), then recurses into
//!    subdirectories,
//! 4. deletes destination entries with no surviving source counterpart.
//!
//! An excluded directory that still contains a nested backup root is not
//! deleted. Its destination is pruned down to the path leading to that root.
//!
//! Deletion in a directory only starts once all of its copies are done.
//! Failures are recorded per entry and never stop sibling work.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use tracing::{debug, info, warn};

use mirrorkeep_core::{EntryError, EntryErrorKind, SnapshotStore, SyncStats};

use crate::detect::{Change, ChangeDetector};
use crate::fsops::{copy_file, ensure_dir, remove_entry};
use crate::progress::ProgressTracker;
use crate::rules::RuleSet;

/// Counters and failures from reconciling one subtree.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileOutcome {
    /// Accumulated counters.
    pub stats: SyncStats,
    /// Entry failures, in the order they were hit.
    pub errors: Vec<EntryError>,
}

impl ReconcileOutcome {
    /// Check whether any entry failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A source entry selected for mirroring.
struct SourceEntry {
    name: OsString,
    path: PathBuf,
    metadata: Metadata,
}

/// What a directory listing yields for one reconciliation step.
#[derive(Default)]
struct SourceListing {
    files: Vec<SourceEntry>,
    dirs: Vec<SourceEntry>,
    /// Excluded directories that lead to a nested root.
    pruned: Vec<OsString>,
    /// Destination names that must survive.
    keep: HashSet<OsString>,
}

/// Mirrors source directories into destination directories.
pub struct Reconciler<'a> {
    snapshot: &'a dyn SnapshotStore,
    rules_file_name: OsString,
    nested_roots: &'a [PathBuf],
    pool: Option<&'a ThreadPool>,
    progress: Option<&'a ProgressTracker>,
}

impl<'a> Reconciler<'a> {
    /// Create a reconciler that records modification times in `snapshot`.
    ///
    /// `rules_file_name` marks nested backup roots, which are left to
    /// their own reconciliation pass.
    pub fn new(snapshot: &'a dyn SnapshotStore, rules_file_name: impl Into<OsString>) -> Self {
        Self {
            snapshot,
            rules_file_name: rules_file_name.into(),
            nested_roots: &[],
            pool: None,
            progress: None,
        }
    }

    /// Source directories reconciled by their own pass, at any depth.
    ///
    /// Directories that merely contain a rules file are recognised without
    /// this; it is needed for roots sitting below an excluded directory.
    pub fn with_nested_roots(mut self, roots: &'a [PathBuf]) -> Self {
        self.nested_roots = roots;
        self
    }

    /// Run file work on `pool` instead of the global rayon pool.
    pub fn with_pool(mut self, pool: &'a ThreadPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub(crate) fn with_progress(mut self, progress: &'a ProgressTracker) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Mirror `source` into `dest`, excluding entries matched by `rules`.
    ///
    /// `source` is treated as a backup root: its own rules file is mirrored
    /// but never counted in the statistics.
    pub fn reconcile(&self, source: &Path, dest: &Path, rules: &RuleSet) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        self.reconcile_dir(source, dest, rules, &mut outcome);
        outcome
    }

    fn reconcile_dir(&self, source: &Path, dest: &Path, rules: &RuleSet, outcome: &mut ReconcileOutcome) {
        match ensure_dir(dest) {
            Ok(true) => {
                info!("Deleted: {} (replaced by directory)", dest.display());
                outcome.stats.deleted += 1;
                self.with_tracker(|p| p.record_deleted());
            }
            Ok(false) => {}
            Err(e) => {
                self.record_error(outcome, EntryError::from_io(dest, &e, EntryErrorKind::Copy));
                return;
            }
        }

        let Some(listing) = self.collect_source(source, rules, outcome) else {
            return;
        };

        let results: Vec<(bool, Result<SyncStats, EntryError>)> = self.install(|| {
            listing
                .files
                .par_iter()
                .map(|entry| {
                    let is_rules_file = entry.name == self.rules_file_name;
                    (is_rules_file, self.sync_file(entry, dest, is_rules_file))
                })
                .collect()
        });
        for (is_rules_file, result) in results {
            match result {
                Ok(stats) if !is_rules_file => outcome.stats.merge(&stats),
                Ok(_) => {}
                Err(err) => self.record_error(outcome, err),
            }
        }

        for dir in &listing.dirs {
            outcome.stats.checked += 1;
            self.with_tracker(|p| p.record_processed(&dir.path));
            self.reconcile_dir(&dir.path, &dest.join(&dir.name), rules, outcome);
        }

        for name in &listing.pruned {
            self.prune_dir(&source.join(name), &dest.join(name), outcome);
        }

        self.remove_stale(dest, &listing.keep, outcome);
    }

    /// Strip an excluded destination directory down to the entries leading
    /// to nested roots below `source`.
    fn prune_dir(&self, source: &Path, dest: &Path, outcome: &mut ReconcileOutcome) {
        if !dest.symlink_metadata().is_ok_and(|m| m.is_dir()) {
            return;
        }

        let mut keep = HashSet::new();
        for root in self.nested_roots {
            let Ok(rel) = root.strip_prefix(source) else {
                continue;
            };
            if let Some(first) = rel.components().next() {
                keep.insert(first.as_os_str().to_os_string());
            }
        }

        for name in &keep {
            let child = source.join(name);
            if !self.is_nested_root(&child) {
                self.prune_dir(&child, &dest.join(name), outcome);
            }
        }
        self.remove_stale(dest, &keep, outcome);
    }

    /// List `source`, splitting it into files and directories to mirror.
    ///
    /// `None` means the directory could not be listed and nothing in the
    /// destination may be deleted.
    fn collect_source(&self, source: &Path, rules: &RuleSet, outcome: &mut ReconcileOutcome) -> Option<SourceListing> {
        let read_dir = match fs::read_dir(source) {
            Ok(r) => r,
            Err(e) => {
                self.record_error(outcome, EntryError::from_io(source, &e, EntryErrorKind::Read));
                return None;
            }
        };

        let mut listing = SourceListing::default();

        for entry in read_dir {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    // The name is unknown, so deleting anything would be a guess.
                    self.record_error(outcome, EntryError::from_io(source, &e, EntryErrorKind::Read));
                    return None;
                }
            };
            let name = entry.file_name();
            let path = entry.path();

            if self.is_nested_root(&path) {
                debug!("Skipping {}: has its own rules file", path.display());
                listing.keep.insert(name);
                continue;
            }

            if rules.is_excluded(&name) {
                if self.leads_to_nested_root(&path) {
                    debug!("Excluded: {} (pruned around nested roots)", path.display());
                    listing.keep.insert(name.clone());
                    listing.pruned.push(name);
                } else {
                    debug!("Excluded: {}", path.display());
                }
                continue;
            }

            let metadata = match fs::metadata(&path) {
                Ok(m) => m,
                Err(e) => {
                    listing.keep.insert(name);
                    self.record_error(outcome, EntryError::from_io(&path, &e, EntryErrorKind::Read));
                    continue;
                }
            };

            if metadata.is_dir() {
                if is_symlink_loop(&entry, &path, source) {
                    listing.keep.insert(name);
                    self.record_error(
                        outcome,
                        EntryError::new(&path, "symlink points to an ancestor directory", EntryErrorKind::Read),
                    );
                    continue;
                }
                listing.keep.insert(name.clone());
                listing.dirs.push(SourceEntry { name, path, metadata });
            } else if metadata.is_file() {
                listing.keep.insert(name.clone());
                listing.files.push(SourceEntry { name, path, metadata });
            } else {
                debug!("Skipping {}: not a regular file or directory", path.display());
            }
        }

        Some(listing)
    }

    fn is_nested_root(&self, path: &Path) -> bool {
        self.nested_roots.iter().any(|r| r == path) || path.join(&self.rules_file_name).is_file()
    }

    fn leads_to_nested_root(&self, path: &Path) -> bool {
        self.nested_roots.iter().any(|r| r != path && r.starts_with(path))
    }

    /// Classify one file and copy it when needed.
    fn sync_file(&self, entry: &SourceEntry, dest_dir: &Path, is_rules_file: bool) -> Result<SyncStats, EntryError> {
        let target = dest_dir.join(&entry.name);
        let mut stats = SyncStats { checked: 1, ..Default::default() };
        if !is_rules_file {
            self.with_tracker(|p| p.record_processed(&entry.path));
        }

        let detection = ChangeDetector::new(self.snapshot)
            .classify(&entry.path, &entry.metadata, &target)
            .map_err(|e| EntryError::from_io(&entry.path, &e, EntryErrorKind::Hash))?;
        stats.hashed += detection.hashed;

        if !detection.change.needs_copy() {
            return Ok(stats);
        }

        if let Err(e) = self.copy_over(entry, &target) {
            // Without this the next run would trust the recorded time and
            // never retry the copy.
            self.snapshot.forget(&entry.path);
            return Err(EntryError::new(
                &entry.path,
                format!("Unable to copy to {}: {e}", target.display()),
                EntryErrorKind::Copy,
            ));
        }

        stats.bytes_copied += entry.metadata.len();
        match detection.change {
            Change::New => {
                stats.copied += 1;
                if !is_rules_file {
                    info!("Copied: {} to {}", entry.path.display(), target.display());
                    self.with_tracker(|p| p.record_copied());
                }
            }
            Change::Modified => {
                stats.modified += 1;
                if !is_rules_file {
                    info!("Modified: {} to {}", entry.path.display(), target.display());
                    self.with_tracker(|p| p.record_modified());
                }
            }
            Change::Unchanged => {}
        }
        Ok(stats)
    }

    fn copy_over(&self, entry: &SourceEntry, target: &Path) -> std::io::Result<u64> {
        if target.symlink_metadata().is_ok_and(|m| m.is_dir()) {
            fs::remove_dir_all(target)?;
        }
        copy_file(&entry.path, target, &entry.metadata)
    }

    /// Delete destination entries that are not in `keep`.
    fn remove_stale(&self, dest: &Path, keep: &HashSet<OsString>, outcome: &mut ReconcileOutcome) {
        let read_dir = match fs::read_dir(dest) {
            Ok(r) => r,
            Err(e) => {
                self.record_error(outcome, EntryError::from_io(dest, &e, EntryErrorKind::Read));
                return;
            }
        };

        let stale: Vec<PathBuf> = read_dir
            .filter_map(Result::ok)
            .filter(|e| !keep.contains(&e.file_name()))
            .map(|e| e.path())
            .collect();

        for path in stale {
            match remove_entry(&path) {
                Ok(()) => {
                    info!("Deleted: {}", path.display());
                    outcome.stats.deleted += 1;
                    self.with_tracker(|p| p.record_deleted());
                }
                Err(e) => {
                    self.record_error(outcome, EntryError::from_io(&path, &e, EntryErrorKind::Delete));
                }
            }
        }
    }

    fn record_error(&self, outcome: &mut ReconcileOutcome, error: EntryError) {
        warn!("{error}");
        outcome.stats.errors += 1;
        outcome.errors.push(error);
        self.with_tracker(|p| p.record_error());
    }

    fn with_tracker(&self, f: impl FnOnce(&ProgressTracker)) {
        if let Some(progress) = self.progress {
            f(progress);
        }
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

/// A symlinked directory that resolves to `parent` or one of its ancestors
/// would make the walk recurse forever.
fn is_symlink_loop(entry: &fs::DirEntry, path: &Path, parent: &Path) -> bool {
    if !entry.file_type().is_ok_and(|t| t.is_symlink()) {
        return false;
    }
    match (fs::canonicalize(path), fs::canonicalize(parent)) {
        (Ok(target), Ok(parent)) => parent.starts_with(&target),
        _ => false,
    }
}
