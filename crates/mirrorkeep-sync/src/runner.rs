//! Run orchestration: discover backup roots, reconcile each, persist the
//! snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use mirrorkeep_core::{BackupConfig, EntryError, Snapshot, SyncError, SyncStats};
use mirrorkeep_scan::{BackupRoot, RootFinder};

use crate::progress::{ProgressTracker, SyncProgress};
use crate::reconcile::Reconciler;
use crate::rules;

/// Buffer size of the progress broadcast channel.
pub const PROGRESS_CHANNEL_SIZE: usize = 100;

/// Outcome of one reconciled backup root.
#[derive(Debug, Clone, Serialize)]
pub struct RootReport {
    /// The root directory.
    pub source: PathBuf,
    /// Where it was mirrored.
    pub destination: PathBuf,
    /// Number of exclusion patterns applied.
    pub patterns: usize,
    /// Counters for this root only.
    pub stats: SyncStats,
}

/// Summary of a whole backup run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Totals across all roots.
    pub stats: SyncStats,
    /// Per-root results, in processing order.
    pub roots: Vec<RootReport>,
    /// Every failure that was logged and skipped.
    pub errors: Vec<EntryError>,
    /// Entries held by the snapshot at the end of the run.
    pub snapshot_entries: usize,
    /// Wall time of the run.
    pub duration: Duration,
}

impl RunReport {
    /// Whether the run finished without any logged failure.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn record_error(&mut self, error: EntryError) {
        self.stats.errors += 1;
        self.errors.push(error);
    }
}

/// A destination directory already handed out to some root.
struct Claim {
    source: PathBuf,
    root: PathBuf,
}

/// Shared state for reconciling the roots of one top-level source.
struct RootContext<'a> {
    snapshot: &'a Snapshot,
    /// Every root found under the source, so parents leave them alone.
    nested_roots: &'a [PathBuf],
    pool: &'a ThreadPool,
    tracker: &'a ProgressTracker,
}

/// Drives a complete backup run.
pub struct BackupRunner {
    config: BackupConfig,
    progress_tx: broadcast::Sender<SyncProgress>,
}

impl BackupRunner {
    /// Create a runner for `config`.
    pub fn new(config: BackupConfig) -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_SIZE);
        Self { config, progress_tx }
    }

    /// The configuration this runner uses.
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Subscribe to progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncProgress> {
        self.progress_tx.subscribe()
    }

    /// Discover every backup root under the configured sources.
    ///
    /// Sources that cannot be walked are reported as errors.
    pub fn discover(&self) -> (Vec<BackupRoot>, Vec<EntryError>) {
        let finder = RootFinder::new(&self.config.rules_file_name).with_threads(self.config.threads);
        let mut roots = Vec::new();
        let mut errors = Vec::new();

        for source in &self.config.sources {
            match finder.discover(source) {
                Ok(report) => {
                    errors.extend(report.warnings);
                    roots.extend(report.roots);
                }
                Err(e) => {
                    error!("Unable to scan {}: {e}", source.display());
                    errors.push(EntryError::subtree(source, &e));
                }
            }
        }

        (roots, errors)
    }

    /// Perform a full run: load the snapshot, mirror every root, save the
    /// snapshot.
    ///
    /// Entries for files this run did not classify (deleted, newly excluded,
    /// or under a root that failed) are dropped before saving.
    ///
    /// An unreadable snapshot degrades to an empty one. Failing to save it
    /// at the end is the only run-level error once mirroring has started.
    pub fn run(&self) -> Result<RunReport, SyncError> {
        let snapshot_path = &self.config.snapshot_path;
        let snapshot = match Snapshot::load(snapshot_path) {
            Ok(s) => s,
            Err(e) => {
                warn!("{e}; comparing every file by content");
                Snapshot::new()
            }
        };

        let mut report = self.run_with(&snapshot)?;
        let pruned = snapshot.prune_unseen();
        if pruned > 0 {
            debug!("Dropped {pruned} snapshot entries not seen in this run");
            report.snapshot_entries = snapshot.len();
        }
        snapshot.save(snapshot_path)?;
        info!(
            "Saved snapshot with {} entries to {}",
            snapshot.len(),
            snapshot_path.display()
        );
        Ok(report)
    }

    /// Mirror every root using an already loaded snapshot.
    ///
    /// The snapshot is only written here when checkpointing is enabled.
    pub fn run_with(&self, snapshot: &Snapshot) -> Result<RunReport, SyncError> {
        let start = Instant::now();
        self.config
            .validate()
            .map_err(|message| SyncError::InvalidConfig { message })?;
        self.check_destination_outside_sources()?;

        let pool = self.build_pool()?;
        let tracker = ProgressTracker::new(self.config.progress_interval, self.progress_tx.clone());
        let finder = RootFinder::new(&self.config.rules_file_name).with_threads(self.config.threads);

        let mut report = RunReport::default();
        let mut claims: HashMap<PathBuf, Claim> = HashMap::new();

        for source in &self.config.sources {
            let discovery = match finder.discover(source) {
                Ok(d) => d,
                Err(e) => {
                    error!("Unable to scan {}: {e}", source.display());
                    report.record_error(EntryError::subtree(source, &e));
                    continue;
                }
            };
            for warning in discovery.warnings {
                report.record_error(warning);
            }

            let root_paths: Vec<PathBuf> = discovery.roots.iter().map(|r| r.path.clone()).collect();
            for root in &discovery.roots {
                let context = RootContext {
                    snapshot,
                    nested_roots: &root_paths,
                    pool: &pool,
                    tracker: &tracker,
                };
                self.process_root(root, &context, &mut claims, &mut report);
            }

            if self.config.checkpoint {
                if let Err(e) = snapshot.save(&self.config.snapshot_path) {
                    warn!("Checkpoint failed: {e}");
                }
            }
        }

        report.snapshot_entries = snapshot.len();
        report.duration = start.elapsed();
        info!(
            "Copied {} files. Deleted {} files. Modified {} files.",
            report.stats.copied, report.stats.deleted, report.stats.modified
        );
        if !report.is_clean() {
            warn!("Run completed with {} errors", report.errors.len());
        }
        Ok(report)
    }

    fn process_root(
        &self,
        root: &BackupRoot,
        context: &RootContext<'_>,
        claims: &mut HashMap<PathBuf, Claim>,
        report: &mut RunReport,
    ) {
        let Some(destination) = self.config.destination_for(&root.source, &root.path) else {
            return;
        };

        if let Err(e) = claim_destination(claims, root, &destination) {
            error!("{e}");
            report.record_error(EntryError::subtree(&root.path, &e));
            return;
        }

        let rule_set = match rules::resolve(&root.rules_file, &root.path, &destination) {
            Ok(r) => r,
            Err(e) => {
                error!("Skipping {}: {e}", root.path.display());
                report.record_error(EntryError::subtree(&root.path, &e));
                return;
            }
        };

        info!(
            "Backing up {} to {} ({} patterns)",
            root.path.display(),
            destination.display(),
            rule_set.len()
        );
        let outcome = Reconciler::new(context.snapshot, self.config.rules_file_name.as_str())
            .with_nested_roots(context.nested_roots)
            .with_pool(context.pool)
            .with_progress(context.tracker)
            .reconcile(&root.path, &destination, &rule_set);

        report.stats.merge(&outcome.stats);
        report.errors.extend(outcome.errors);
        report.roots.push(RootReport {
            source: root.path.clone(),
            destination,
            patterns: rule_set.len(),
            stats: outcome.stats,
        });
    }

    fn build_pool(&self) -> Result<ThreadPool, SyncError> {
        ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .thread_name(|i| format!("mirrorkeep-{i}"))
            .build()
            .map_err(|e| SyncError::InvalidConfig {
                message: format!("cannot start worker pool: {e}"),
            })
    }

    /// Refuse overlapping source and destination trees: the mirror would
    /// either copy itself or delete its own source.
    fn check_destination_outside_sources(&self) -> Result<(), SyncError> {
        let destination = absolute(&self.config.destination);
        for source in &self.config.sources {
            let source = absolute(source);
            if destination.starts_with(&source) || source.starts_with(&destination) {
                return Err(SyncError::InvalidConfig {
                    message: format!(
                        "destination {} overlaps source {}",
                        destination.display(),
                        source.display()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Resolve symlinks in the longest existing prefix of `path` and re-attach
/// the part that does not exist yet.
fn absolute(path: &Path) -> PathBuf {
    let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut existing = path.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return missing.iter().rev().fold(canonical, |acc, name| acc.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return path,
        }
    }
}

/// Reserve `destination` for `root`.
///
/// Roots of the same top-level source nest by construction. Roots of
/// different sources must not share or contain each other's destination,
/// otherwise each run would undo the other's mirror.
fn claim_destination(
    claims: &mut HashMap<PathBuf, Claim>,
    root: &BackupRoot,
    destination: &Path,
) -> Result<(), SyncError> {
    let conflict = claims.iter().find(|(claimed, claim)| {
        claim.source != root.source && (claimed.starts_with(destination) || destination.starts_with(claimed))
    });
    if let Some((claimed, claim)) = conflict {
        return Err(SyncError::DestinationCollision {
            destination: claimed.clone(),
            claimed_by: claim.root.clone(),
            root: root.path.clone(),
        });
    }

    claims.insert(
        destination.to_path_buf(),
        Claim {
            source: root.source.clone(),
            root: root.path.clone(),
        },
    );
    Ok(())
}
