//! Directory reconciliation engine for mirrorkeep.
//!
//! This crate mirrors source trees into a backup destination:
//!
//! - [`rules`] reads per-directory rules files and rewrites their header
//! - [`detect`] decides whether a file changed (snapshot mtime, then BLAKE3)
//! - [`Reconciler`] copies, updates and deletes entries of one subtree
//! - [`BackupRunner`] discovers roots, reconciles them and saves the snapshot
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use mirrorkeep_core::BackupConfig;
//! use mirrorkeep_sync::BackupRunner;
//!
//! let config = BackupConfig::new(vec![PathBuf::from("/home/user")], "/mnt/backup");
//! let report = BackupRunner::new(config).run().unwrap();
//!
//! println!(
//!     "Copied {} files. Deleted {} files. Modified {} files.",
//!     report.stats.copied, report.stats.deleted, report.stats.modified
//! );
//! ```

pub mod detect;
mod fsops;
mod progress;
mod reconcile;
pub mod rules;
mod runner;

pub use detect::{hash_file, Change, ChangeDetector, Detection};
pub use fsops::{copy_file, remove_entry, STAGING_SUFFIX};
pub use progress::SyncProgress;
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use rules::RuleSet;
pub use runner::{BackupRunner, RootReport, RunReport, PROGRESS_CHANNEL_SIZE};

// Re-export core types
pub use mirrorkeep_core::{
    BackupConfig, DestinationLayout, EntryError, EntryErrorKind, Mtime, Snapshot, SnapshotStore,
    SyncError, SyncStats,
};
