//! Core types and traits for mirrorkeep.
//!
//! This crate provides the fundamental data structures shared by the
//! discovery and reconciliation crates: run configuration, errors,
//! modification-time snapshots, content hashes and run statistics.

mod config;
mod error;
mod node;
mod snapshot;
mod stats;

pub use config::{
    BackupConfig, BackupConfigBuilder, DestinationLayout, DEFAULT_PROGRESS_INTERVAL,
    DEFAULT_RULES_FILE_NAME, default_snapshot_path,
};
pub use error::{EntryError, EntryErrorKind, SyncError};
pub use node::{ContentHash, Mtime};
pub use snapshot::{Snapshot, SnapshotStore, SNAPSHOT_FORMAT_VERSION};
pub use stats::SyncStats;
