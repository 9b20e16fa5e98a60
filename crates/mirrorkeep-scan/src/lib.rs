//! Backup root discovery for mirrorkeep.
//!
//! A directory opts into backups by containing a rules file (by default
//! `backups.gitignore`). This crate walks each top-level source directory
//! in parallel with jwalk and reports every such directory, at any depth.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use mirrorkeep_scan::RootFinder;
//!
//! let finder = RootFinder::new("backups.gitignore");
//! let report = finder.discover(Path::new("/home/user")).unwrap();
//!
//! for root in &report.roots {
//!     println!("{}", root.path.display());
//! }
//! ```

mod finder;

pub use finder::{BackupRoot, DiscoveryReport, RootFinder};

// Re-export core types for convenience
pub use mirrorkeep_core::{EntryError, EntryErrorKind, SyncError};
