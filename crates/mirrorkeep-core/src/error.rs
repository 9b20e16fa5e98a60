//! Error types for backup runs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a subtree or a whole run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Path exists but is not a directory.
    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// A rules file contains a pattern that is not a valid glob.
    #[error("Invalid pattern {pattern:?} in {path}: {message}")]
    InvalidPattern {
        path: PathBuf,
        pattern: String,
        message: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The snapshot store could not be read or written.
    #[error("Snapshot error at {path}: {message}")]
    Snapshot { path: PathBuf, message: String },

    /// Two backup roots map to the same destination directory.
    #[error("Destination {destination} already claimed by {claimed_by}, refusing to mirror {root}")]
    DestinationCollision {
        destination: PathBuf,
        claimed_by: PathBuf,
        root: PathBuf,
    },
}

impl SyncError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Create a snapshot error.
    pub fn snapshot(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Snapshot {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// What was being attempted when an entry failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryErrorKind {
    /// Copying a file into the destination.
    Copy,
    /// Removing a stale destination entry.
    Delete,
    /// Hashing a file for change detection.
    Hash,
    /// Listing a directory or reading metadata.
    Read,
    /// A whole subtree was skipped (rules file or destination problem).
    Subtree,
}

impl std::fmt::Display for EntryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Delete => write!(f, "delete"),
            Self::Hash => write!(f, "hash"),
            Self::Read => write!(f, "read"),
            Self::Subtree => write!(f, "subtree"),
        }
    }
}

/// Non-fatal failure recorded for a single entry. The run continues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryError {
    /// Path where the failure occurred.
    pub path: PathBuf,
    /// Human-readable reason.
    pub message: String,
    /// Kind of failure.
    pub kind: EntryErrorKind,
}

impl EntryError {
    /// Create a new entry error.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: EntryErrorKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create an entry error from an I/O error.
    pub fn from_io(path: impl Into<PathBuf>, error: &std::io::Error, kind: EntryErrorKind) -> Self {
        Self::new(path, error.to_string(), kind)
    }

    /// Record a subtree-level failure.
    pub fn subtree(path: impl Into<PathBuf>, error: &SyncError) -> Self {
        Self::new(path, error.to_string(), EntryErrorKind::Subtree)
    }
}

impl std::fmt::Display for EntryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed for {}: {}", self.kind, self.path.display(), self.message)
    }
}
