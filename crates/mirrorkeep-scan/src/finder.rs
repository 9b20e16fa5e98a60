//! JWalk-based discovery of directories that carry a rules file.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use jwalk::{Parallelism, WalkDir};
use serde::Serialize;
use tracing::{debug, warn};

use mirrorkeep_core::{EntryError, EntryErrorKind, SyncError};

/// A directory that declares its own rules file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRoot {
    /// Top-level source directory the root was found under.
    pub source: PathBuf,
    /// The directory itself.
    pub path: PathBuf,
    /// Full path of its rules file.
    pub rules_file: PathBuf,
}

impl BackupRoot {
    /// Path of the root relative to its top-level source.
    pub fn relative_path(&self) -> &Path {
        self.path.strip_prefix(&self.source).unwrap_or(Path::new(""))
    }
}

/// Result of walking one top-level source directory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    /// Roots in parent-before-child order.
    pub roots: Vec<BackupRoot>,
    /// Entries that could not be read while walking.
    pub warnings: Vec<EntryError>,
    /// Number of directories visited.
    pub dirs_visited: u64,
    /// Wall time of the walk.
    #[serde(skip)]
    pub duration: Duration,
}

/// Parallel walker that finds backup roots.
#[derive(Debug, Clone)]
pub struct RootFinder {
    rules_file_name: String,
    threads: usize,
}

impl RootFinder {
    /// Create a finder looking for `rules_file_name`.
    pub fn new(rules_file_name: impl Into<String>) -> Self {
        Self {
            rules_file_name: rules_file_name.into(),
            threads: 0,
        }
    }

    /// Set the number of walker threads (0 = rayon default pool).
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Name of the rules file this finder looks for.
    pub fn rules_file_name(&self) -> &str {
        &self.rules_file_name
    }

    /// Walk `source` and report every directory carrying a rules file.
    pub fn discover(&self, source: &Path) -> Result<DiscoveryReport, SyncError> {
        let start = Instant::now();
        let source = source.canonicalize().map_err(|e| SyncError::io(source, e))?;

        if !source.is_dir() {
            return Err(SyncError::NotADirectory { path: source });
        }

        let parallelism = match self.threads {
            0 => Parallelism::RayonDefaultPool {
                busy_timeout: Duration::from_millis(100),
            },
            n => Parallelism::RayonNewPool(n),
        };

        let walker = WalkDir::new(&source)
            .parallelism(parallelism)
            .skip_hidden(false)
            .follow_links(false)
            .sort(true);

        let mut report = DiscoveryReport::default();

        for entry_result in walker {
            let entry = match entry_result {
                Ok(e) => e,
                Err(err) => {
                    let path = err.path().map(|p| p.to_path_buf()).unwrap_or_default();
                    warn!(path = %path.display(), "unreadable entry: {err}");
                    report
                        .warnings
                        .push(EntryError::new(path, err.to_string(), EntryErrorKind::Read));
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                report.dirs_visited += 1;
                continue;
            }

            if file_type.is_file() && entry.file_name() == self.rules_file_name.as_str() {
                let dir = entry.parent_path().to_path_buf();
                debug!(root = %dir.display(), "found backup root");
                report.roots.push(BackupRoot {
                    source: source.clone(),
                    rules_file: entry.path(),
                    path: dir,
                });
            }
        }

        report.roots.sort_by(|a, b| a.path.cmp(&b.path));
        report.duration = start.elapsed();
        Ok(report)
    }
}
