//! Modification-time snapshot shared across a backup run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::node::Mtime;

/// On-disk format version written by [`Snapshot::save`].
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Key-value view of the last-seen modification time of each source file.
///
/// Setters take `&self` so reconciliation workers can share one store.
pub trait SnapshotStore: Send + Sync {
    /// Last recorded modification time for `path`.
    fn get(&self, path: &Path) -> Option<Mtime>;

    /// Record the current modification time for `path`.
    fn set(&self, path: &Path, mtime: Mtime);

    /// Drop the entry for `path`, forcing a full comparison next time.
    fn forget(&self, path: &Path);
}

/// Concurrent in-memory snapshot with JSON persistence.
///
/// Entries loaded from disk are unseen until [`SnapshotStore::set`] touches
/// them again, which lets a run drop records of vanished files.
#[derive(Debug, Default)]
pub struct Snapshot {
    entries: DashMap<PathBuf, Entry>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    mtime: Mtime,
    seen: bool,
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    entries: BTreeMap<PathBuf, Mtime>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no paths are recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load a snapshot from disk.
    ///
    /// A missing file yields an empty snapshot. Any other read or parse
    /// failure is returned so the caller can decide how to degrade.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(SyncError::snapshot(path, e)),
        };

        let file: SnapshotFile =
            serde_json::from_slice(&bytes).map_err(|e| SyncError::snapshot(path, e))?;
        if file.version != SNAPSHOT_FORMAT_VERSION {
            return Err(SyncError::snapshot(
                path,
                format!("unsupported snapshot version {}", file.version),
            ));
        }

        Ok(Self {
            entries: file
                .entries
                .into_iter()
                .map(|(path, mtime)| (path, Entry { mtime, seen: false }))
                .collect(),
        })
    }

    /// Remove every entry not set since the snapshot was loaded.
    ///
    /// Returns the number of entries removed.
    pub fn prune_unseen(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.seen);
        before - self.entries.len()
    }

    /// Persist the snapshot, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SyncError::snapshot(parent, e))?;
        }

        // Paths that are not valid UTF-8 cannot be JSON keys; they simply get
        // hashed again next run.
        let entries: BTreeMap<PathBuf, Mtime> = self
            .entries
            .iter()
            .filter(|e| e.key().to_str().is_some())
            .map(|e| (e.key().clone(), e.value().mtime))
            .collect();
        let file = SnapshotFile {
            version: SNAPSHOT_FORMAT_VERSION,
            entries,
        };
        let json = serde_json::to_vec(&file).map_err(|e| SyncError::snapshot(path, e))?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).map_err(|e| SyncError::snapshot(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| SyncError::snapshot(path, e))?;
        Ok(())
    }
}

impl SnapshotStore for Snapshot {
    fn get(&self, path: &Path) -> Option<Mtime> {
        self.entries.get(path).map(|e| e.value().mtime)
    }

    fn set(&self, path: &Path, mtime: Mtime) {
        self.entries.insert(path.to_path_buf(), Entry { mtime, seen: true });
    }

    fn forget(&self, path: &Path) {
        self.entries.remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_set() {
        let snapshot = Snapshot::new();
        let path = Path::new("/src/a.txt");

        assert!(snapshot.get(path).is_none());
        snapshot.set(path, Mtime::new(5, 6));
        assert_eq!(snapshot.get(path), Some(Mtime::new(5, 6)));
        assert_eq!(snapshot.len(), 1);

        snapshot.set(path, Mtime::new(7, 0));
        assert_eq!(snapshot.get(path), Some(Mtime::new(7, 0)));
        assert_eq!(snapshot.len(), 1);

        snapshot.forget(path);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let snapshot = Snapshot::load(&temp.path().join("nope.json")).unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("state/snapshot.json");

        let snapshot = Snapshot::new();
        snapshot.set(Path::new("/src/a.txt"), Mtime::new(100, 1));
        snapshot.set(Path::new("/src/sub/b.txt"), Mtime::new(200, 2));
        snapshot.save(&file).unwrap();

        let loaded = Snapshot::load(&file).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(Path::new("/src/sub/b.txt")), Some(Mtime::new(200, 2)));
        assert!(!temp.path().join("state/snapshot.json.tmp").exists());
    }

    #[test]
    fn test_prune_unseen_after_load() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("snapshot.json");

        let snapshot = Snapshot::new();
        snapshot.set(Path::new("/src/kept.txt"), Mtime::new(1, 0));
        snapshot.set(Path::new("/src/gone.txt"), Mtime::new(2, 0));
        snapshot.save(&file).unwrap();

        let loaded = Snapshot::load(&file).unwrap();
        loaded.set(Path::new("/src/kept.txt"), Mtime::new(1, 0));
        loaded.set(Path::new("/src/new.txt"), Mtime::new(3, 0));

        assert_eq!(loaded.prune_unseen(), 1);
        assert_eq!(loaded.len(), 2);
        assert!(loaded.get(Path::new("/src/gone.txt")).is_none());
        assert_eq!(loaded.prune_unseen(), 0);
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("snapshot.json");
        fs::write(&file, "not json").unwrap();

        assert!(matches!(Snapshot::load(&file), Err(SyncError::Snapshot { .. })));
    }
}
