//! Change detection: modification-time snapshot first, content hash second.

use std::fs::Metadata;
use std::io;
use std::path::Path;

use blake3::Hasher;

use mirrorkeep_core::{ContentHash, Mtime, SnapshotStore};

/// Files above this size are hashed with the multi-threaded mmap reader.
const PARALLEL_HASH_THRESHOLD: u64 = 1024 * 1024;

/// Classification of a source file against its destination counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Destination is up to date.
    Unchanged,
    /// Destination has no entry of that name.
    New,
    /// Destination exists but its content differs.
    Modified,
}

impl Change {
    /// Whether the file has to be copied.
    pub fn needs_copy(self) -> bool {
        !matches!(self, Change::Unchanged)
    }
}

/// Outcome of classifying one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    /// The classification.
    pub change: Change,
    /// Source modification time observed during classification.
    pub mtime: Mtime,
    /// Number of files hashed to reach the decision (0 or 2).
    pub hashed: u64,
}

/// Compute the BLAKE3 hash of a whole file.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let size = std::fs::metadata(path)?.len();
    let mut hasher = Hasher::new();
    if size > PARALLEL_HASH_THRESHOLD {
        hasher.update_mmap_rayon(path)?;
    } else {
        hasher.update_mmap(path)?;
    }
    Ok(ContentHash::new(*hasher.finalize().as_bytes()))
}

/// Classifies files using a shared snapshot.
pub struct ChangeDetector<'a> {
    snapshot: &'a dyn SnapshotStore,
}

impl<'a> ChangeDetector<'a> {
    /// Create a detector backed by `snapshot`.
    pub fn new(snapshot: &'a dyn SnapshotStore) -> Self {
        Self { snapshot }
    }

    /// Classify `source` (with its already-read metadata) against `dest`.
    ///
    /// On success the snapshot entry for `source` is set to its current
    /// modification time, whatever the classification. A hashing failure
    /// leaves the snapshot untouched.
    pub fn classify(&self, source: &Path, metadata: &Metadata, dest: &Path) -> io::Result<Detection> {
        let mtime = Mtime::of(metadata)?;
        let detection = self.decide(source, mtime, dest)?;
        self.snapshot.set(source, mtime);
        Ok(detection)
    }

    fn decide(&self, source: &Path, mtime: Mtime, dest: &Path) -> io::Result<Detection> {
        let dest_meta = match dest.symlink_metadata() {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Detection { change: Change::New, mtime, hashed: 0 });
            }
            Err(e) => return Err(e),
        };

        // A directory where the file should be can never be up to date.
        if dest_meta.is_dir() {
            return Ok(Detection { change: Change::Modified, mtime, hashed: 0 });
        }

        if self.snapshot.get(source) == Some(mtime) {
            return Ok(Detection { change: Change::Unchanged, mtime, hashed: 0 });
        }

        let change = if hash_file(source)? == hash_file(dest)? {
            Change::Unchanged
        } else {
            Change::Modified
        };
        Ok(Detection { change, mtime, hashed: 2 })
    }
}
