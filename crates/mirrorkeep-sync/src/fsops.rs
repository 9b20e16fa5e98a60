//! Filesystem primitives used by the reconciler.

use std::fs::{self, File, FileTimes, Metadata};
use std::io;
use std::path::Path;

use tempfile::{Builder, NamedTempFile};

/// Suffix of the staging files written next to a destination during a copy.
pub const STAGING_SUFFIX: &str = ".mirrorkeep-partial";

/// Copy `source` to `dest`, preserving timestamps and permissions.
///
/// Data is written to a uniquely named hidden staging file in the
/// destination directory and renamed into place, so `dest` is either the
/// old file or the complete new one. Returns bytes copied.
pub fn copy_file(source: &Path, dest: &Path, metadata: &Metadata) -> io::Result<u64> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut staging = Builder::new().prefix(".").suffix(STAGING_SUFFIX).tempfile_in(dir)?;

    let bytes = copy_to(source, &mut staging, metadata)?;
    staging.persist(dest).map_err(|e| e.error)?;
    Ok(bytes)
}

fn copy_to(source: &Path, staging: &mut NamedTempFile, metadata: &Metadata) -> io::Result<u64> {
    let mut reader = File::open(source)?;
    let bytes = io::copy(&mut reader, staging.as_file_mut())?;

    let mut times = FileTimes::new().set_modified(metadata.modified()?);
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }

    // Through the open handle, so a read-only mode does not get in the way.
    let file = staging.as_file();
    file.set_times(times)?;
    file.set_permissions(metadata.permissions())?;
    Ok(bytes)
}

/// Remove a file, symlink or whole directory tree.
pub fn remove_entry(path: &Path) -> io::Result<()> {
    let metadata = path.symlink_metadata()?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Make sure `dir` exists as a directory.
///
/// Returns `true` when a non-directory had to be removed first.
pub fn ensure_dir(dir: &Path) -> io::Result<bool> {
    let replaced = match dir.symlink_metadata() {
        Ok(m) if m.is_dir() => return Ok(false),
        Ok(_) => {
            fs::remove_file(dir)?;
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };
    fs::create_dir_all(dir)?;
    Ok(replaced)
}
