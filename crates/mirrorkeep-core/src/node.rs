//! Per-file values used by change detection.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// BLAKE3 content hash used to compare source and destination files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the hash as a hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Modification time at filesystem-native (nanosecond) resolution.
///
/// Stored as seconds and nanoseconds relative to the Unix epoch so that
/// snapshots serialize without loss. Times before the epoch have negative
/// `secs` with `nanos` counting forward, like `timespec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Mtime {
    /// Whole seconds since the Unix epoch.
    pub secs: i64,
    /// Sub-second nanoseconds, always `< 1_000_000_000`.
    pub nanos: u32,
}

impl Mtime {
    /// Create a modification time from raw parts.
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    /// Convert from a `SystemTime`.
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::new(d.as_secs() as i64, d.subsec_nanos()),
            Err(err) => {
                let d = err.duration();
                let secs = -(d.as_secs() as i64);
                match d.subsec_nanos() {
                    0 => Self::new(secs, 0),
                    n => Self::new(secs - 1, 1_000_000_000 - n),
                }
            }
        }
    }

    /// Read the modification time from file metadata.
    pub fn of(metadata: &std::fs::Metadata) -> std::io::Result<Self> {
        metadata.modified().map(Self::from_system_time)
    }

    /// Convert back into a `SystemTime`.
    pub fn to_system_time(self) -> SystemTime {
        if self.secs >= 0 {
            UNIX_EPOCH + Duration::new(self.secs as u64, self.nanos)
        } else {
            UNIX_EPOCH - Duration::from_secs(self.secs.unsigned_abs()) + Duration::from_nanos(self.nanos as u64)
        }
    }
}

impl From<SystemTime> for Mtime {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}
