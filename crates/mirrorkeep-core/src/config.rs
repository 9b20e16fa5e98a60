//! Backup run configuration.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Conventional name of the per-directory rules file.
pub const DEFAULT_RULES_FILE_NAME: &str = "backups.gitignore";

/// Default number of processed entries between progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100;

/// How a backup root's relative path is placed under the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationLayout {
    /// `<src>/<rel>` is mirrored to `<dest>/<rel>`.
    #[default]
    Flat,
    /// `<src>/<rel>` is mirrored to `<dest>/<name of src>/<rel>`.
    Namespaced,
}

/// Configuration for a backup run.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct BackupConfig {
    /// Top-level source directories to search for backup roots.
    pub sources: Vec<PathBuf>,

    /// Destination root.
    pub destination: PathBuf,

    /// Name of the per-directory rules file.
    #[builder(default = "DEFAULT_RULES_FILE_NAME.to_string()")]
    #[serde(default = "default_rules_file_name")]
    pub rules_file_name: String,

    /// Where the modification-time snapshot is persisted.
    #[builder(default = "default_snapshot_path()")]
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Worker threads for file copies (0 = auto-detect).
    #[builder(default = "0")]
    #[serde(default)]
    pub threads: usize,

    /// Processed entries between progress reports (0 disables them).
    #[builder(default = "DEFAULT_PROGRESS_INTERVAL")]
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Destination placement of each root.
    #[builder(default)]
    #[serde(default)]
    pub layout: DestinationLayout,

    /// Save the snapshot after each top-level source instead of once at the end.
    #[builder(default = "false")]
    #[serde(default)]
    pub checkpoint: bool,
}

fn default_rules_file_name() -> String {
    DEFAULT_RULES_FILE_NAME.to_string()
}

fn default_progress_interval() -> u64 {
    DEFAULT_PROGRESS_INTERVAL
}

/// Default snapshot location under the user's cache directory.
pub fn default_snapshot_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mirrorkeep")
        .join("snapshot.json")
}

impl BackupConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.sources {
            Some(ref sources) if !sources.is_empty() => {
                if sources.iter().any(|s| s.as_os_str().is_empty()) {
                    return Err("Source paths cannot be empty".to_string());
                }
            }
            _ => return Err("At least one source directory is required".to_string()),
        }
        match self.destination {
            Some(ref dest) if !dest.as_os_str().is_empty() => {}
            _ => return Err("Destination path is required".to_string()),
        }
        if let Some(ref name) = self.rules_file_name {
            validate_rules_file_name(name)?;
        }
        Ok(())
    }
}

fn validate_rules_file_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return Err(format!("Invalid rules file name: {name:?}"));
    }
    Ok(())
}

impl BackupConfig {
    /// Create a new backup config builder.
    pub fn builder() -> BackupConfigBuilder {
        BackupConfigBuilder::default()
    }

    /// Create a config with defaults for everything but the paths.
    pub fn new(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            sources,
            destination: destination.into(),
            rules_file_name: default_rules_file_name(),
            snapshot_path: default_snapshot_path(),
            threads: 0,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            layout: DestinationLayout::Flat,
            checkpoint: false,
        }
    }

    /// Re-check invariants on a config that did not come from the builder
    /// (for example one deserialized from a file).
    pub fn validate(&self) -> Result<(), String> {
        if self.sources.is_empty() {
            return Err("At least one source directory is required".to_string());
        }
        if self.sources.iter().any(|s| s.as_os_str().is_empty()) {
            return Err("Source paths cannot be empty".to_string());
        }
        if self.destination.as_os_str().is_empty() {
            return Err("Destination path is required".to_string());
        }
        validate_rules_file_name(&self.rules_file_name)
    }

    /// Destination directory for a backup root found under `source`.
    ///
    /// Returns `None` when `root` does not live under `source`.
    pub fn destination_for(&self, source: &Path, root: &Path) -> Option<PathBuf> {
        let rel = root.strip_prefix(source).ok()?;
        let base = match self.layout {
            DestinationLayout::Flat => self.destination.clone(),
            DestinationLayout::Namespaced => match source.file_name() {
                Some(name) => self.destination.join(name),
                None => self.destination.clone(),
            },
        };
        if rel.as_os_str().is_empty() {
            Some(base)
        } else {
            Some(base.join(rel))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = BackupConfig::builder()
            .sources(vec![PathBuf::from("/home/user/docs")])
            .destination("/mnt/backup")
            .threads(4usize)
            .checkpoint(true)
            .build()
            .unwrap();

        assert_eq!(config.destination, PathBuf::from("/mnt/backup"));
        assert_eq!(config.threads, 4);
        assert!(config.checkpoint);
        assert_eq!(config.rules_file_name, DEFAULT_RULES_FILE_NAME);
        assert_eq!(config.progress_interval, DEFAULT_PROGRESS_INTERVAL);
        assert_eq!(config.layout, DestinationLayout::Flat);
    }

    #[test]
    fn test_builder_requires_sources() {
        let result = BackupConfig::builder().destination("/mnt/backup").build();
        assert!(result.is_err());

        let result = BackupConfig::builder()
            .sources(Vec::<PathBuf>::new())
            .destination("/mnt/backup")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_nested_rules_name() {
        let result = BackupConfig::builder()
            .sources(vec![PathBuf::from("/src")])
            .destination("/dst")
            .rules_file_name("sub/rules")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_destination_flat() {
        let config = BackupConfig::new(vec![PathBuf::from("/data/a")], "/backup");

        assert_eq!(
            config.destination_for(Path::new("/data/a"), Path::new("/data/a")),
            Some(PathBuf::from("/backup"))
        );
        assert_eq!(
            config.destination_for(Path::new("/data/a"), Path::new("/data/a/x/y")),
            Some(PathBuf::from("/backup/x/y"))
        );
        assert_eq!(config.destination_for(Path::new("/data/a"), Path::new("/other")), None);
    }

    #[test]
    fn test_destination_namespaced() {
        let mut config = BackupConfig::new(vec![PathBuf::from("/data/a")], "/backup");
        config.layout = DestinationLayout::Namespaced;

        assert_eq!(
            config.destination_for(Path::new("/data/a"), Path::new("/data/a/x")),
            Some(PathBuf::from("/backup/a/x"))
        );
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: BackupConfig =
            serde_json::from_str(r#"{"sources": ["/src"], "destination": "/dst"}"#).unwrap();
        assert_eq!(config.rules_file_name, DEFAULT_RULES_FILE_NAME);
        assert_eq!(config.layout, DestinationLayout::Flat);
        assert!(config.validate().is_ok());
    }
}
