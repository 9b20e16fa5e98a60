//! Config file loading and command-line overrides.

use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result, bail};
use serde::Deserialize;

use mirrorkeep_core::{BackupConfig, DestinationLayout};

/// Commented starting point written by `mirrorkeep init`.
pub const SAMPLE_CONFIG: &str = r#"# mirrorkeep configuration

# Directories searched for backup roots. Every directory below them that
# contains a rules file is mirrored.
sources = ["/home/me/documents"]

# Where the mirror lives.
destination = "/mnt/backup"

# Name of the per-directory rules file.
# rules_file_name = "backups.gitignore"

# Modification-time cache. Defaults to the user cache directory.
# snapshot_path = "/var/cache/mirrorkeep/snapshot.json"

# Copy workers (0 = one per CPU).
# threads = 0

# Processed entries between progress lines (0 disables them).
# progress_interval = 100

# "flat" mirrors <source>/<rel> to <destination>/<rel>.
# "namespaced" mirrors it to <destination>/<source name>/<rel>.
# layout = "flat"

# Save the snapshot after each source instead of once at the end.
# checkpoint = false
"#;

/// Default config file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mirrorkeep").join("config.toml"))
}

/// Values given on the command line. They win over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub sources: Vec<PathBuf>,
    pub destination: Option<PathBuf>,
    pub snapshot_path: Option<PathBuf>,
    pub threads: Option<usize>,
    pub layout: Option<DestinationLayout>,
    pub checkpoint: bool,
}

/// Contents of a config file. Every key is optional so the command line
/// can fill the gaps.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    pub destination: Option<PathBuf>,
    pub rules_file_name: Option<String>,
    pub snapshot_path: Option<PathBuf>,
    pub threads: Option<usize>,
    pub progress_interval: Option<u64>,
    pub layout: Option<DestinationLayout>,
    pub checkpoint: Option<bool>,
}

impl FileConfig {
    /// Load `explicit`, or the default location when it exists.
    ///
    /// An explicitly named file must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.is_file() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path)
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).wrap_err_with(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse TOML config text.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Merge with `overrides` into a validated run configuration.
    pub fn into_backup_config(self, overrides: Overrides) -> Result<BackupConfig> {
        let sources = if overrides.sources.is_empty() {
            self.sources
        } else {
            overrides.sources
        };
        if sources.is_empty() {
            bail!("No source directories given (use --source or set `sources` in the config file)");
        }
        let Some(destination) = overrides.destination.or(self.destination) else {
            bail!("No destination given (use --dest or set `destination` in the config file)");
        };

        let mut builder = BackupConfig::builder();
        builder.sources(sources).destination(destination);
        if let Some(name) = self.rules_file_name {
            builder.rules_file_name(name);
        }
        if let Some(path) = overrides.snapshot_path.or(self.snapshot_path) {
            builder.snapshot_path(path);
        }
        if let Some(threads) = overrides.threads.or(self.threads) {
            builder.threads(threads);
        }
        if let Some(interval) = self.progress_interval {
            builder.progress_interval(interval);
        }
        if let Some(layout) = overrides.layout.or(self.layout) {
            builder.layout(layout);
        }
        builder.checkpoint(overrides.checkpoint || self.checkpoint.unwrap_or(false));

        builder.build().wrap_err("Invalid configuration")
    }
}

/// Write the sample config to `path`, refusing to replace an existing file
/// unless `force` is set.
pub fn write_sample(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, SAMPLE_CONFIG).wrap_err_with(|| format!("Failed to write {}", path.display()))
}
