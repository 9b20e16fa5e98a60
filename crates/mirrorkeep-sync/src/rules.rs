//! Rules files: the backup header block and exclusion patterns.
//!
//! A rules file starts with a header recording the last run, followed by
//! one glob pattern per line:
//!
//! ```text
//! # Backup Information
//! # Original Directory: /home/user/docs
//! # Backup Directory: /mnt/backup/docs
//! # Backup Time: 2024-05-01 10:00:00.000000
//! # Backup Information End
//!
//! *.tmp
//! node_modules
//! ```
//!
//! Patterns match bare entry names with shell-glob semantics (`*`, `?`,
//! `[...]`). They are not path-aware: `a/b` never matches anything.

use std::ffi::OsStr;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use mirrorkeep_core::SyncError;

/// First line of the header block.
pub const HEADER_START: &str = "# Backup Information";

/// Last line of the header block.
pub const HEADER_END: &str = "# Backup Information End";

/// Render the header block for a run, including its trailing blank line.
pub fn render_header(source: &Path, destination: &Path, time: DateTime<Local>) -> String {
    format!(
        "{HEADER_START}\n\
         # Original Directory: {}\n\
         # Backup Directory: {}\n\
         # Backup Time: {}\n\
         {HEADER_END}\n\n",
        source.display(),
        destination.display(),
        time.format("%Y-%m-%d %H:%M:%S%.6f"),
    )
}

/// Remove a previous header block from `content`.
///
/// The block runs from the start marker (at the beginning of a line) to the
/// first blank line after it. Without a blank line the rest of the file is
/// considered part of the block. Text before the marker is kept.
pub fn strip_header(content: &str) -> String {
    let Some(start) = find_line_start(content, HEADER_START) else {
        return content.to_string();
    };

    let prefix = &content[..start];
    match content[start..].find("\n\n") {
        Some(end) => format!("{prefix}{}", &content[start + end + 2..]),
        None => prefix.to_string(),
    }
}

fn find_line_start(content: &str, marker: &str) -> Option<usize> {
    content
        .match_indices(marker)
        .map(|(i, _)| i)
        .find(|&i| i == 0 || content.as_bytes()[i - 1] == b'\n')
}

/// Extract patterns: every non-empty line that is not a `#` comment.
pub fn parse_patterns(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Compiled exclusion patterns of one backup root.
#[derive(Debug, Clone)]
pub struct RuleSet {
    patterns: Vec<String>,
    set: GlobSet,
}

impl RuleSet {
    /// A rule set that excludes nothing.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    /// Compile patterns. `origin` names the rules file for error messages.
    pub fn compile(patterns: Vec<String>, origin: &Path) -> Result<Self, SyncError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .backslash_escape(true)
                .build()
                .map_err(|e| SyncError::InvalidPattern {
                    path: origin.to_path_buf(),
                    pattern: pattern.clone(),
                    message: e.kind().to_string(),
                })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| SyncError::InvalidPattern {
            path: origin.to_path_buf(),
            pattern: e.glob().unwrap_or_default().to_string(),
            message: e.kind().to_string(),
        })?;

        Ok(Self { patterns, set })
    }

    /// Check whether an entry name is excluded.
    pub fn is_excluded(&self, name: &OsStr) -> bool {
        !self.patterns.is_empty() && self.set.is_match(Path::new(name))
    }

    /// Patterns in file order.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Number of patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Check if there are no patterns.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::empty()
    }
}

/// Rewrite the header of `rules_file` for this run and return its patterns.
pub fn resolve(rules_file: &Path, source: &Path, destination: &Path) -> Result<RuleSet, SyncError> {
    resolve_at(rules_file, source, destination, Local::now())
}

/// [`resolve`] with an explicit backup time.
pub fn resolve_at(
    rules_file: &Path,
    source: &Path,
    destination: &Path,
    time: DateTime<Local>,
) -> Result<RuleSet, SyncError> {
    let content = fs::read_to_string(rules_file).map_err(|e| SyncError::io(rules_file, e))?;

    let body = strip_header(&content);
    let rewritten = format!("{}{body}", render_header(source, destination, time));
    fs::write(rules_file, &rewritten).map_err(|e| SyncError::io(rules_file, e))?;

    RuleSet::compile(parse_patterns(&body), rules_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_render_header() {
        let header = render_header(Path::new("/src"), Path::new("/dst"), fixed_time());
        assert!(header.starts_with(HEADER_START));
        assert!(header.contains("# Original Directory: /src\n"));
        assert!(header.contains("# Backup Directory: /dst\n"));
        assert!(header.contains("# Backup Time: 2024-05-01 10:00:00.000000\n"));
        assert!(header.ends_with("# Backup Information End\n\n"));
    }

    #[test]
    fn test_strip_header_without_block() {
        assert_eq!(strip_header("*.tmp\nbuild\n"), "*.tmp\nbuild\n");
    }

    #[test]
    fn test_strip_header_with_block() {
        let content = format!(
            "{}*.tmp\n",
            render_header(Path::new("/a"), Path::new("/b"), fixed_time())
        );
        assert_eq!(strip_header(&content), "*.tmp\n");
    }

    #[test]
    fn test_strip_header_without_terminator() {
        let content = "keep\n# Backup Information\n# Original Directory: /a\n*.tmp\n";
        assert_eq!(strip_header(content), "keep\n");
    }

    #[test]
    fn test_strip_header_ignores_marker_mid_line() {
        let content = "x # Backup Information\n\n*.log\n";
        assert_eq!(strip_header(content), content);
    }

    #[test]
    fn test_parse_patterns() {
        let patterns = parse_patterns("# comment\n\n  *.tmp  \nnode_modules\n   # indented comment\n");
        assert_eq!(patterns, vec!["*.tmp".to_string(), "node_modules".to_string()]);
    }

    #[test]
    fn test_rule_set_matching() {
        let rules = RuleSet::compile(
            vec!["*.log".into(), "cache?".into(), "[ab].txt".into()],
            Path::new("rules"),
        )
        .unwrap();

        assert!(rules.is_excluded(OsStr::new("debug.log")));
        assert!(rules.is_excluded(OsStr::new("cache1")));
        assert!(rules.is_excluded(OsStr::new("a.txt")));
        assert!(!rules.is_excluded(OsStr::new("c.txt")));
        assert!(!rules.is_excluded(OsStr::new("cache12")));
        assert!(!rules.is_excluded(OsStr::new("log")));
        assert_eq!(rules.len(), 3);
    }

    #[test]
    fn test_rule_set_star_does_not_cross_separator() {
        let rules = RuleSet::compile(vec!["src/*".into()], Path::new("rules")).unwrap();
        assert!(!rules.is_excluded(OsStr::new("main.rs")));
        assert!(!rules.is_excluded(OsStr::new("src")));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = RuleSet::compile(vec!["[unclosed".into()], Path::new("rules")).unwrap_err();
        assert!(matches!(err, SyncError::InvalidPattern { ref pattern, .. } if pattern == "[unclosed"));
    }

    #[test]
    fn test_empty_rule_set() {
        let rules = RuleSet::empty();
        assert!(rules.is_empty());
        assert!(!rules.is_excluded(OsStr::new("anything")));
    }

    #[test]
    fn test_resolve_rewrites_single_header() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("backups.gitignore");
        fs::write(&file, "*.tmp\n# note\nbuild\n").unwrap();

        let first = resolve_at(&file, Path::new("/src"), Path::new("/old-dst"), fixed_time()).unwrap();
        assert_eq!(first.patterns(), &["*.tmp".to_string(), "build".to_string()]);

        let rules = resolve(&file, Path::new("/src"), Path::new("/new-dst")).unwrap();
        assert_eq!(rules.patterns(), &["*.tmp".to_string(), "build".to_string()]);

        let content = fs::read_to_string(&file).unwrap();
        assert_eq!(content.matches(HEADER_START).count(), 2); // start + end marker
        assert_eq!(content.matches(HEADER_END).count(), 1);
        assert!(content.contains("# Backup Directory: /new-dst"));
        assert!(!content.contains("/old-dst"));
        assert!(content.ends_with("*.tmp\n# note\nbuild\n"));
    }

    #[test]
    fn test_resolve_missing_file() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("absent");
        let err = resolve(&missing, &PathBuf::from("/src"), &PathBuf::from("/dst")).unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }
}
