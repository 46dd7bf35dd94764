//! Gitignore-style ignore rules, rooted at a sync source directory.

use crate::error::{Result, SyncError};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};

/// Project-specific ignore file, preferred over `.gitignore` when present.
pub const DEVSYNC_IGNORE_FILE: &str = ".devsyncignore";

/// Version control ignore file, used as a fallback source of rules.
pub const GIT_IGNORE_FILE: &str = ".gitignore";

/// Compiled set of ignore patterns.
///
/// Patterns are matched against root-relative paths; a path is ignored when
/// it or any of its parent directories matches.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    root: PathBuf,
    patterns: Vec<String>,
    matcher: Gitignore,
}

impl IgnoreRules {
    pub fn new<S: AsRef<str>>(root: impl Into<PathBuf>, patterns: &[S]) -> Result<Self> {
        let root = root.into();
        let mut builder = GitignoreBuilder::new(&root);
        let mut kept = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() || pattern.starts_with('#') {
                continue;
            }
            builder
                .add_line(None, pattern)
                .map_err(|e| SyncError::IgnorePattern(format!("{}: {}", pattern, e)))?;
            kept.push(pattern.to_string());
        }

        let matcher = builder
            .build()
            .map_err(|e| SyncError::IgnorePattern(e.to_string()))?;

        Ok(Self {
            root,
            patterns: kept,
            matcher,
        })
    }

    /// Rules that ignore nothing.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            matcher: Gitignore::empty(),
            root,
            patterns: Vec::new(),
        }
    }

    /// Load rules from `.devsyncignore`, falling back to `.gitignore`.
    /// Neither file existing yields empty rules.
    pub fn from_directory(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for name in [DEVSYNC_IGNORE_FILE, GIT_IGNORE_FILE] {
            let path = root.join(name);
            if path.is_file() {
                let contents = std::fs::read_to_string(&path)?;
                let lines: Vec<&str> = contents.lines().collect();
                tracing::debug!("Loaded {} ignore rules from {}", lines.len(), path.display());
                return Self::new(root, &lines);
            }
        }
        Ok(Self::empty(root))
    }

    /// Returns a new rule set with `extra` patterns appended.
    pub fn with_patterns<S: AsRef<str>>(&self, extra: &[S]) -> Result<Self> {
        let mut all = self.patterns.clone();
        all.extend(extra.iter().map(|p| p.as_ref().to_string()));
        Self::new(self.root.clone(), &all)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Check a root-relative path.
    pub fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        if self.patterns.is_empty() || relative.as_os_str().is_empty() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }

    /// Check an absolute path under the root. Paths outside the root are never ignored.
    pub fn is_ignored_abs(&self, path: &Path, is_dir: bool) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(relative) => self.is_ignored(relative, is_dir),
            Err(_) => false,
        }
    }

    /// Drop every absolute path that matches a rule.
    pub fn filter(&self, paths: Vec<PathBuf>) -> Vec<PathBuf> {
        paths
            .into_iter()
            .filter(|p| !self.is_ignored_abs(p, p.is_dir()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_simple_patterns() {
        let rules = IgnoreRules::new("/src", &["*.log", "target/", "README.txt"]).unwrap();

        assert!(rules.is_ignored(Path::new("debug.log"), false));
        assert!(rules.is_ignored(Path::new("nested/deep/debug.log"), false));
        assert!(rules.is_ignored(Path::new("README.txt"), false));
        assert!(!rules.is_ignored(Path::new("red.js"), false));
    }

    #[test]
    fn test_directory_pattern_covers_descendants() {
        let rules = IgnoreRules::new("/src", &["node_modules/"]).unwrap();

        assert!(rules.is_ignored(Path::new("node_modules"), true));
        assert!(rules.is_ignored(Path::new("node_modules/lib/index.js"), false));
        // A file with the same name is not a directory
        assert!(!rules.is_ignored(Path::new("node_modules"), false));
    }

    #[test]
    fn test_negation_and_comments() {
        let rules = IgnoreRules::new("/src", &["# comment", "", "*.txt", "!keep.txt"]).unwrap();

        assert_eq!(rules.patterns().len(), 2);
        assert!(rules.is_ignored(Path::new("drop.txt"), false));
        assert!(!rules.is_ignored(Path::new("keep.txt"), false));
    }

    #[test]
    fn test_absolute_paths() {
        let rules = IgnoreRules::new("/src", &["*.tmp"]).unwrap();

        assert!(rules.is_ignored_abs(Path::new("/src/a.tmp"), false));
        assert!(!rules.is_ignored_abs(Path::new("/elsewhere/a.tmp"), false));
    }

    #[test]
    fn test_empty_rules_ignore_nothing() {
        let rules = IgnoreRules::empty("/src");
        assert!(rules.is_empty());
        assert!(!rules.is_ignored(Path::new("anything"), false));
    }

    #[test]
    fn test_from_directory_prefers_devsyncignore() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".gitignore"), "*.git-ignored\n").unwrap();
        fs::write(tmp.path().join(".devsyncignore"), "*.sync-ignored\n").unwrap();

        let rules = IgnoreRules::from_directory(tmp.path()).unwrap();
        assert!(rules.is_ignored(Path::new("a.sync-ignored"), false));
        assert!(!rules.is_ignored(Path::new("a.git-ignored"), false));
    }

    #[test]
    fn test_from_directory_falls_back_to_gitignore() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".gitignore"), "build/\n").unwrap();

        let rules = IgnoreRules::from_directory(tmp.path()).unwrap();
        assert!(rules.is_ignored(Path::new("build/out.o"), false));

        let extended = rules.with_patterns(&["*.bak"]).unwrap();
        assert!(extended.is_ignored(Path::new("x.bak"), false));
        assert!(extended.is_ignored(Path::new("build"), true));
    }
}
