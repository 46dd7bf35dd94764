//! Indexer: finds what changed under a root since the last persisted snapshot.
//!
//! One walk of the tree, compared entry by entry against the previous
//! [`FileIndex`]. Nothing is hashed; size and modification time decide.

use crate::error::Result;
use crate::ignore_rules::IgnoreRules;
use crate::index::file_index::{
    ensure_ignore_entry, resolve_index_path, write_file_map, FileData, FileIndex, FileMap,
    INDEX_DIR,
};
use ignore::{DirEntry, Walk, WalkBuilder};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Version control metadata directory, never indexed.
pub const VCS_DIR: &str = ".git";

/// Outcome of one indexing pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexerResult {
    /// Absolute paths that are new or whose size/mtime changed, sorted
    pub files_changed: Vec<PathBuf>,
    /// Absolute paths present in the previous index but gone now, sorted
    pub files_deleted: Vec<PathBuf>,
    /// Snapshot to persist once the pass is done
    pub new_file_map: FileMap,
    /// Where the snapshot lives
    pub index_path: PathBuf,
}

impl IndexerResult {
    pub fn has_changes(&self) -> bool {
        !self.files_changed.is_empty() || !self.files_deleted.is_empty()
    }

    /// Overwrite the persisted index with `new_file_map`.
    pub fn persist(&self) -> Result<()> {
        write_file_map(self.new_file_map.clone(), &self.index_path)
    }

    /// Persist only when the pass found changes. Returns whether it wrote.
    pub fn persist_if_changed(&self) -> Result<bool> {
        if self.has_changes() {
            self.persist()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Difference between a walked tree and a previous index.
#[derive(Debug, Default)]
pub struct TreeDiff {
    pub changed: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub files: FileMap,
}

/// Directory that keys are relative to: the root itself, or the parent of a single-file root.
pub(crate) fn source_base(root: &Path) -> io::Result<PathBuf> {
    let metadata = fs::metadata(root)?;
    if metadata.is_dir() {
        Ok(root.to_path_buf())
    } else {
        Ok(root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")))
    }
}

/// Marks a raw byte in a key; it is followed by two hex digits.
/// Path components never contain NUL, so escaped keys cannot collide with real names.
const RAW_BYTE_ESCAPE: char = '\0';

/// Map key for `path`: relative to `base`, in the host's path convention.
///
/// Names that are not valid UTF-8 keep their bytes: each invalid byte is
/// written as [`RAW_BYTE_ESCAPE`] plus its hex value. [`key_path`] reverses it.
pub fn file_key(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(match relative.to_str() {
        Some(key) => key.to_string(),
        None => escape_raw(relative.as_os_str()),
    })
}

/// Relative path named by a map key.
pub fn key_path(key: &str) -> PathBuf {
    if key.contains(RAW_BYTE_ESCAPE) {
        unescape_raw(key)
    } else {
        PathBuf::from(key)
    }
}

#[cfg(unix)]
fn escape_raw(name: &OsStr) -> String {
    use std::fmt::Write as _;
    use std::os::unix::ffi::OsStrExt;

    let mut bytes = name.as_bytes();
    let mut key = String::with_capacity(bytes.len() + 8);
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                key.push_str(valid);
                return key;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                key.push_str(std::str::from_utf8(valid).unwrap_or_default());
                let invalid = e.error_len().unwrap_or(rest.len());
                for byte in &rest[..invalid] {
                    key.push(RAW_BYTE_ESCAPE);
                    let _ = write!(key, "{:02x}", byte);
                }
                bytes = &rest[invalid..];
            }
        }
    }
}

#[cfg(not(unix))]
fn escape_raw(name: &OsStr) -> String {
    tracing::warn!("Path is not valid Unicode: {}", name.to_string_lossy());
    name.to_string_lossy().into_owned()
}

#[cfg(unix)]
fn unescape_raw(key: &str) -> PathBuf {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    let mut bytes = Vec::with_capacity(key.len());
    let mut rest = key;
    while let Some(pos) = rest.find(RAW_BYTE_ESCAPE) {
        bytes.extend_from_slice(rest[..pos].as_bytes());
        let byte = rest
            .get(pos + 1..pos + 3)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        match byte {
            Some(byte) => {
                bytes.push(byte);
                rest = &rest[pos + 3..];
            }
            None => {
                bytes.push(0);
                rest = &rest[pos + 1..];
            }
        }
    }
    bytes.extend_from_slice(rest.as_bytes());
    PathBuf::from(OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn unescape_raw(key: &str) -> PathBuf {
    PathBuf::from(key)
}

fn is_reserved_dir(entry: &DirEntry) -> bool {
    let name = entry.file_name();
    name == INDEX_DIR || name == VCS_DIR
}

/// Walk `root` without following symlinks, pruning reserved directories and
/// every path `rules` ignores (checked relative to `base`).
pub(crate) fn source_walker(root: &Path, base: &Path, rules: &IgnoreRules) -> Walk {
    let mut builder = WalkBuilder::new(root);
    builder.standard_filters(false).follow_links(false);

    let rules = Arc::new(rules.clone());
    let base = base.to_path_buf();
    builder.filter_entry(move |entry| {
        if entry.depth() == 0 {
            return true;
        }
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && is_reserved_dir(entry) {
            return false;
        }
        match entry.path().strip_prefix(&base) {
            Ok(relative) => !rules.is_ignored(relative, is_dir),
            Err(_) => true,
        }
    });

    builder.build()
}

/// Walk `root` and compare against `existing`.
///
/// Reserved directories (`.devsync`, `.git`) and anything matching `rules`
/// are pruned with their whole subtree. A path counts as changed when it has
/// no previous entry, its mtime differs, or its size differs, checked in
/// that order.
pub fn diff_tree(root: &Path, rules: &IgnoreRules, existing: &FileIndex) -> Result<TreeDiff> {
    let base = source_base(root)?;
    let mut diff = TreeDiff::default();

    for result in source_walker(root, &base, rules) {
        let entry = result?;
        let path = entry.path();

        let key = match file_key(path, &base) {
            Some(key) => key,
            // The root directory itself
            None => continue,
        };

        let data = FileData::from_path(path)?;

        match existing.files.get(&key) {
            None => {
                tracing::debug!("file added: {}", path.display());
                diff.changed.push(path.to_path_buf());
            }
            Some(prev) if prev.last_modified_date != data.last_modified_date => {
                tracing::debug!("last modified date changed: {}", path.display());
                diff.changed.push(path.to_path_buf());
            }
            Some(prev) if prev.size != data.size => {
                tracing::debug!("size changed: {}", path.display());
                diff.changed.push(path.to_path_buf());
            }
            Some(_) => {}
        }

        diff.files.insert(key, data);
    }

    for key in existing.files.keys() {
        if !diff.files.contains_key(key) {
            tracing::debug!("file deleted: {}", key);
            diff.deleted.push(base.join(key_path(key)));
        }
    }

    diff.changed.sort();
    diff.deleted.sort();
    Ok(diff)
}

/// Compute the delta for `root` without touching the persisted index.
///
/// Makes sure `.gitignore` lists the index file before walking.
pub fn scan(root: &Path, rules: &IgnoreRules) -> Result<IndexerResult> {
    let index_path = resolve_index_path(root)?;
    ensure_ignore_entry(&source_base(root)?)?;

    let existing = FileIndex::load(&index_path)?;
    let diff = diff_tree(root, rules, &existing)?;

    tracing::info!(
        "Indexed {}: {} changed, {} deleted, {} tracked",
        root.display(),
        diff.changed.len(),
        diff.deleted.len(),
        diff.files.len()
    );

    Ok(IndexerResult {
        files_changed: diff.changed,
        files_deleted: diff.deleted,
        new_file_map: diff.files,
        index_path,
    })
}

/// Compute the delta for `root` and persist the new snapshot if anything changed.
pub fn run_indexer(root: &Path, rules: &IgnoreRules) -> Result<IndexerResult> {
    let result = scan(root, rules)?;
    result.persist_if_changed()?;
    Ok(result)
}

/// Patch the index with changes reported by an external watcher.
///
/// Deleted paths lose their entries; changed paths are re-stat'ed, and any
/// that no longer exist are dropped as well.
pub fn update_index_with_watch_changes(
    root: &Path,
    changed: &[PathBuf],
    deleted: &[PathBuf],
) -> Result<()> {
    let index_path = resolve_index_path(root)?;
    let base = source_base(root)?;
    let mut index = FileIndex::load(&index_path)?;

    for path in deleted {
        if let Some(key) = file_key(path, &base) {
            index.files.remove(&key);
        }
    }

    for path in changed {
        let Some(key) = file_key(path, &base) else {
            tracing::warn!("Ignoring watched path outside {}: {}", base.display(), path.display());
            continue;
        };
        match FileData::from_path(path) {
            Ok(data) => {
                index.files.insert(key, data);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                index.files.remove(&key);
            }
            Err(e) => return Err(e.into()),
        }
    }

    index.save(&index_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::file_index::INDEX_FILE_NAME;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    fn no_rules(root: &Path) -> IgnoreRules {
        IgnoreRules::empty(root)
    }

    #[test]
    fn test_fresh_directory_reports_new_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "x").unwrap();

        let diff = diff_tree(tmp.path(), &no_rules(tmp.path()), &FileIndex::new()).unwrap();

        assert_eq!(diff.changed, vec![tmp.path().join("a.txt")]);
        assert!(diff.deleted.is_empty());
        assert_eq!(diff.files["a.txt"].size, 1);
    }

    #[test]
    fn test_deleted_file_reported_after_persist() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.txt");
        fs::write(&file, "x").unwrap();

        let first = run_indexer(tmp.path(), &no_rules(tmp.path())).unwrap();
        assert!(first.files_changed.contains(&file));

        fs::remove_file(&file).unwrap();
        let second = run_indexer(tmp.path(), &no_rules(tmp.path())).unwrap();

        assert!(second.files_changed.is_empty());
        assert_eq!(second.files_deleted, vec![file]);
    }

    #[test]
    fn test_second_run_without_changes_is_empty() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/lib.rs"), "pub fn f() {}").unwrap();
        fs::write(tmp.path().join("README.md"), "# readme").unwrap();

        let first = run_indexer(tmp.path(), &no_rules(tmp.path())).unwrap();
        assert!(first.has_changes());

        let second = run_indexer(tmp.path(), &no_rules(tmp.path())).unwrap();
        assert!(!second.has_changes());
        assert_eq!(second.new_file_map, first.new_file_map);
    }

    #[test]
    fn test_run_indexer_adds_gitignore_entry() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "x").unwrap();

        let result = run_indexer(tmp.path(), &no_rules(tmp.path())).unwrap();

        let gitignore = fs::read_to_string(tmp.path().join(".gitignore")).unwrap();
        assert!(gitignore.contains(".devsync/file-index.json"));
        assert_eq!(
            result.index_path,
            tmp.path().join(INDEX_DIR).join(INDEX_FILE_NAME)
        );
        assert!(result.index_path.exists());
        // The index directory itself is never indexed
        assert!(!result.new_file_map.keys().any(|k| k.starts_with(INDEX_DIR)));
    }

    #[test]
    fn test_no_changes_leaves_index_untouched() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "x").unwrap();
        let first = run_indexer(tmp.path(), &no_rules(tmp.path())).unwrap();

        // Stamp the index so a rewrite would be visible
        let stamp = FileTime::from_unix_time(1_000_000, 0);
        set_file_mtime(&first.index_path, stamp).unwrap();

        run_indexer(tmp.path(), &no_rules(tmp.path())).unwrap();
        let meta = fs::metadata(&first.index_path).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), stamp);
    }

    #[test]
    fn test_mtime_change_detected() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.txt");
        fs::write(&file, "x").unwrap();
        run_indexer(tmp.path(), &no_rules(tmp.path())).unwrap();

        set_file_mtime(&file, FileTime::from_unix_time(1_234_567_890, 0)).unwrap();

        let result = scan(tmp.path(), &no_rules(tmp.path())).unwrap();
        assert_eq!(result.files_changed, vec![file]);
    }

    #[test]
    fn test_size_change_with_same_mtime_detected() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.txt");
        let stamp = FileTime::from_unix_time(1_234_567_890, 0);
        fs::write(&file, "x").unwrap();
        set_file_mtime(&file, stamp).unwrap();
        run_indexer(tmp.path(), &no_rules(tmp.path())).unwrap();

        fs::write(&file, "xyz").unwrap();
        set_file_mtime(&file, stamp).unwrap();

        let result = scan(tmp.path(), &no_rules(tmp.path())).unwrap();
        assert_eq!(result.files_changed, vec![file]);
    }

    #[test]
    fn test_same_size_and_mtime_edit_is_invisible() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.txt");
        let stamp = FileTime::from_unix_time(1_234_567_890, 0);
        fs::write(&file, "abc").unwrap();
        set_file_mtime(&file, stamp).unwrap();
        run_indexer(tmp.path(), &no_rules(tmp.path())).unwrap();

        fs::write(&file, "xyz").unwrap();
        set_file_mtime(&file, stamp).unwrap();

        let result = scan(tmp.path(), &no_rules(tmp.path())).unwrap();
        assert!(result.files_changed.is_empty());
    }

    #[test]
    fn test_scan_does_not_persist() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "x").unwrap();

        let result = scan(tmp.path(), &no_rules(tmp.path())).unwrap();
        assert!(result.has_changes());
        assert!(!result.index_path.exists());

        // Same delta again, since nothing was written
        let again = scan(tmp.path(), &no_rules(tmp.path())).unwrap();
        assert_eq!(again.files_changed, result.files_changed);
    }

    #[test]
    fn test_ignored_directory_is_pruned() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("node_modules/pkg")).unwrap();
        fs::write(tmp.path().join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(tmp.path().join("app.js"), "y").unwrap();
        fs::write(tmp.path().join("debug.log"), "z").unwrap();

        let rules = IgnoreRules::new(tmp.path(), &["node_modules/", "*.log"]).unwrap();
        let diff = diff_tree(tmp.path(), &rules, &FileIndex::new()).unwrap();

        assert_eq!(diff.changed, vec![tmp.path().join("app.js")]);
        assert!(!diff.files.keys().any(|k| k.starts_with("node_modules")));
    }

    // An unreadable directory fails the walk unless an ignore rule prunes it first
    #[cfg(unix)]
    #[test]
    fn test_ignored_subtree_is_never_read() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let hidden = tmp.path().join("ignored/locked");
        let open = tmp.path().join("open/locked");
        for dir in [&hidden, &open] {
            fs::create_dir_all(dir).unwrap();
            fs::write(dir.join("secret.txt"), "s").unwrap();
            fs::set_permissions(dir, fs::Permissions::from_mode(0o000)).unwrap();
        }
        // Privileged users read through mode 000
        let enforced = fs::read_dir(&open).is_err();

        let pruned = IgnoreRules::new(tmp.path(), &["ignored/", "open/"]).unwrap();
        let only_ignored = IgnoreRules::new(tmp.path(), &["ignored/"]).unwrap();
        let pruned_diff = diff_tree(tmp.path(), &pruned, &FileIndex::new());
        let open_diff = diff_tree(tmp.path(), &only_ignored, &FileIndex::new());

        for dir in [&hidden, &open] {
            fs::set_permissions(dir, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let pruned_diff = pruned_diff.unwrap();
        assert!(pruned_diff.files.is_empty(), "unexpected keys: {:?}", pruned_diff.files.keys());
        if enforced {
            assert!(open_diff.is_err());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_names_keep_distinct_keys() {
        use std::os::unix::ffi::OsStrExt;

        let tmp = TempDir::new().unwrap();
        let latin1 = tmp.path().join(OsStr::from_bytes(b"caf\xe9.txt"));
        let stray = tmp.path().join(OsStr::from_bytes(b"caf\xff.txt"));
        if fs::write(&latin1, "e9").is_err() {
            // Filesystem only accepts UTF-8 names
            return;
        }
        fs::write(&stray, "ff").unwrap();

        let diff = diff_tree(tmp.path(), &no_rules(tmp.path()), &FileIndex::new()).unwrap();
        assert_eq!(diff.files.len(), 2);
        assert_eq!(diff.changed, vec![latin1.clone(), stray.clone()]);
        for key in diff.files.keys() {
            assert!(tmp.path().join(key_path(key)).exists(), "{:?} does not map back", key);
        }

        // Keys survive the JSON index and come back as the original bytes
        let index_path = tmp.path().join(INDEX_DIR).join(INDEX_FILE_NAME);
        FileIndex::with_files(diff.files).save(&index_path).unwrap();
        let prior = FileIndex::load(&index_path).unwrap();
        assert_eq!(prior.files.len(), 2);

        fs::remove_file(&stray).unwrap();
        let diff = diff_tree(tmp.path(), &no_rules(tmp.path()), &prior).unwrap();
        assert!(diff.changed.is_empty());
        assert_eq!(diff.deleted, vec![stray]);
    }

    #[test]
    fn test_key_path_plain_names() {
        let key = file_key(Path::new("/src/app/a b.txt"), Path::new("/src")).unwrap();
        assert_eq!(key_path(&key), Path::new("app/a b.txt"));
        assert_eq!(file_key(Path::new("/src"), Path::new("/src")), None);
    }

    #[test]
    fn test_reserved_directories_are_pruned() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(".git/objects")).unwrap();
        fs::write(tmp.path().join(".git/HEAD"), "ref").unwrap();
        fs::create_dir_all(tmp.path().join("sub/.devsync")).unwrap();
        fs::write(tmp.path().join("sub/.devsync/state"), "s").unwrap();
        fs::write(tmp.path().join("sub/code.rs"), "c").unwrap();

        let diff = diff_tree(tmp.path(), &no_rules(tmp.path()), &FileIndex::new()).unwrap();
        let keys: Vec<&String> = diff.files.keys().collect();

        assert_eq!(keys.len(), 2, "unexpected keys: {:?}", keys);
        assert!(diff.files.contains_key("sub"));
        assert!(diff.files.contains_key(&Path::new("sub").join("code.rs").to_string_lossy().into_owned()));
    }

    #[test]
    fn test_new_directory_reported_with_contents() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("views")).unwrap();
        fs::write(tmp.path().join("views/view.html"), "<p/>").unwrap();
        fs::create_dir(tmp.path().join("emptyDir")).unwrap();

        let diff = diff_tree(tmp.path(), &no_rules(tmp.path()), &FileIndex::new()).unwrap();

        assert_eq!(
            diff.changed,
            vec![
                tmp.path().join("emptyDir"),
                tmp.path().join("views"),
                tmp.path().join("views/view.html"),
            ]
        );
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing");
        assert!(run_indexer(&missing, &no_rules(&missing)).is_err());
    }

    #[test]
    fn test_single_file_root() {
        let tmp = TempDir::new().unwrap();
        let binary = tmp.path().join("app.jar");
        fs::write(&binary, "jar").unwrap();

        let result = run_indexer(&binary, &no_rules(tmp.path())).unwrap();

        assert_eq!(result.files_changed, vec![binary]);
        assert!(result.new_file_map.contains_key("app.jar"));
        assert_eq!(result.index_path, tmp.path().join(INDEX_DIR).join(INDEX_FILE_NAME));
    }

    #[test]
    fn test_update_index_with_watch_changes() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("file1"), "non-empty-string").unwrap();
        fs::write(tmp.path().join("file2"), "non-empty-string").unwrap();
        run_indexer(tmp.path(), &no_rules(tmp.path())).unwrap();

        fs::remove_file(tmp.path().join("file1")).unwrap();
        fs::write(tmp.path().join("file3"), "non-empty-string").unwrap();

        update_index_with_watch_changes(
            tmp.path(),
            &[tmp.path().join("file3"), tmp.path().join("vanished")],
            &[tmp.path().join("file1")],
        )
        .unwrap();

        let index = FileIndex::load(&resolve_index_path(tmp.path()).unwrap()).unwrap();
        assert!(!index.files.contains_key("file1"));
        assert!(index.files.contains_key("file2"));
        assert!(index.files.contains_key("file3"));
        assert!(!index.files.contains_key("vanished"));

        // Watcher-fed index now matches disk for those paths
        let result = scan(tmp.path(), &no_rules(tmp.path())).unwrap();
        assert!(!result.files_changed.contains(&tmp.path().join("file3")));
        assert!(result.files_deleted.is_empty());
    }
}
