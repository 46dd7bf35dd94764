// Persisted file index
//
// Records size and modification time per root-relative path so the next
// sync pass can find what changed without hashing content. Stored as JSON
// under <root>/.devsync/file-index.json with an explicit kind/version tag.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Directory holding sync state, relative to the project root.
pub const INDEX_DIR: &str = ".devsync";

/// Index file name inside [`INDEX_DIR`].
pub const INDEX_FILE_NAME: &str = "file-index.json";

const INDEX_KIND: &str = "FileIndex";
const INDEX_API_VERSION: &str = "v1";

/// Change-detection signature of a single path.
///
/// Equal signatures do not guarantee equal content: an edit that keeps both
/// the size and the modification time is invisible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub size: u64,
    pub last_modified_date: DateTime<Utc>,
}

impl FileData {
    pub fn new(size: u64, modified: SystemTime) -> Self {
        Self {
            size,
            last_modified_date: DateTime::<Utc>::from(modified),
        }
    }

    pub fn from_metadata(metadata: &fs::Metadata) -> io::Result<Self> {
        Ok(Self::new(metadata.len(), metadata.modified()?))
    }

    /// Stat `path` without following a trailing symlink.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        Self::from_metadata(&fs::symlink_metadata(path)?)
    }
}

/// Map of root-relative path to signature.
pub type FileMap = BTreeMap<String, FileData>;

/// The persisted snapshot of a synced root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIndex {
    pub kind: String,
    pub api_version: String,
    #[serde(default)]
    pub files: FileMap,
}

impl Default for FileIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl FileIndex {
    pub fn new() -> Self {
        Self::with_files(FileMap::new())
    }

    pub fn with_files(files: FileMap) -> Self {
        Self {
            kind: INDEX_KIND.to_string(),
            api_version: INDEX_API_VERSION.to_string(),
            files,
        }
    }

    fn is_current_schema(&self) -> bool {
        self.kind == INDEX_KIND && self.api_version == INDEX_API_VERSION
    }

    /// Read the index at `path`.
    ///
    /// A missing file is an empty index. Content that does not parse, or that
    /// carries another kind/version tag, is discarded and also yields an empty
    /// index so the next pass becomes a full sync.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<FileIndex>(&data) {
            Ok(index) if index.is_current_schema() => Ok(index),
            Ok(index) => {
                tracing::warn!(
                    "Resetting index {} with unsupported schema {}/{}",
                    path.display(),
                    index.kind,
                    index.api_version
                );
                Ok(Self::new())
            }
            Err(e) => {
                tracing::warn!("Resetting unreadable index {}: {}", path.display(), e);
                Ok(Self::new())
            }
        }
    }

    /// Atomically replace the index at `path` (write to a sibling temp file, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer(&mut temp, self)?;
        temp.write_all(b"\n")?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;

        tracing::debug!("Wrote {} entries to {}", self.files.len(), path.display());
        Ok(())
    }
}

/// Write `files` as the new index at `path`, replacing whatever was there.
pub fn write_file_map(files: FileMap, path: &Path) -> Result<()> {
    FileIndex::with_files(files).save(path)
}

/// Location of the index for `root`.
///
/// A directory keeps its index inside itself; a single file keeps it next to
/// the file. Fails when `root` does not exist.
pub fn resolve_index_path(root: &Path) -> Result<PathBuf> {
    let metadata = fs::metadata(root)?;
    let base = if metadata.is_dir() {
        root
    } else {
        root.parent().unwrap_or(root)
    };
    Ok(base.join(INDEX_DIR).join(INDEX_FILE_NAME))
}

/// The index path relative to the project root, in forward-slash form.
pub fn index_path_relative_to_root() -> String {
    format!("{}/{}", INDEX_DIR, INDEX_FILE_NAME)
}

/// Remove the index for `root`. A missing root or index is not an error.
pub fn delete_index_file(root: &Path) -> Result<()> {
    let path = match resolve_index_path(root) {
        Ok(path) => path,
        Err(crate::error::SyncError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(())
        }
        Err(e) => return Err(e),
    };
    match fs::remove_file(&path) {
        Ok(()) => {
            tracing::debug!("Removed index {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Make sure `<root>/.gitignore` exists and lists the index file.
///
/// Creates the file when absent and appends the entry only when missing.
/// Returns the path to the ignore file.
pub fn ensure_ignore_entry(root: &Path) -> Result<PathBuf> {
    // Fails on a missing root
    fs::metadata(root)?;

    let ignore_file = root.join(crate::ignore_rules::GIT_IGNORE_FILE);
    let entry = index_path_relative_to_root();

    let existing = match fs::read_to_string(&ignore_file) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    if existing.lines().any(|line| line.trim() == entry) {
        return Ok(ignore_file);
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&ignore_file)?;
    if existing.is_empty() || existing.ends_with('\n') {
        writeln!(file, "{}", entry)?;
    } else {
        write!(file, "\n{}\n", entry)?;
    }
    tracing::debug!("Added {} to {}", entry, ignore_file.display());

    Ok(ignore_file)
}
