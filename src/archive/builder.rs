//! Archive builder.
//!
//! Produces a tar stream of either an explicit list of paths or a whole
//! source tree. Destination names are root-relative, forward-slash, and may
//! be renamed through a [`RemoteFileMap`].

use crate::archive::pipe::{archive_pipe, ArchiveStream};
use crate::error::{Result, SyncError};
use crate::ignore_rules::IgnoreRules;
use crate::index::indexer::{source_base, source_walker};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tokio::task::JoinHandle;

/// Root-relative local path (forward slashes) to root-relative remote path.
/// Paths without an entry keep their local name.
pub type RemoteFileMap = BTreeMap<String, String>;

/// Counters for one archive
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Regular files written with content
    pub files: u64,

    /// Empty directories written as header-only entries
    pub dirs: u64,

    /// Symlinks written as link headers
    pub symlinks: u64,

    /// Content bytes written
    pub bytes: u64,

    /// Requested paths left out (vanished or ignored)
    pub skipped: u64,
}

impl ArchiveStats {
    pub fn entries(&self) -> u64 {
        self.files + self.dirs + self.symlinks
    }
}

/// Forward-slash form of a relative path, or `None` when a component is not valid UTF-8.
pub fn to_slash(relative: &Path) -> Option<String> {
    let parts = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_str()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

/// Archive name for `relative`, keeping the raw bytes of every component.
fn archive_path(relative: &Path) -> PathBuf {
    relative
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

fn dir_is_empty(path: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

/// Builds a tar archive of a source tree.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    source_root: PathBuf,
    files: Option<Vec<PathBuf>>,
    ignore: IgnoreRules,
    remote_names: RemoteFileMap,
}

impl ArchiveBuilder {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        let source_root = source_root.into();
        Self {
            ignore: IgnoreRules::empty(source_root.clone()),
            source_root,
            files: None,
            remote_names: RemoteFileMap::new(),
        }
    }

    /// Archive exactly these paths instead of the whole tree.
    ///
    /// Relative paths are taken relative to the source root. Directories are
    /// not descended into; the list is expected to already name descendants.
    pub fn files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn ignore_rules(mut self, rules: IgnoreRules) -> Self {
        self.ignore = rules;
        self
    }

    pub fn remote_names(mut self, names: RemoteFileMap) -> Self {
        self.remote_names = names;
        self
    }

    /// Name of `relative` inside the archive.
    pub fn destination_name(&self, relative: &Path) -> PathBuf {
        let remote = to_slash(relative).and_then(|slash| self.remote_names.get(&slash));
        match remote {
            Some(remote) => PathBuf::from(remote.trim_start_matches('/')),
            None => archive_path(relative),
        }
    }

    /// Write the archive into `writer`, including the end-of-archive trailer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<ArchiveStats> {
        let mut tar = tar::Builder::new(writer);
        tar.follow_symlinks(false);

        let base = source_base(&self.source_root)?;
        let mut stats = ArchiveStats::default();

        match &self.files {
            Some(files) => self.append_listed(&mut tar, &base, files, &mut stats)?,
            None => self.append_tree(&mut tar, &base, &mut stats)?,
        }

        tar.finish()?;
        tracing::debug!(
            "Archived {} entries ({} bytes), skipped {}",
            stats.entries(),
            stats.bytes,
            stats.skipped
        );
        Ok(stats)
    }

    fn append_listed<W: Write>(
        &self,
        tar: &mut tar::Builder<W>,
        base: &Path,
        files: &[PathBuf],
        stats: &mut ArchiveStats,
    ) -> io::Result<()> {
        let mut seen: HashSet<PathBuf> = HashSet::with_capacity(files.len());

        for file in files {
            let path = if file.is_relative() && !file.starts_with(base) {
                base.join(file)
            } else {
                file.clone()
            };
            if !seen.insert(path.clone()) {
                continue;
            }

            let metadata = match fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!("Skipping vanished file: {}", path.display());
                    stats.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let relative = path.strip_prefix(base).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is outside {}", path.display(), base.display()),
                )
            })?;
            if relative.as_os_str().is_empty() {
                continue;
            }

            if self.ignore.is_ignored(relative, metadata.is_dir()) {
                tracing::debug!("Skipping ignored file: {}", relative.display());
                stats.skipped += 1;
                continue;
            }

            if metadata.is_dir() && !dir_is_empty(&path)? {
                continue;
            }

            self.append_entry(tar, &path, relative, &metadata, stats)?;
        }

        Ok(())
    }

    fn append_tree<W: Write>(
        &self,
        tar: &mut tar::Builder<W>,
        base: &Path,
        stats: &mut ArchiveStats,
    ) -> io::Result<()> {
        for result in source_walker(&self.source_root, base, &self.ignore) {
            let entry = result.map_err(|e| match e.into_io_error() {
                Some(io_err) => io_err,
                None => io::Error::new(io::ErrorKind::Other, "directory walk failed"),
            })?;
            let path = entry.path();
            let relative = match path.strip_prefix(base) {
                Ok(relative) if !relative.as_os_str().is_empty() => relative,
                _ => continue,
            };

            let metadata = fs::symlink_metadata(path)?;
            if metadata.is_dir() && !dir_is_empty(path)? {
                continue;
            }

            self.append_entry(tar, path, relative, &metadata, stats)?;
        }

        Ok(())
    }

    fn append_entry<W: Write>(
        &self,
        tar: &mut tar::Builder<W>,
        path: &Path,
        relative: &Path,
        metadata: &fs::Metadata,
        stats: &mut ArchiveStats,
    ) -> io::Result<()> {
        let name = self.destination_name(relative);
        tracing::debug!("tar {} -> {}", relative.display(), name.display());

        // Handles regular files, header-only directories and symlinks alike
        tar.append_path_with_name(path, &name)?;

        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            stats.symlinks += 1;
        } else if file_type.is_dir() {
            stats.dirs += 1;
        } else {
            stats.files += 1;
            stats.bytes += metadata.len();
        }
        Ok(())
    }

    /// Build the archive on a blocking worker, streaming it through a bounded pipe.
    ///
    /// The returned stream ends normally after the trailer, or yields an error
    /// if construction failed. The handle reports the same outcome.
    pub fn spawn(self) -> (ArchiveStream, JoinHandle<Result<ArchiveStats>>) {
        let (mut writer, stream) = archive_pipe();

        let handle = tokio::task::spawn_blocking(move || match self.write_to(&mut writer) {
            Ok(stats) => {
                writer.finish().map_err(SyncError::Archive)?;
                Ok(stats)
            }
            Err(e) => {
                tracing::error!("Error while creating archive: {}", e);
                writer.fail(&e);
                Err(SyncError::Archive(e))
            }
        });

        (stream, handle)
    }
}
