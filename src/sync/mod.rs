//! Sync coordination.
//!
//! Decides what a push has to transfer, then drives the remote side:
//! create the sync folder, delete removed files, extract the archive.

pub mod coordinator;

use crate::archive::{to_slash, RemoteFileMap};
use crate::config::Project;
use crate::error::{Result, SyncError};
use crate::transport::ComponentInfo;
use std::path::{Path, PathBuf};

pub use coordinator::SyncCoordinator;

/// Inputs of one sync pass.
#[derive(Debug, Clone, Default)]
pub struct SyncParameters {
    /// Local source root (directory, or a single file)
    pub path: PathBuf,
    /// Changed paths reported by an external watcher
    pub watch_files: Vec<PathBuf>,
    /// Deleted paths reported by an external watcher
    pub watch_deleted_files: Vec<PathBuf>,
    /// Extra ignore patterns for this pass
    pub ignored_files: Vec<String>,
    pub force_build: bool,
    /// Whether the component was already deployed before this pass
    pub component_exists: bool,
    /// The pod was recreated since the last pass
    pub pod_changed: bool,
    pub remote_file_map: RemoteFileMap,
    pub comp_info: ComponentInfo,
}

impl SyncParameters {
    pub fn new(path: impl Into<PathBuf>, comp_info: ComponentInfo) -> Self {
        Self {
            path: path.into(),
            comp_info,
            component_exists: true,
            ..Default::default()
        }
    }

    /// The whole tree has to be pushed: first deployment, new pod, or forced.
    pub fn is_force_push(&self) -> bool {
        self.force_build || !self.component_exists || self.pod_changed
    }

    pub fn is_watch(&self) -> bool {
        !self.watch_files.is_empty() || !self.watch_deleted_files.is_empty()
    }
}

/// Remote directory the sources land in.
///
/// With exactly one project, that project's directory under `mount_root`
/// (its `clone_path` when set, else its name). Otherwise `mount_root` itself.
pub fn resolve_sync_folder(mount_root: &str, projects: &[Project]) -> Result<String> {
    let [project] = projects else {
        return Ok(mount_root.to_string());
    };

    let sub = match project.clone_path.as_deref() {
        Some(clone_path) if !clone_path.is_empty() => {
            if clone_path.starts_with('/') || Path::new(clone_path).is_absolute() {
                return Err(SyncError::InvalidClonePath {
                    clone_path: clone_path.to_string(),
                    reason: "must be a relative path".to_string(),
                });
            }
            if clone_path.contains("..") {
                return Err(SyncError::InvalidClonePath {
                    clone_path: clone_path.to_string(),
                    reason: format!("cannot escape {}; don't use ..", mount_root),
                });
            }
            clone_path
        }
        _ => project.name.as_str(),
    };

    let sub = to_slash(Path::new(sub)).unwrap_or_else(|| sub.to_string());
    Ok(join_remote(mount_root, &sub))
}

/// Join a slash-form relative path onto a remote directory.
pub fn join_remote(dir: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        return dir.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), relative)
}

/// Remote paths to remove for locally deleted `files`.
///
/// Paths under `base` are made root-relative; other relative paths are taken
/// as already root-relative. Remote-name overrides apply. Names that are not
/// valid UTF-8 cannot be passed to the remote command and are skipped.
pub fn remote_paths_for_deletion(
    files: &[PathBuf],
    base: &Path,
    remote_root: &str,
    remote_names: &RemoteFileMap,
) -> Vec<String> {
    let mut paths = Vec::with_capacity(files.len());
    for file in files {
        let relative = match file.strip_prefix(base) {
            Ok(relative) => relative,
            Err(_) if file.is_relative() => file.as_path(),
            Err(_) => {
                tracing::warn!("Not deleting {}: outside {}", file.display(), base.display());
                continue;
            }
        };
        let Some(slash) = to_slash(relative) else {
            tracing::warn!("Not deleting {}: name is not valid UTF-8", file.display());
            continue;
        };
        if slash.is_empty() {
            continue;
        }
        let name = remote_names.get(&slash).map(String::as_str).unwrap_or(&slash);
        paths.push(join_remote(remote_root, name));
    }
    paths
}
