//! Sync coordinator: one push of local sources into a container.
//!
//! Decision order for a pass:
//! 1. Watcher-supplied lists, unless a full push is required.
//! 2. Full push (first deployment, new pod, or forced): the whole tree.
//! 3. Otherwise the indexer's delta, filtered by the ignore rules.
//!
//! Remote deletes always precede the archive. The file index is written
//! only after every remote step succeeded.

use crate::archive::{ArchiveBuilder, ArchiveStats};
use crate::config::{DevsyncConfig, Project};
use crate::error::{Result, SyncError};
use crate::ignore_rules::IgnoreRules;
use crate::index::indexer::source_base;
use crate::index::{delete_index_file, scan, update_index_with_watch_changes, IndexerResult, INDEX_DIR};
use crate::sync::{remote_paths_for_deletion, resolve_sync_folder, SyncParameters};
use crate::transport::{ComponentInfo, RemoteExecutor, Transport};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// What one pass decided to transfer.
struct Plan {
    changed: Vec<PathBuf>,
    deleted: Vec<PathBuf>,
    /// Snapshot to persist after the push; `None` in watch mode
    indexed: Option<IndexerResult>,
}

/// Drives sync passes against one component.
///
/// Not safe to run concurrently against the same source root.
pub struct SyncCoordinator<E> {
    transport: Transport<E>,
    mount_root: String,
    projects: Vec<Project>,
}

impl<E: RemoteExecutor> SyncCoordinator<E> {
    pub fn new(executor: E, mount_root: impl Into<String>, projects: Vec<Project>) -> Self {
        Self {
            transport: Transport::new(executor),
            mount_root: mount_root.into(),
            projects,
        }
    }

    pub fn from_config(executor: E, config: &DevsyncConfig) -> Self {
        Self::new(executor, config.mount_root.clone(), config.projects.clone())
    }

    pub fn transport(&self) -> &Transport<E> {
        &self.transport
    }

    /// Remote directory for `comp_info`.
    ///
    /// A source mount other than the configured mount root is used verbatim;
    /// otherwise the folder is derived from the declared projects.
    pub fn remote_root(&self, comp_info: &ComponentInfo) -> Result<String> {
        match comp_info.source_mount.as_deref() {
            Some(mount) if !mount.is_empty() && mount != self.mount_root => Ok(mount.to_string()),
            _ => resolve_sync_folder(&self.mount_root, &self.projects),
        }
    }

    /// Run one sync pass. Returns whether anything was pushed.
    pub async fn sync_files(&self, params: &SyncParameters) -> Result<bool> {
        // Rejects bad clone paths before touching anything
        let remote_root = self.remote_root(&params.comp_info)?;

        let base = source_base(&params.path)?;
        let rules = IgnoreRules::from_directory(&base)?.with_patterns(&params.ignored_files)?;
        let force = params.is_force_push();

        let plan = if params.is_watch() && !force {
            tracing::debug!(
                "Using watcher changes: {} changed, {} deleted",
                params.watch_files.len(),
                params.watch_deleted_files.len()
            );
            Plan {
                changed: params.watch_files.clone(),
                deleted: params.watch_deleted_files.clone(),
                indexed: None,
            }
        } else {
            if force && is_source_empty(&params.path)? {
                return Err(SyncError::EmptySource(params.path.clone()));
            }
            fs::create_dir_all(base.join(INDEX_DIR))?;
            if force {
                delete_index_file(&params.path)?;
            }

            let indexed = scan(&params.path, &rules)?;
            let changed = rules.filter(indexed.files_changed.clone());
            let deleted = rules.filter(indexed.files_deleted.clone());
            tracing::debug!("Files changed: {:?}", changed);
            tracing::debug!("Files to be deleted: {:?}", deleted);

            if !force && changed.is_empty() && deleted.is_empty() {
                tracing::info!("No file changes detected, skipping push");
                return Ok(false);
            }
            Plan {
                changed,
                deleted,
                indexed: Some(indexed),
            }
        };

        self.push(params, &base, &remote_root, &plan, &rules, force)
            .await?;

        match &plan.indexed {
            Some(indexed) => {
                indexed.persist_if_changed()?;
            }
            None => update_index_with_watch_changes(&params.path, &plan.changed, &plan.deleted)?,
        }
        Ok(true)
    }

    async fn push(
        &self,
        params: &SyncParameters,
        base: &Path,
        remote_root: &str,
        plan: &Plan,
        rules: &IgnoreRules,
        force: bool,
    ) -> Result<()> {
        let target = &params.comp_info;
        tracing::debug!(
            "Push: path {}, {} changed, {} deleted, force {}",
            params.path.display(),
            plan.changed.len(),
            plan.deleted.len(),
            force
        );

        if remote_root != self.mount_root {
            tracing::debug!("Creating {} in the container if it doesn't exist", remote_root);
            self.transport.make_dir(target, remote_root).await?;
        }

        let remote_deletes =
            remote_paths_for_deletion(&plan.deleted, base, remote_root, &params.remote_file_map);
        self.transport.remove_files(target, &remote_deletes).await?;

        if !force && plan.changed.is_empty() {
            return Ok(());
        }

        let mut builder = ArchiveBuilder::new(&params.path)
            .ignore_rules(rules.clone())
            .remote_names(params.remote_file_map.clone());
        if !force {
            builder = builder.files(plan.changed.clone());
        }

        let stats = self.transfer(target, remote_root, builder).await?;
        tracing::info!(
            "Pushed {} entries ({} bytes) to {}",
            stats.entries(),
            stats.bytes,
            remote_root
        );
        Ok(())
    }

    /// Stream the archive into the container while it is being built.
    async fn transfer(
        &self,
        target: &ComponentInfo,
        remote_root: &str,
        builder: ArchiveBuilder,
    ) -> Result<ArchiveStats> {
        let (stream, handle) = builder.spawn();
        let extracted = self
            .transport
            .extract_archive(target, remote_root, stream)
            .await;
        let built = handle.await?;

        match (extracted, built) {
            (Ok(_), Ok(stats)) => Ok(stats),
            // The remote side stopped reading; its error is the cause
            (Err(remote), Err(SyncError::Archive(e))) if e.kind() == io::ErrorKind::BrokenPipe => {
                Err(remote)
            }
            (_, Err(archive)) => Err(archive),
            (Err(remote), Ok(_)) => Err(remote),
        }
    }
}

/// A directory holding nothing but the index directory counts as empty.
fn is_source_empty(path: &Path) -> Result<bool> {
    if !fs::metadata(path)?.is_dir() {
        return Ok(false);
    }
    for entry in fs::read_dir(path)? {
        if entry?.file_name() != INDEX_DIR {
            return Ok(false);
        }
    }
    Ok(true)
}
