//! Transport: runs commands inside the target container.
//!
//! Exactly three command shapes are issued: create the sync directory,
//! remove deleted files, and extract the archive read from stdin.

pub mod process;

use crate::archive::ArchiveStream;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use process::{Backend, ProcessExecutor};

/// Identity of the container that receives the sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub container_name: String,
    pub pod_name: String,
    /// Where sources are mounted in the container, when it differs from the configured mount root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_mount: Option<String>,
}

impl ComponentInfo {
    pub fn new(pod_name: impl Into<String>, container_name: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            pod_name: pod_name.into(),
            source_mount: None,
        }
    }
}

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code; `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Executes a command in a container, optionally streaming an archive to its stdin.
///
/// Implementations return `Ok` with the exit status for commands that ran,
/// and reserve `Err` for failures to launch or to feed stdin.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(
        &self,
        target: &ComponentInfo,
        command: &[String],
        stdin: Option<ArchiveStream>,
    ) -> Result<ExecOutput>;
}

#[async_trait]
impl<T: RemoteExecutor + ?Sized> RemoteExecutor for Arc<T> {
    async fn execute(
        &self,
        target: &ComponentInfo,
        command: &[String],
        stdin: Option<ArchiveStream>,
    ) -> Result<ExecOutput> {
        (**self).execute(target, command, stdin).await
    }
}

/// `mkdir -p <dir>`
pub fn mkdir_command(dir: &str) -> Vec<String> {
    vec!["mkdir".to_string(), "-p".to_string(), dir.to_string()]
}

/// `rm -rf <paths...>`
pub fn remove_command(paths: &[String]) -> Vec<String> {
    let mut cmd = vec!["rm".to_string(), "-rf".to_string()];
    cmd.extend(paths.iter().cloned());
    cmd
}

/// `tar xf - -C <dest> --no-same-owner`
pub fn extract_command(dest: &str) -> Vec<String> {
    ["tar", "xf", "-", "-C", dest, "--no-same-owner"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Issues the remote side of a sync pass. No retries: the first failure is returned.
pub struct Transport<E> {
    executor: E,
}

impl<E: RemoteExecutor> Transport<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    async fn run(
        &self,
        target: &ComponentInfo,
        command: Vec<String>,
        stdin: Option<ArchiveStream>,
    ) -> Result<ExecOutput> {
        let shown = command.join(" ");
        tracing::debug!(
            "Executing `{}` in {}/{}",
            shown,
            target.pod_name,
            target.container_name
        );

        let output = self.executor.execute(target, &command, stdin).await?;
        if !output.success() {
            tracing::error!("Command '{}' in container failed", shown);
            tracing::error!("stdout: {}", output.stdout);
            tracing::error!("stderr: {}", output.stderr);
            return Err(SyncError::RemoteCommand {
                command: shown,
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Create `dir` (and parents) in the container. Succeeds if it already exists.
    pub async fn make_dir(&self, target: &ComponentInfo, dir: &str) -> Result<()> {
        self.run(target, mkdir_command(dir), None).await.map(|_| ())
    }

    /// Remove `paths` recursively in the container. An empty list issues nothing.
    pub async fn remove_files(&self, target: &ComponentInfo, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        tracing::debug!("Remote files marked for deletion: {:?}", paths);
        self.run(target, remove_command(paths), None).await.map(|_| ())
    }

    /// Extract `archive` under `dest` in the container without forcing ownership.
    pub async fn extract_archive(
        &self,
        target: &ComponentInfo,
        dest: &str,
        archive: ArchiveStream,
    ) -> Result<ExecOutput> {
        self.run(target, extract_command(dest), Some(archive)).await
    }
}
