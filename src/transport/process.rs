//! Process-backed executor: `kubectl exec` / `docker exec` / `podman exec`.
//!
//! Spawns the container CLI with piped stdio. Archive bytes are fed to
//! stdin while stdout/stderr are drained, so neither side can stall the other.

use crate::archive::ArchiveStream;
use crate::error::{Result, SyncError};
use crate::transport::{ComponentInfo, ExecOutput, RemoteExecutor};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};

/// Container CLI used to reach the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Kubectl,
    Docker,
    Podman,
}

impl Backend {
    pub fn program(&self) -> &'static str {
        match self {
            Backend::Kubectl => "kubectl",
            Backend::Docker => "docker",
            Backend::Podman => "podman",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

impl FromStr for Backend {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "kubectl" | "kubernetes" => Ok(Backend::Kubectl),
            "docker" => Ok(Backend::Docker),
            "podman" => Ok(Backend::Podman),
            other => Err(SyncError::Config(format!("unknown backend: {}", other))),
        }
    }
}

/// Runs remote commands through a local container CLI.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    backend: Backend,
    program: Option<PathBuf>,
    namespace: Option<String>,
}

impl ProcessExecutor {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    /// Use a specific binary instead of looking the backend up on `PATH`.
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Kubernetes namespace (ignored by docker/podman).
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Arguments passed to the container CLI for `command` in `target`.
    pub fn command_args(&self, target: &ComponentInfo, command: &[String], interactive: bool) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if interactive {
            args.push("-i".to_string());
        }

        match self.backend {
            Backend::Kubectl => {
                if let Some(ns) = &self.namespace {
                    args.push("-n".to_string());
                    args.push(ns.clone());
                }
                args.push(target.pod_name.clone());
                if !target.container_name.is_empty() {
                    args.push("-c".to_string());
                    args.push(target.container_name.clone());
                }
                args.push("--".to_string());
            }
            Backend::Docker | Backend::Podman => {
                args.push(target.container_name.clone());
            }
        }

        args.extend(command.iter().cloned());
        args
    }

    /// Reject targets the backend cannot address: kubectl needs a pod,
    /// docker and podman need a container.
    pub fn validate_target(&self, target: &ComponentInfo) -> Result<()> {
        let missing = match self.backend {
            Backend::Kubectl if target.pod_name.is_empty() => "pod",
            Backend::Docker | Backend::Podman if target.container_name.is_empty() => "container",
            _ => return Ok(()),
        };
        Err(SyncError::Config(format!(
            "a {} name is required for the {} backend",
            missing, self.backend
        )))
    }

    fn program_path(&self) -> PathBuf {
        self.program
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.backend.program()))
    }
}

async fn feed_stdin(mut sink: ChildStdin, mut archive: ArchiveStream) -> Result<()> {
    while let Some(chunk) = archive.next().await {
        let chunk = chunk.map_err(SyncError::Archive)?;
        if let Err(e) = sink.write_all(&chunk).await {
            // Remote side exited; its status and stderr tell the story
            tracing::debug!("Remote stdin closed early: {}", e);
            return Ok(());
        }
    }
    if let Err(e) = sink.shutdown().await {
        tracing::debug!("Failed to close remote stdin: {}", e);
    }
    Ok(())
}

#[async_trait]
impl RemoteExecutor for ProcessExecutor {
    async fn execute(
        &self,
        target: &ComponentInfo,
        command: &[String],
        stdin: Option<ArchiveStream>,
    ) -> Result<ExecOutput> {
        self.validate_target(target)?;
        let program = self.program_path();
        let args = self.command_args(target, command, stdin.is_some());
        let shown = format!("{} {}", program.display(), args.join(" "));

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| SyncError::Spawn {
            command: shown,
            source,
        })?;

        let child_stdin = child.stdin.take();
        let feed = async move {
            match (child_stdin, stdin) {
                (Some(sink), Some(archive)) => feed_stdin(sink, archive).await,
                _ => Ok(()),
            }
        };

        // An aborted archive drops the wait future, which kills the child
        let (_, output) = tokio::try_join!(feed, async move {
            child.wait_with_output().await.map_err(SyncError::from)
        })?;

        Ok(ExecOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ComponentInfo {
        ComponentInfo::new("app-pod", "runtime")
    }

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_kubectl_args() {
        let exec = ProcessExecutor::new(Backend::Kubectl).namespace("dev");
        let args = exec.command_args(&target(), &cmd(&["mkdir", "-p", "/projects"]), false);
        assert_eq!(
            args,
            cmd(&["exec", "-n", "dev", "app-pod", "-c", "runtime", "--", "mkdir", "-p", "/projects"])
        );
    }

    #[test]
    fn test_docker_args_with_stdin() {
        let exec = ProcessExecutor::new(Backend::Docker);
        let args = exec.command_args(&target(), &cmd(&["tar", "xf", "-"]), true);
        assert_eq!(args, cmd(&["exec", "-i", "runtime", "tar", "xf", "-"]));
    }

    #[test]
    fn test_target_must_be_addressable() {
        let kubectl = ProcessExecutor::new(Backend::Kubectl);
        let err = kubectl
            .validate_target(&ComponentInfo::new("", "runtime"))
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(ref msg) if msg.contains("pod")));
        assert!(kubectl.validate_target(&ComponentInfo::new("app-pod", "")).is_ok());

        let docker = ProcessExecutor::new(Backend::Docker);
        assert!(docker.validate_target(&ComponentInfo::new("", "runtime")).is_ok());
        assert!(docker.validate_target(&ComponentInfo::new("app-pod", "")).is_err());
    }

    #[tokio::test]
    async fn test_empty_pod_is_rejected_before_spawn() {
        // Would be a spawn error if the program were launched
        let exec = ProcessExecutor::new(Backend::Kubectl).program("/nonexistent/devsync-test-cli");
        let err = exec
            .execute(&ComponentInfo::new("", "runtime"), &cmd(&["true"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("kubectl".parse::<Backend>().unwrap(), Backend::Kubectl);
        assert_eq!("Podman".parse::<Backend>().unwrap(), Backend::Podman);
        assert!("lxc".parse::<Backend>().is_err());
        assert_eq!(Backend::Docker.to_string(), "docker");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let exec = ProcessExecutor::new(Backend::Docker).program("/nonexistent/devsync-test-cli");
        let err = exec
            .execute(&target(), &cmd(&["true"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Spawn { .. }));
    }

    // A shell script stands in for the container CLI and counts stdin bytes
    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_archive_into_stdin() {
        use crate::archive::archive_pipe;
        use std::io::Write;

        let script = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(script.path(), "#!/bin/sh\nwc -c\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(script.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let script_path = script.into_temp_path();

        let (mut writer, stream) = archive_pipe();
        std::thread::spawn(move || {
            writer.write_all(&vec![7u8; 200_000]).unwrap();
            writer.finish().unwrap();
        });

        let exec = ProcessExecutor::new(Backend::Docker).program(script_path.to_path_buf());
        let output = exec
            .execute(&target(), &cmd(&["tar", "xf", "-"]), Some(stream))
            .await
            .unwrap();

        assert!(output.success(), "stderr: {}", output.stderr);
        assert_eq!(output.stdout.trim(), "200000");
    }
}
