use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Walk(#[from] ignore::Error),

    #[error("Invalid ignore pattern: {0}")]
    IgnorePattern(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid clone path {clone_path:?}: {reason}")]
    InvalidClonePath { clone_path: String, reason: String },

    #[error("Source directory {} is empty", .0.display())]
    EmptySource(PathBuf),

    #[error(
        "Remote command `{command}` failed (exit status: {})\nstdout: {stdout}\nstderr: {stderr}",
        status.map(|s| s.to_string()).unwrap_or_else(|| "signal".to_string())
    )]
    RemoteCommand {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to launch remote command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Archive stream aborted: {0}")]
    Archive(#[source] io::Error),

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Registry {name}: {reason}")]
    Registry { name: String, reason: String },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// True when the error came from the remote side rather than from local I/O.
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncError::RemoteCommand { .. } | SyncError::Spawn { .. })
    }
}
