//! Configuration files.
//!
//! - `.devsync.toml` at the project root describes where and how sources are pushed.
//! - `<config_dir>/devsync/preference.toml` holds per-user registry settings.

use crate::archive::RemoteFileMap;
use crate::error::{Result, SyncError};
use crate::registry::Registry;
use crate::transport::Backend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project config file name
pub const CONFIG_FILE: &str = ".devsync.toml";

/// Mount point of project sources inside the container
pub const DEFAULT_MOUNT_ROOT: &str = "/projects";

pub const PREFERENCE_DIR: &str = "devsync";
pub const PREFERENCE_FILE: &str = "preference.toml";

/// A logical project checked out under the mount root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    /// Directory under the mount root, overriding `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_path: Option<String>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clone_path: None,
        }
    }
}

/// devsync project configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevsyncConfig {
    pub mount_root: String,
    pub backend: Backend,
    /// Extra gitignore-style patterns, on top of `.devsyncignore`/`.gitignore`
    pub ignore: Vec<String>,
    pub projects: Vec<Project>,
    /// Root-relative local path -> remote relative path
    pub remote_files: RemoteFileMap,
}

impl Default for DevsyncConfig {
    fn default() -> Self {
        Self {
            mount_root: DEFAULT_MOUNT_ROOT.to_string(),
            backend: Backend::default(),
            ignore: Vec::new(),
            projects: Vec::new(),
            remote_files: RemoteFileMap::new(),
        }
    }
}

impl DevsyncConfig {
    /// Load config from project root.
    ///
    /// Returns default config if `.devsync.toml` doesn't exist.
    pub fn load(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        if config.mount_root.is_empty() {
            return Err(SyncError::Config(format!(
                "{}: mount_root must not be empty",
                config_path.display()
            )));
        }
        Ok(config)
    }
}

/// Per-user preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Registries in the order they were added
    #[serde(rename = "registry")]
    pub registry_list: Vec<Registry>,
}

impl Preferences {
    /// Default location of the preference file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(PREFERENCE_DIR).join(PREFERENCE_FILE))
    }

    /// Load preferences from the default location; empty if absent.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::warn!("No config directory on this platform; using empty preferences");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Registries in search order: the most recently added comes first.
    pub fn registries(&self) -> Vec<Registry> {
        self.registry_list.iter().rev().cloned().collect()
    }
}
