//! Catalog sources: where a registry's stack index comes from.

use crate::error::{Result, SyncError};
use crate::registry::Registry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const INDEX_FILE: &str = "index.json";

/// One version of a stack as published in a registry index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackVersion {
    #[serde(default)]
    pub version: String,
    #[serde(default, rename = "default")]
    pub is_default: bool,
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub starter_projects: Vec<String>,
}

/// Raw entry of a registry `index.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub project_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub architectures: Vec<String>,
    #[serde(default)]
    pub starter_projects: Vec<String>,
    #[serde(default)]
    pub versions: Vec<StackVersion>,
}

impl IndexEntry {
    /// Entries without a type are treated as stacks.
    pub fn is_stack(&self) -> bool {
        self.kind.is_empty() || self.kind == "stack"
    }
}

/// Fetches the stack index of one registry.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_index(&self, registry: &Registry) -> Result<Vec<IndexEntry>>;
}

/// Reads `index.json` from a local directory (`file://` URL or plain path).
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryCatalog;

impl DirectoryCatalog {
    pub fn index_path(registry: &Registry) -> Result<PathBuf> {
        let url = registry.url.trim();
        if url.starts_with("http://") || url.starts_with("https://") {
            return Err(SyncError::Registry {
                name: registry.name.clone(),
                reason: format!("{} is not a local registry", url),
            });
        }
        let dir = url.strip_prefix("file://").unwrap_or(url);
        if dir.is_empty() {
            return Err(SyncError::Registry {
                name: registry.name.clone(),
                reason: "empty registry URL".to_string(),
            });
        }
        Ok(PathBuf::from(dir).join(INDEX_FILE))
    }
}

#[async_trait]
impl CatalogSource for DirectoryCatalog {
    async fn fetch_index(&self, registry: &Registry) -> Result<Vec<IndexEntry>> {
        let path = Self::index_path(registry)?;
        tracing::debug!("Reading registry {} index from {}", registry.name, path.display());
        let content = tokio::fs::read(&path).await.map_err(|e| SyncError::Registry {
            name: registry.name.clone(),
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
        Ok(serde_json::from_slice(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn registry(url: &str) -> Registry {
        Registry {
            name: "local".to_string(),
            url: url.to_string(),
            secure: false,
        }
    }

    #[test]
    fn test_index_path_forms() {
        assert_eq!(
            DirectoryCatalog::index_path(&registry("file:///srv/registry")).unwrap(),
            PathBuf::from("/srv/registry/index.json")
        );
        assert_eq!(
            DirectoryCatalog::index_path(&registry("/srv/registry")).unwrap(),
            PathBuf::from("/srv/registry/index.json")
        );
        assert!(DirectoryCatalog::index_path(&registry("https://registry.devfile.io")).is_err());
        assert!(DirectoryCatalog::index_path(&registry("")).is_err());
    }

    #[tokio::test]
    async fn test_reads_index() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(INDEX_FILE),
            r#"[
                {"name": "go", "displayName": "Go Runtime", "type": "stack",
                 "architectures": ["amd64", "arm64"],
                 "versions": [{"version": "1.0.2", "default": true, "schemaVersion": "2.1.0"}]},
                {"name": "go-basic", "type": "sample"}
            ]"#,
        )
        .unwrap();

        let entries = DirectoryCatalog
            .fetch_index(&registry(tmp.path().to_str().unwrap()))
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].display_name, "Go Runtime");
        assert!(entries[0].versions[0].is_default);
        assert!(entries[0].is_stack());
        assert!(!entries[1].is_stack());
    }

    #[tokio::test]
    async fn test_missing_index_names_registry() {
        let tmp = TempDir::new().unwrap();
        let err = DirectoryCatalog
            .fetch_index(&registry(tmp.path().to_str().unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Registry { ref name, .. } if name == "local"));
    }
}
