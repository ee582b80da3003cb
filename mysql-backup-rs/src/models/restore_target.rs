//! Operator-maintained list of servers a backup may be restored onto.

use crate::models::connection::MySqlConnection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreTarget {
    pub name: String,

    #[serde(flatten)]
    pub connection: MySqlConnection,

    #[serde(default)]
    pub description: String,
}

/// What the API shows for a target. Credentials stay server-side.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreTargetView {
    pub index: usize,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub description: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Restore targets file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("Failed to read restore targets: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse restore targets: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    databases: Vec<RestoreTarget>,
}

/// Targets in file order; a target's identity is its position.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<RestoreTarget>,
}

impl TargetRegistry {
    pub fn new(targets: Vec<RestoreTarget>) -> Self {
        Self { targets }
    }

    /// Re-read on every request so operators can edit the file without a restart.
    pub async fn load(path: &Path) -> Result<Self, RegistryError> {
        let body = match tokio::fs::read(path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RegistryError::Missing(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let file: RegistryFile = serde_json::from_slice(&body)?;
        Ok(Self::new(file.databases))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Negative and past-the-end indices both yield `None`.
    pub fn get(&self, index: i64) -> Option<&RestoreTarget> {
        usize::try_from(index).ok().and_then(|i| self.targets.get(i))
    }

    pub fn views(&self) -> Vec<RestoreTargetView> {
        self.targets
            .iter()
            .enumerate()
            .map(|(index, t)| RestoreTargetView {
                index,
                name: t.name.clone(),
                host: t.connection.host.clone(),
                port: t.connection.port,
                user: t.connection.user.clone(),
                description: t.description.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REGISTRY: &str = r#"{
        "databases": [
            {"name": "Staging", "host": "10.0.0.2", "port": 3306, "user": "root", "password": "pw1", "description": "staging box"},
            {"name": "QA", "host": "qa.internal", "port": "9090", "user": "qa", "password": "pw2"}
        ]
    }"#;

    #[tokio::test]
    async fn test_load_registry() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("restore_targets.json");
        std::fs::write(&path, REGISTRY)?;

        let registry = TargetRegistry::load(&path).await?;
        assert_eq!(registry.len(), 2);
        let qa = registry.get(1).unwrap();
        assert_eq!(qa.connection.port, 9090);
        assert_eq!(qa.description, "");
        assert!(registry.get(2).is_none());
        assert!(registry.get(-1).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_registry() {
        let dir = TempDir::new().unwrap();
        let err = TargetRegistry::load(&dir.path().join("nope.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Missing(_)));
    }

    #[test]
    fn test_views_hide_passwords() {
        let file: RegistryFile = serde_json::from_str(REGISTRY).unwrap();
        let registry = TargetRegistry::new(file.databases);
        let json = serde_json::to_string(&registry.views()).unwrap();
        assert!(!json.contains("pw1"));
        assert!(!json.contains("password"));
        assert!(json.contains("\"index\":1"));
    }
}
