//! On-disk credential vault.
//!
//! One JSON object keyed by provider name. Every `set` flushes the whole
//! document through a temp file so readers never observe a partial write.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::error::{IptvError, Result};

pub struct CredentialVault {
    path: PathBuf,
    document: Map<String, Value>,
}

impl CredentialVault {
    /// Open the vault, creating the parent directory. A malformed file is
    /// treated as empty and left in place until the next write replaces it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| IptvError::Storage(format!("{}: {}", parent.display(), e)))?;
        }

        let document = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    warn!("Session file {} is not a JSON object, ignoring it", path.display());
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(IptvError::Storage(format!("{}: {}", path.display(), e))),
        };

        info!(session_file = %path.display(), keys = document.len(), msg = "Credential vault opened");

        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.document.get(key)
    }

    /// Replace one key and flush the document
    pub async fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.document.insert(key.to_string(), value);
        self.flush().await
    }

    async fn flush(&self) -> Result<()> {
        let tmp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&self.document)
            .map_err(|e| IptvError::Storage(e.to_string()))?;

        let storage_err = |e: std::io::Error| IptvError::Storage(format!("{}: {}", self.path.display(), e));

        let mut file = File::create(&tmp_path).await.map_err(storage_err)?;
        file.write_all(content.as_bytes()).await.map_err(storage_err)?;
        file.sync_all().await.map_err(storage_err)?;

        fs::rename(&tmp_path, &self.path).await.map_err(storage_err)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_set_then_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let mut vault = CredentialVault::open(&path).await.unwrap();
        assert!(vault.get("O2TV_CZ").is_none());
        vault.set("O2TV_CZ", json!({ "DeviceId": "X" })).await.unwrap();

        let reopened = CredentialVault::open(&path).await.unwrap();
        assert_eq!(reopened.get("O2TV_CZ").unwrap()["DeviceId"], "X");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_set_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut vault = CredentialVault::open(&path).await.unwrap();
        vault.set("ONEPLAY", json!({ "Token": "first", "Expiry": 1 })).await.unwrap();
        vault.set("ONEPLAY", json!({ "Token": "second", "Expiry": 2 })).await.unwrap();

        let reopened = CredentialVault::open(&path).await.unwrap();
        assert_eq!(reopened.get("ONEPLAY").unwrap()["Token"], "second");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_set_keeps_other_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut vault = CredentialVault::open(&path).await.unwrap();
        vault.set("ONEPLAY", json!({ "Token": "a", "Expiry": 1 })).await.unwrap();
        vault.set("O2TV_SK", json!({ "DeviceId": "Y" })).await.unwrap();

        let reopened = CredentialVault::open(&path).await.unwrap();
        assert_eq!(reopened.get("ONEPLAY").unwrap()["Token"], "a");
        assert_eq!(reopened.get("O2TV_SK").unwrap()["DeviceId"], "Y");
    }

    #[tokio::test]
    async fn test_malformed_file_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{ not json").unwrap();

        let vault = CredentialVault::open(&path).await.unwrap();
        assert!(vault.get("O2TV_CZ").is_none());
    }
}
