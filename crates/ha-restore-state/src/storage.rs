//! Versioned JSON documents under `<config>/.storage/`

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported version for {key}: expected {expected}, found {found}")]
    VersionMismatch {
        key: String,
        expected: u32,
        found: u32,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// On-disk envelope
///
/// ```json
/// { "version": 1, "key": "core.restore_state", "data": [ ... ] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    pub version: u32,
    pub key: String,
    pub data: T,
}

/// Handle on the `.storage/` directory of a config dir
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: config_dir.as_ref().join(".storage"),
        }
    }

    pub fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    /// Load a document, `None` when it was never written
    pub async fn load<T: DeserializeOwned>(
        &self,
        key: &str,
        expected_version: u32,
    ) -> StorageResult<Option<T>> {
        let path = self.file_path(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key, "Storage file not found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let file: StorageFile<T> = serde_json::from_str(&content)?;
        if file.version != expected_version {
            return Err(StorageError::VersionMismatch {
                key: key.to_string(),
                expected: expected_version,
                found: file.version,
            });
        }

        debug!(key, version = file.version, "Loaded storage file");
        Ok(Some(file.data))
    }

    /// Write a document through a temp file and rename
    pub async fn save<T: Serialize>(&self, key: &str, version: u32, data: T) -> StorageResult<()> {
        fs::create_dir_all(&self.storage_dir).await?;

        let file = StorageFile {
            version,
            key: key.to_string(),
            data,
        };
        let path = self.file_path(key);
        let temp_path = self.file_path(&format!("{key}.tmp"));

        fs::write(&temp_path, serde_json::to_string_pretty(&file)?).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(key, version, "Saved storage file");
        Ok(())
    }
}
