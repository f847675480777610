//! Storage adapters - where store blobs are read from and written to

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use taxdesk_core::{storage_error, ErrorContext, TaxdeskError, TaxdeskResult};
use tracing::{debug, info};

/// Read/write a named serialized blob
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Read the blob stored under `key`, `None` if absent
    async fn read(&self, key: &str) -> TaxdeskResult<Option<String>>;

    /// Replace the blob stored under `key`
    async fn write(&self, key: &str, value: &str) -> TaxdeskResult<()>;

    /// Remove the blob stored under `key`; absent keys are not an error
    async fn remove(&self, key: &str) -> TaxdeskResult<()>;
}

/// Process-local storage.
///
/// Clones share the same map, so a store rebuilt on a clone observes what the
/// previous instance wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry before any store reads it
    pub fn with_entry(self, key: &str, value: &str) -> Self {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Raw blob currently stored under `key`
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn read(&self, key: &str) -> TaxdeskResult<Option<String>> {
        Ok(self.get(key))
    }

    async fn write(&self, key: &str, value: &str) -> TaxdeskResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> TaxdeskResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    storage_dir: PathBuf,
}

impl FileStorage {
    /// Create a file storage, creating the directory if needed
    pub fn new<P: AsRef<Path>>(storage_dir: P) -> TaxdeskResult<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();

        std::fs::create_dir_all(&storage_dir).map_err(|e| TaxdeskError::Storage {
            message: format!(
                "Failed to create state directory {}: {}",
                storage_dir.display(),
                e
            ),
            source: Some(Box::new(e)),
            context: ErrorContext::new("file_storage")
                .with_operation("create_dir")
                .with_suggestion("Check storage.state_dir in the configuration"),
        })?;

        info!("State storage initialized at: {}", storage_dir.display());

        Ok(Self { storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn path_for(&self, key: &str) -> TaxdeskResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(storage_error!(
                format!("Invalid storage key: {:?}", key),
                "file_storage"
            ));
        }
        Ok(self.storage_dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl StorageAdapter for FileStorage {
    async fn read(&self, key: &str) -> TaxdeskResult<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error!(
                format!("Failed to read {}: {}", path.display(), e),
                "file_storage",
                e
            )),
        }
    }

    async fn write(&self, key: &str, value: &str) -> TaxdeskResult<()> {
        let path = self.path_for(key)?;
        let tmp_path = path.with_extension("json.tmp");

        tokio::fs::write(&tmp_path, value).await.map_err(|e| {
            storage_error!(
                format!("Failed to write {}: {}", tmp_path.display(), e),
                "file_storage",
                e
            )
        })?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            storage_error!(
                format!("Failed to replace {}: {}", path.display(), e),
                "file_storage",
                e
            )
        })?;

        debug!("Saved {} to {}", key, path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> TaxdeskResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error!(
                format!("Failed to remove {}: {}", path.display(), e),
                "file_storage",
                e
            )),
        }
    }
}
