//! Persistence backends
//!
//! Key-value durability used by the archive and the evolution history. Callers
//! treat every failure here as recoverable.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::PersistenceError;

/// Trait for key-value persistence backends
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Load the value stored under `key`, if any
    async fn load(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    /// Store `value` under `key`, replacing any previous value
    async fn save(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
}

/// In-memory backend
///
/// Uses DashMap for concurrent access. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    values: DashMap<String, String>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryBackend {
    async fn load(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.values.get(key).map(|v| v.clone()))
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// File backend: one `<key>.json` file per key under a root directory
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a file path. Keys may use `/` for grouping but never
    /// escape the root.
    fn path_for(&self, key: &str) -> Result<PathBuf, PersistenceError> {
        if key.is_empty()
            || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
            || key.contains('\\')
        {
            return Err(PersistenceError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

#[async_trait]
impl PersistenceBackend for FileBackend {
    async fn load(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so readers never observe a torn file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(key, bytes = value.len(), "Persisted value");
        Ok(())
    }
}
