//! Storage backends for controller state

use super::StateKey;
use crate::error::StateError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Raw byte storage addressed by state key
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Read the stored bytes for a key, `None` if never written
    async fn read(&self, key: StateKey) -> Result<Option<Vec<u8>>, StateError>;

    /// Replace the stored bytes for a key
    async fn write(&self, key: StateKey, bytes: &[u8]) -> Result<(), StateError>;
}

/// One JSON file per key, replaced atomically via temp file + rename
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StateError::Io {
            key: "state_dir",
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: StateKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }
}

#[async_trait]
impl StateBackend for FileBackend {
    async fn read(&self, key: StateKey) -> Result<Option<Vec<u8>>, StateError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StateError::Io {
                key: key.as_str(),
                source,
            }),
        }
    }

    async fn write(&self, key: StateKey, bytes: &[u8]) -> Result<(), StateError> {
        let io_err = |source| StateError::Io {
            key: key.as_str(),
            source,
        };

        let path = self.path_for(key);
        let temp_path = path.with_extension("tmp");

        let mut file = tokio::fs::File::create(&temp_path).await.map_err(io_err)?;
        file.write_all(bytes).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        tokio::fs::rename(&temp_path, &path).await.map_err(io_err)?;
        Ok(())
    }
}

/// Process-local backend for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<StateKey, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn read(&self, key: StateKey) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.entries.get(&key).map(|entry| entry.value().clone()))
    }

    async fn write(&self, key: StateKey, bytes: &[u8]) -> Result<(), StateError> {
        self.entries.insert(key, bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_backend_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(temp_dir.path()).unwrap();

        assert!(backend.read(StateKey::Ledger).await.unwrap().is_none());

        backend.write(StateKey::Ledger, b"{\"debt\":1.0}").await.unwrap();
        let data = backend.read(StateKey::Ledger).await.unwrap().unwrap();
        assert_eq!(data, b"{\"debt\":1.0}");

        // No temp file left behind
        assert!(!temp_dir.path().join("ledger.tmp").exists());
        assert!(temp_dir.path().join("ledger.json").exists());
    }

    #[tokio::test]
    async fn test_memory_backend_overwrites() {
        let backend = MemoryBackend::new();
        backend.write(StateKey::ActiveModel, b"a").await.unwrap();
        backend.write(StateKey::ActiveModel, b"b").await.unwrap();
        assert_eq!(
            backend.read(StateKey::ActiveModel).await.unwrap(),
            Some(b"b".to_vec())
        );
    }
}
