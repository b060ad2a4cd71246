//! Typed state store with per-key read-modify-write

use super::{MemoryBackend, StateBackend, StateKey};
use crate::error::StateError;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// State store shared by all cycles
///
/// Every key has its own async mutex; `update` holds it across the whole
/// read-modify-write, so two writers of the same key never interleave.
/// Readers go through `load` and see the last committed value.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn StateBackend>,
    locks: Arc<HashMap<StateKey, Mutex<()>>>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        let locks = StateKey::ALL
            .iter()
            .map(|key| (*key, Mutex::new(())))
            .collect();
        Self {
            backend,
            locks: Arc::new(locks),
        }
    }

    /// In-memory store, used by tests and simulations
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Load a value, substituting the default when missing or malformed
    pub async fn load<T>(&self, key: StateKey) -> Result<T, StateError>
    where
        T: DeserializeOwned + Default,
    {
        let raw = self.backend.read(key).await?;
        Ok(decode_or_default(key, raw))
    }

    /// Overwrite a value
    pub async fn store<T: Serialize>(&self, key: StateKey, value: &T) -> Result<(), StateError> {
        let _guard = self.lock(key).lock().await;
        self.write(key, value).await
    }

    /// Atomically read, modify and write back the value for `key`
    pub async fn update<T, R, F>(&self, key: StateKey, f: F) -> Result<R, StateError>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> R,
    {
        let _guard = self.lock(key).lock().await;
        let raw = self.backend.read(key).await?;
        let mut value: T = decode_or_default(key, raw);
        let result = f(&mut value);
        self.write(key, &value).await?;
        Ok(result)
    }

    fn lock(&self, key: StateKey) -> &Mutex<()> {
        // Every key is inserted in `new`
        &self.locks[&key]
    }

    async fn write<T: Serialize>(&self, key: StateKey, value: &T) -> Result<(), StateError> {
        let bytes = serde_json::to_vec(value).map_err(|source| StateError::Encode {
            key: key.as_str(),
            source,
        })?;
        self.backend.write(key, &bytes).await
    }
}

fn decode_or_default<T: DeserializeOwned + Default>(key: StateKey, raw: Option<Vec<u8>>) -> T {
    match raw {
        None => T::default(),
        Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(key = key.as_str(), error = %e, "Malformed state, using defaults");
            T::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActiveModel, ModelKind};
    use crate::state::FileBackend;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_missing_returns_default() {
        let store = StateStore::in_memory();
        let active: ActiveModel = store.load(StateKey::ActiveModel).await.unwrap();
        assert_eq!(active, ActiveModel::default());
    }

    #[tokio::test]
    async fn test_malformed_state_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("active_model.json"), b"garbage").unwrap();

        let store = StateStore::new(Arc::new(FileBackend::new(temp_dir.path()).unwrap()));
        let active: ActiveModel = store.load(StateKey::ActiveModel).await.unwrap();
        assert_eq!(active, ActiveModel::default());
    }

    #[tokio::test]
    async fn test_update_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = StateStore::new(Arc::new(FileBackend::new(temp_dir.path()).unwrap()));
            store
                .update(StateKey::ActiveModel, |active: &mut ActiveModel| {
                    active.family = ModelKind::Lstm;
                })
                .await
                .unwrap();
        }

        let store = StateStore::new(Arc::new(FileBackend::new(temp_dir.path()).unwrap()));
        let active: ActiveModel = store.load(StateKey::ActiveModel).await.unwrap();
        assert_eq!(active.family, ModelKind::Lstm);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let store = StateStore::in_memory();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(StateKey::Ledger, |count: &mut u64| *count += 1)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let count: u64 = store.load(StateKey::Ledger).await.unwrap();
        assert_eq!(count, 32);
    }
}
