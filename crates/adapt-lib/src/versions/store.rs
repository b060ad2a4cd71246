//! Filesystem model version registry
//!
//! Layout: `<root>/<family>/version_<n>/{manifest.json, data.json, <artifact>}`.
//! A version directory is assembled under a temporary name and renamed into
//! place, so readers never observe a half-written version.

use crate::error::VersionStoreError;
use crate::models::ModelKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const MANIFEST_FILE: &str = "manifest.json";
const DATA_FILE: &str = "data.json";
const VERSION_PREFIX: &str = "version_";

/// Default number of versions kept per family
pub const DEFAULT_VERSIONS_TO_KEEP: usize = 16;

/// How many versions of a family survive a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    KeepAll,
    /// Keep the `n` newest versions (at least one)
    KeepLatest(usize),
}

impl RetentionPolicy {
    /// `0` keeps everything
    pub fn from_versions_to_keep(count: usize) -> Self {
        if count == 0 {
            RetentionPolicy::KeepAll
        } else {
            RetentionPolicy::KeepLatest(count)
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::KeepLatest(DEFAULT_VERSIONS_TO_KEEP)
    }
}

/// Immutable metadata of one trained model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub family: ModelKind,
    pub version_id: u64,
    /// SHA-256 of the artifact bytes, hex encoded
    pub checksum: String,
    pub size_bytes: u64,
    pub training_samples: usize,
    pub created_at: i64,
    /// Version directory; derived from the registry root on load
    #[serde(skip)]
    pub dir: PathBuf,
}

impl ModelVersion {
    pub fn artifact_path(&self) -> PathBuf {
        self.dir.join(self.family.artifact_file_name())
    }

    pub fn data_path(&self) -> PathBuf {
        self.dir.join(DATA_FILE)
    }
}

/// Registry of trained versions per family
pub struct VersionStore {
    root: PathBuf,
    retention: RetentionPolicy,
    /// Versions per family, ascending by id; filled lazily from disk
    cache: RwLock<HashMap<ModelKind, Vec<ModelVersion>>>,
    register_lock: Mutex<()>,
}

impl VersionStore {
    pub fn new(root: impl Into<PathBuf>, retention: RetentionPolicy) -> Result<Self, VersionStoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| VersionStoreError::Io {
            path: root.clone(),
            source,
        })?;

        Ok(Self {
            root,
            retention,
            cache: RwLock::new(HashMap::new()),
            register_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    fn family_dir(&self, family: ModelKind) -> PathBuf {
        self.root.join(family.as_str())
    }

    /// All versions of a family, oldest first
    pub async fn list(&self, family: ModelKind) -> Result<Vec<ModelVersion>, VersionStoreError> {
        if let Some(versions) = self.cache.read().await.get(&family) {
            return Ok(versions.clone());
        }

        let versions = self.scan(family).await?;
        self.cache.write().await.insert(family, versions.clone());
        Ok(versions)
    }

    pub async fn get(&self, family: ModelKind, version_id: u64) -> Result<ModelVersion, VersionStoreError> {
        self.list(family)
            .await?
            .into_iter()
            .find(|v| v.version_id == version_id)
            .ok_or(VersionStoreError::NotFound { family, version_id })
    }

    pub async fn latest(&self, family: ModelKind) -> Result<Option<ModelVersion>, VersionStoreError> {
        Ok(self.list(family).await?.pop())
    }

    /// Training snapshot stored with a version
    pub async fn training_data(&self, version: &ModelVersion) -> Result<Vec<f64>, VersionStoreError> {
        let path = version.data_path();
        let data = tokio::fs::read(&path)
            .await
            .map_err(|source| VersionStoreError::Io {
                path: path.clone(),
                source,
            })?;
        serde_json::from_slice(&data).map_err(|source| VersionStoreError::Metadata { path, source })
    }

    /// Read a version's artifact and verify it against the recorded checksum
    pub async fn read_artifact(&self, version: &ModelVersion) -> Result<Vec<u8>, VersionStoreError> {
        let path = version.artifact_path();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| VersionStoreError::Io {
                path: path.clone(),
                source,
            })?;

        let actual = compute_checksum(&bytes);
        if actual != version.checksum {
            return Err(VersionStoreError::ChecksumMismatch {
                path,
                expected: version.checksum.clone(),
                actual,
            });
        }
        Ok(bytes)
    }

    /// Persist a new version and apply the retention policy.
    ///
    /// The id is one past the highest id ever registered for the family, so
    /// ids keep increasing after older versions are pruned.
    pub async fn register(
        &self,
        family: ModelKind,
        artifact: &[u8],
        training_data: &[f64],
    ) -> Result<ModelVersion, VersionStoreError> {
        let _guard = self.register_lock.lock().await;

        let mut versions = self.list(family).await?;
        let highest = versions
            .last()
            .map(|v| v.version_id)
            .max(self.highest_dir_id(family).await)
            .unwrap_or(0);
        let version_id = highest + 1;

        let family_dir = self.family_dir(family);
        let final_dir = family_dir.join(format!("{VERSION_PREFIX}{version_id}"));
        let staging_dir = family_dir.join(format!(".{VERSION_PREFIX}{version_id}.tmp"));

        let version = ModelVersion {
            family,
            version_id,
            checksum: compute_checksum(artifact),
            size_bytes: artifact.len() as u64,
            training_samples: training_data.len(),
            created_at: chrono::Utc::now().timestamp(),
            dir: final_dir.clone(),
        };

        if tokio::fs::try_exists(&staging_dir).await.unwrap_or(false) {
            remove_dir(&staging_dir).await;
        }
        create_dir(&staging_dir).await?;

        write_file(&staging_dir.join(family.artifact_file_name()), artifact).await?;
        write_json(&staging_dir.join(DATA_FILE), &training_data).await?;
        write_json(&staging_dir.join(MANIFEST_FILE), &version).await?;

        tokio::fs::rename(&staging_dir, &final_dir)
            .await
            .map_err(|source| VersionStoreError::Io {
                path: final_dir.clone(),
                source,
            })?;

        info!(
            family = %family,
            version_id,
            checksum = %version.checksum,
            samples = version.training_samples,
            "Model version registered"
        );

        versions.push(version.clone());
        self.prune(&mut versions).await;
        self.cache.write().await.insert(family, versions);

        Ok(version)
    }

    /// Drop the oldest versions beyond the retention limit
    async fn prune(&self, versions: &mut Vec<ModelVersion>) {
        let RetentionPolicy::KeepLatest(keep) = self.retention else {
            return;
        };
        let keep = keep.max(1);

        while versions.len() > keep {
            let removed = versions.remove(0);
            remove_dir(&removed.dir).await;
            debug!(
                family = %removed.family,
                version_id = removed.version_id,
                "Pruned model version"
            );
        }
    }

    /// Highest `version_<n>` directory name, including unreadable versions
    async fn highest_dir_id(&self, family: ModelKind) -> Option<u64> {
        let mut entries = tokio::fs::read_dir(self.family_dir(family)).await.ok()?;
        let mut highest = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(id) = parse_version_dir(&entry.file_name()) {
                highest = highest.max(Some(id));
            }
        }
        highest
    }

    async fn scan(&self, family: ModelKind) -> Result<Vec<ModelVersion>, VersionStoreError> {
        let family_dir = self.family_dir(family);
        let mut entries = match tokio::fs::read_dir(&family_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(VersionStoreError::Io {
                    path: family_dir,
                    source,
                })
            }
        };

        let io_err = |source| VersionStoreError::Io {
            path: family_dir.clone(),
            source,
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let Some(id) = parse_version_dir(&entry.file_name()) else {
                continue;
            };

            match load_manifest(&entry.path()).await {
                Ok(mut version) => {
                    version.dir = entry.path();
                    version.version_id = id;
                    version.family = family;
                    versions.push(version);
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Skipping unreadable model version");
                }
            }
        }

        versions.sort_by_key(|v| v.version_id);
        Ok(versions)
    }
}

fn parse_version_dir(name: &std::ffi::OsStr) -> Option<u64> {
    name.to_str()?.strip_prefix(VERSION_PREFIX)?.parse().ok()
}

/// SHA-256 of `data`, hex encoded
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

async fn load_manifest(dir: &Path) -> Result<ModelVersion, VersionStoreError> {
    let path = dir.join(MANIFEST_FILE);
    let data = tokio::fs::read(&path)
        .await
        .map_err(|source| VersionStoreError::Io {
            path: path.clone(),
            source,
        })?;
    serde_json::from_slice(&data).map_err(|source| VersionStoreError::Metadata { path, source })
}

async fn create_dir(path: &Path) -> Result<(), VersionStoreError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| VersionStoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn remove_dir(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove model version directory");
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), VersionStoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| VersionStoreError::Metadata {
        path: path.to_path_buf(),
        source,
    })?;
    write_file(path, &bytes).await
}

/// Write to a sibling temp file, sync, then rename over `path`
pub(crate) async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), VersionStoreError> {
    let io_err = |source| VersionStoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let temp_path = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&temp_path).await.map_err(io_err)?;
    file.write_all(bytes).await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    drop(file);

    tokio::fs::rename(&temp_path, path).await.map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_compute_checksum() {
        let checksum = compute_checksum(b"model weights");
        assert_eq!(checksum.len(), 64);
        assert_eq!(checksum, compute_checksum(b"model weights"));
        assert_ne!(checksum, compute_checksum(b"other weights"));
    }

    #[tokio::test]
    async fn test_register_assigns_increasing_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = VersionStore::new(temp_dir.path(), RetentionPolicy::KeepAll).unwrap();

        assert!(store.list(ModelKind::Svm).await.unwrap().is_empty());

        let first = store.register(ModelKind::Svm, b"v1", &[1.0, 2.0]).await.unwrap();
        let second = store.register(ModelKind::Svm, b"v2", &[3.0]).await.unwrap();
        let other = store.register(ModelKind::Lstm, b"lstm", &[4.0]).await.unwrap();

        assert_eq!(first.version_id, 1);
        assert_eq!(second.version_id, 2);
        assert_eq!(other.version_id, 1);

        assert!(temp_dir.path().join("svm/version_2/svm_model.pkl").exists());
        assert!(temp_dir.path().join("lstm/version_1/lstm_model.pth").exists());
        assert!(temp_dir.path().join("svm/version_1/manifest.json").exists());

        assert_eq!(store.training_data(&first).await.unwrap(), vec![1.0, 2.0]);
        assert_eq!(store.read_artifact(&second).await.unwrap(), b"v2".to_vec());
    }

    #[tokio::test]
    async fn test_versions_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = VersionStore::new(temp_dir.path(), RetentionPolicy::KeepAll).unwrap();
            store.register(ModelKind::Linear, b"a", &[1.0]).await.unwrap();
            store.register(ModelKind::Linear, b"b", &[2.0]).await.unwrap();
        }

        let reopened = VersionStore::new(temp_dir.path(), RetentionPolicy::KeepAll).unwrap();
        let versions = reopened.list(ModelKind::Linear).await.unwrap();
        assert_eq!(
            versions.iter().map(|v| v.version_id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(versions[1].dir, temp_dir.path().join("linear/version_2"));

        let third = reopened.register(ModelKind::Linear, b"c", &[3.0]).await.unwrap();
        assert_eq!(third.version_id, 3);
    }

    #[tokio::test]
    async fn test_retention_prunes_oldest_and_keeps_ids_increasing() {
        let temp_dir = TempDir::new().unwrap();
        let store = VersionStore::new(temp_dir.path(), RetentionPolicy::KeepLatest(2)).unwrap();

        for i in 0..4u8 {
            store.register(ModelKind::Svm, &[i], &[i as f64]).await.unwrap();
        }

        let ids: Vec<u64> = store
            .list(ModelKind::Svm)
            .await
            .unwrap()
            .iter()
            .map(|v| v.version_id)
            .collect();
        assert_eq!(ids, vec![3, 4]);
        assert!(!temp_dir.path().join("svm/version_1").exists());

        let next = store.register(ModelKind::Svm, b"x", &[0.0]).await.unwrap();
        assert_eq!(next.version_id, 5);
    }

    #[tokio::test]
    async fn test_get_missing_version() {
        let temp_dir = TempDir::new().unwrap();
        let store = VersionStore::new(temp_dir.path(), RetentionPolicy::default()).unwrap();
        let err = store.get(ModelKind::Lstm, 9).await.unwrap_err();
        assert!(matches!(err, VersionStoreError::NotFound { version_id: 9, .. }));
    }

    #[tokio::test]
    async fn test_tampered_artifact_fails_checksum() {
        let temp_dir = TempDir::new().unwrap();
        let store = VersionStore::new(temp_dir.path(), RetentionPolicy::KeepAll).unwrap();
        let version = store.register(ModelKind::Linear, b"weights", &[1.0]).await.unwrap();

        std::fs::write(version.artifact_path(), b"tampered").unwrap();
        let err = store.read_artifact(&version).await.unwrap_err();
        assert!(matches!(err, VersionStoreError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_scan_ignores_foreign_entries() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("svm/notes")).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("svm/version_7")).unwrap();

        let store = VersionStore::new(temp_dir.path(), RetentionPolicy::KeepAll).unwrap();
        // version_7 has no manifest and is skipped, but its id is not reused
        assert!(store.list(ModelKind::Svm).await.unwrap().is_empty());
        let version = store.register(ModelKind::Svm, b"w", &[1.0]).await.unwrap();
        assert_eq!(version.version_id, 8);
    }
}
