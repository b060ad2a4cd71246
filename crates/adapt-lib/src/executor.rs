//! Decision executor
//!
//! Applies one [`Decision`] at a time. Every write is idempotent: applying
//! the same decision twice leaves the same observable state.

use crate::models::{ActiveModel, Decision, ModelKind};
use crate::observability::{AdaptMetrics, StructuredLogger};
use crate::retrain::{DispatchOutcome, RetrainDispatcher};
use crate::state::{DriftReferenceSet, StateKey, StateStore};
use crate::versions::{compute_checksum, write_file, ModelVersion, VersionStore};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Observable effect of applying a decision
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Nothing to do; state already matched the decision
    Unchanged,
    Switched { from: ModelKind, to: ModelKind },
    Installed { family: ModelKind, version_id: u64 },
    Retrain(DispatchOutcome),
}

/// The active-model pointer plus the per-family artifact slots it refers to
#[derive(Clone)]
pub struct ActiveSlot {
    store: StateStore,
    versions: Arc<VersionStore>,
    active_dir: PathBuf,
    /// Serializes slot writes per family across every clone of the slot
    install_locks: Arc<BTreeMap<ModelKind, Mutex<()>>>,
    metrics: AdaptMetrics,
}

impl ActiveSlot {
    pub fn new(store: StateStore, versions: Arc<VersionStore>, active_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            versions,
            active_dir: active_dir.into(),
            install_locks: Arc::new(
                ModelKind::ALL
                    .iter()
                    .map(|family| (*family, Mutex::new(())))
                    .collect(),
            ),
            metrics: AdaptMetrics::new(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    pub fn active_dir(&self) -> &Path {
        &self.active_dir
    }

    /// Path of the artifact the inference service loads for `family`
    pub fn artifact_path(&self, family: ModelKind) -> PathBuf {
        self.active_dir.join(family.artifact_file_name())
    }

    pub async fn current(&self) -> Result<ActiveModel> {
        Ok(self.store.load(StateKey::ActiveModel).await?)
    }

    /// Point the service at `family`; returns the previous family if it changed
    pub async fn switch_to(&self, family: ModelKind) -> Result<Option<ModelKind>> {
        let changed = self
            .store
            .update(StateKey::ActiveModel, |active: &mut ActiveModel| {
                if active.family == family {
                    return None;
                }
                let previous = active.family;
                active.family = family;
                active.version_id = active.installed.get(&family).copied();
                active.updated_at = chrono::Utc::now().timestamp();
                Some((previous, active.version_id))
            })
            .await?;

        Ok(changed.map(|(previous, version_id)| {
            self.metrics.set_active_model(family, version_id);
            previous
        }))
    }

    /// Install a stored version into its family's slot.
    ///
    /// Installs into the same family run one at a time, from the slot check
    /// through the pointer update. With `activate` the family also becomes the active one; otherwise the
    /// pointer only follows when the family is already active. Returns the
    /// installed version, or `None` when the slot already held it.
    pub async fn install(
        &self,
        family: ModelKind,
        version_id: u64,
        activate: bool,
    ) -> Result<Option<ModelVersion>> {
        // Every family is inserted in `new`
        let _guard = self.install_locks[&family].lock().await;

        let version = self
            .versions
            .get(family, version_id)
            .await
            .with_context(|| format!("Failed to resolve {family} version {version_id}"))?;

        let active = self.current().await?;
        let slot_path = self.artifact_path(family);
        let recorded = if activate {
            active.is_serving(family, version_id)
        } else {
            active.installed.get(&family) == Some(&version_id)
        };
        if recorded && slot_matches(&slot_path, &version.checksum).await {
            debug!(family = %family, version_id, "Version already installed");
            return Ok(None);
        }

        let artifact = self
            .versions
            .read_artifact(&version)
            .await
            .with_context(|| format!("Refusing to install {family} version {version_id}"))?;

        tokio::fs::create_dir_all(&self.active_dir)
            .await
            .with_context(|| format!("Failed to create active slot directory {:?}", self.active_dir))?;
        write_file(&slot_path, &artifact)
            .await
            .context("Failed to write active artifact")?;

        if !slot_matches(&slot_path, &version.checksum).await {
            anyhow::bail!("Active artifact {slot_path:?} does not match checksum after install");
        }

        let active = self
            .store
            .update(StateKey::ActiveModel, |active: &mut ActiveModel| {
                if activate {
                    active.family = family;
                }
                if active.family == family {
                    active.version_id = Some(version_id);
                }
                active.installed.insert(family, version_id);
                active.updated_at = chrono::Utc::now().timestamp();
                active.clone()
            })
            .await?;

        self.metrics.set_active_model(active.family, active.version_id);
        Ok(Some(version))
    }
}

async fn slot_matches(path: &Path, checksum: &str) -> bool {
    match tokio::fs::read(path).await {
        Ok(bytes) => compute_checksum(&bytes) == checksum,
        Err(_) => false,
    }
}

/// Applies decisions to the active slot and hands retraining off
pub struct Executor {
    slot: ActiveSlot,
    retrain: Option<Arc<RetrainDispatcher>>,
    logger: StructuredLogger,
}

impl Executor {
    pub fn new(slot: ActiveSlot, retrain: Option<Arc<RetrainDispatcher>>, logger: StructuredLogger) -> Self {
        Self {
            slot,
            retrain,
            logger,
        }
    }

    pub fn slot(&self) -> &ActiveSlot {
        &self.slot
    }

    /// Apply exactly one decision.
    ///
    /// `Retrain` never waits for training: the dispatcher either spawns the
    /// job or queues it for the retrain worker.
    pub async fn apply(&self, decision: &Decision) -> Result<ExecutionOutcome> {
        match *decision {
            Decision::None => Ok(ExecutionOutcome::Unchanged),
            Decision::SwitchTo { model } => match self.slot.switch_to(model).await? {
                Some(from) => Ok(ExecutionOutcome::Switched { from, to: model }),
                None => Ok(ExecutionOutcome::Unchanged),
            },
            Decision::ReplaceWith { family, version_id } => {
                match self.slot.install(family, version_id, true).await? {
                    Some(version) => {
                        self.logger
                            .log_version_installed(family, version_id, &version.checksum);
                        Ok(ExecutionOutcome::Installed { family, version_id })
                    }
                    None => Ok(ExecutionOutcome::Unchanged),
                }
            }
            Decision::Retrain => {
                let Some(dispatcher) = &self.retrain else {
                    warn!("Retraining requested but no retrain dispatcher is configured");
                    return Ok(ExecutionOutcome::Unchanged);
                };

                let active = self.slot.current().await?;
                let reference: DriftReferenceSet =
                    self.slot.store().load(StateKey::DriftReference).await?;
                let outcome = dispatcher.request(active.family, reference.values).await;
                Ok(ExecutionOutcome::Retrain(outcome))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::RetentionPolicy;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        executor: Executor,
        versions: Arc<VersionStore>,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let versions = Arc::new(
            VersionStore::new(temp_dir.path().join("versions"), RetentionPolicy::KeepAll).unwrap(),
        );
        let slot = ActiveSlot::new(
            StateStore::in_memory(),
            versions.clone(),
            temp_dir.path().join("active"),
        );
        Fixture {
            executor: Executor::new(slot, None, StructuredLogger::new("test")),
            versions,
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test]
    async fn test_switch_is_idempotent() {
        let f = fixture();
        let decision = Decision::SwitchTo {
            model: ModelKind::Lstm,
        };

        let first = f.executor.apply(&decision).await.unwrap();
        assert_eq!(
            first,
            ExecutionOutcome::Switched {
                from: ModelKind::Linear,
                to: ModelKind::Lstm
            }
        );
        let state_after_first = f.executor.slot().current().await.unwrap();

        let second = f.executor.apply(&decision).await.unwrap();
        assert_eq!(second, ExecutionOutcome::Unchanged);
        assert_eq!(f.executor.slot().current().await.unwrap(), state_after_first);
    }

    #[tokio::test]
    async fn test_replace_installs_artifact_once() {
        let f = fixture();
        let version = f
            .versions
            .register(ModelKind::Svm, b"svm weights", &[1.0, 2.0])
            .await
            .unwrap();
        let decision = Decision::ReplaceWith {
            family: ModelKind::Svm,
            version_id: version.version_id,
        };

        let first = f.executor.apply(&decision).await.unwrap();
        assert_eq!(
            first,
            ExecutionOutcome::Installed {
                family: ModelKind::Svm,
                version_id: 1
            }
        );

        let slot_path = f.executor.slot().artifact_path(ModelKind::Svm);
        assert_eq!(std::fs::read(&slot_path).unwrap(), b"svm weights");

        let active = f.executor.slot().current().await.unwrap();
        assert!(active.is_serving(ModelKind::Svm, 1));
        assert_eq!(active.installed.get(&ModelKind::Svm), Some(&1));

        let second = f.executor.apply(&decision).await.unwrap();
        assert_eq!(second, ExecutionOutcome::Unchanged);
        assert_eq!(f.executor.slot().current().await.unwrap(), active);
    }

    #[tokio::test]
    async fn test_replace_repairs_tampered_slot() {
        let f = fixture();
        f.versions
            .register(ModelKind::Linear, b"linear", &[1.0])
            .await
            .unwrap();
        let decision = Decision::ReplaceWith {
            family: ModelKind::Linear,
            version_id: 1,
        };
        f.executor.apply(&decision).await.unwrap();

        let slot_path = f.executor.slot().artifact_path(ModelKind::Linear);
        std::fs::write(&slot_path, b"corrupted").unwrap();

        let outcome = f.executor.apply(&decision).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Installed { .. }));
        assert_eq!(std::fs::read(&slot_path).unwrap(), b"linear");
    }

    #[tokio::test]
    async fn test_switch_restores_installed_version() {
        let f = fixture();
        f.versions.register(ModelKind::Svm, b"svm", &[1.0]).await.unwrap();
        f.executor
            .apply(&Decision::ReplaceWith {
                family: ModelKind::Svm,
                version_id: 1,
            })
            .await
            .unwrap();

        f.executor
            .apply(&Decision::SwitchTo {
                model: ModelKind::Linear,
            })
            .await
            .unwrap();
        assert_eq!(f.executor.slot().current().await.unwrap().version_id, None);

        f.executor
            .apply(&Decision::SwitchTo {
                model: ModelKind::Svm,
            })
            .await
            .unwrap();
        assert_eq!(
            f.executor.slot().current().await.unwrap().version_id,
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_replace_unknown_version_fails() {
        let f = fixture();
        let result = f
            .executor
            .apply(&Decision::ReplaceWith {
                family: ModelKind::Lstm,
                version_id: 4,
            })
            .await;
        assert!(result.is_err());
        assert_eq!(
            f.executor.slot().current().await.unwrap(),
            ActiveModel::default()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_installs_keep_slot_consistent() {
        let f = fixture();
        let large = vec![7u8; 1 << 20];
        let first = f
            .versions
            .register(ModelKind::Svm, &large, &[1.0])
            .await
            .unwrap();
        let second = f
            .versions
            .register(ModelKind::Svm, b"small svm", &[2.0])
            .await
            .unwrap();
        let slot = f.executor.slot().clone();
        let slot_path = slot.artifact_path(ModelKind::Svm);

        for round in 0..10 {
            let (a, b) = if round % 2 == 0 {
                (first.version_id, second.version_id)
            } else {
                (second.version_id, first.version_id)
            };
            let left = slot.clone();
            let right = slot.clone();
            let (x, y) = tokio::join!(
                tokio::spawn(async move { left.install(ModelKind::Svm, a, true).await }),
                tokio::spawn(async move { right.install(ModelKind::Svm, b, false).await }),
            );
            x.unwrap().unwrap();
            y.unwrap().unwrap();

            let active = slot.current().await.unwrap();
            let installed = active.installed[&ModelKind::Svm];
            let expected = if installed == first.version_id {
                &first.checksum
            } else {
                &second.checksum
            };
            let bytes = std::fs::read(&slot_path).unwrap();
            assert_eq!(&compute_checksum(&bytes), expected, "round {round}");
        }
    }

    #[tokio::test]
    async fn test_retrain_without_dispatcher_is_noop() {
        let f = fixture();
        let outcome = f.executor.apply(&Decision::Retrain).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Unchanged);
    }
}
