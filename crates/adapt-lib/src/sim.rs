//! Synthetic inference service
//!
//! Stands in for the real service when the controller runs with
//! `simulate` enabled: it generates an autoregressive ground-truth series,
//! serves it with whichever family the active pointer names, and appends
//! one record per prediction to the log. Drift regions rescale and shift
//! the series over index ranges.

use crate::error::TrainError;
use crate::models::{ActiveModel, ModelKind, PredictionRecord};
use crate::monitor::PredictionLog;
use crate::retrain::Trainer;
use crate::state::{StateKey, StateStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// `value * scale + shift` applied to ground truth in `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftRegion {
    pub start: u64,
    /// Inclusive
    pub end: u64,
    pub scale: f64,
    pub shift: f64,
}

impl DriftRegion {
    pub fn contains(&self, index: u64) -> bool {
        (self.start..=self.end).contains(&index)
    }

    pub fn apply(&self, value: f64) -> f64 {
        value * self.scale + self.shift
    }
}

/// Static error and latency profile of one family
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictorProfile {
    /// Typical relative error of a prediction
    pub relative_error: f64,
    /// Seconds per prediction
    pub latency: f64,
}

impl PredictorProfile {
    pub fn for_family(family: ModelKind) -> Self {
        match family {
            ModelKind::Linear => Self {
                relative_error: 0.12,
                latency: 0.001,
            },
            ModelKind::Svm => Self {
                relative_error: 0.07,
                latency: 0.004,
            },
            ModelKind::Lstm => Self {
                relative_error: 0.03,
                latency: 0.02,
            },
        }
    }
}

/// Synthetic service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Predictions served per tick
    pub batch_size: usize,
    /// Milliseconds between batches
    pub interval_ms: u64,
    /// Mean of the ground-truth series
    pub base_level: f64,
    /// Autoregressive coefficient of the series
    pub persistence: f64,
    /// Amplitude of the uniform innovation noise
    pub noise: f64,
    /// Energy of one prediction by a family with coefficient 1.0
    pub base_energy: f64,
    /// Error multiplier inside a drift region for models without a
    /// retrained version in their slot
    pub drift_error_factor: f64,
    pub drift_regions: Vec<DriftRegion>,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            interval_ms: 1000,
            base_level: 100.0,
            persistence: 0.75,
            noise: 10.0,
            base_energy: 1.0,
            drift_error_factor: 4.0,
            drift_regions: Vec::new(),
            seed: None,
        }
    }
}

struct SeriesState {
    rng: StdRng,
    /// Index of the next ground-truth value; resumes from the log length
    next_index: Option<u64>,
    previous: f64,
}

/// Appends synthetic predictions served by the active family
pub struct SyntheticService {
    log: Arc<dyn PredictionLog>,
    store: StateStore,
    config: SimulationConfig,
    state: Mutex<SeriesState>,
}

impl SyntheticService {
    pub fn new(log: Arc<dyn PredictionLog>, store: StateStore, config: SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let state = SeriesState {
            rng,
            next_index: None,
            previous: config.base_level,
        };
        Self {
            log,
            store,
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Serve one batch with the currently active family
    pub async fn emit_batch(&self) -> Result<usize> {
        let active: ActiveModel = self
            .store
            .load(StateKey::ActiveModel)
            .await
            .context("Failed to read active model pointer")?;
        let profile = PredictorProfile::for_family(active.family);
        let adapted = active.version_id.is_some();

        let mut state = self.state.lock().await;
        let mut index = match state.next_index {
            Some(index) => index,
            None => self.log.len().await?,
        };

        for _ in 0..self.config.batch_size {
            let innovation = state.rng.gen_range(-1.0..=1.0) * self.config.noise;
            let value = self.config.base_level
                + self.config.persistence * (state.previous - self.config.base_level)
                + innovation;
            state.previous = value;

            let region = self
                .config
                .drift_regions
                .iter()
                .find(|region| region.contains(index));
            let truth = region.map_or(value, |region| region.apply(value));

            let mut error = profile.relative_error;
            if region.is_some() && !adapted {
                error *= self.config.drift_error_factor;
            }
            let predicted = truth * (1.0 + state.rng.gen_range(-error..=error));

            let jitter = 1.0 + state.rng.gen_range(-0.1..=0.1);
            let record = PredictionRecord {
                true_value: truth,
                predicted_value: predicted,
                inference_latency: profile.latency * jitter,
                energy_cost: self.config.base_energy * active.family.energy_coefficient() * jitter,
                model_used: active.family,
                sequence_offset: index,
            };
            self.log.append(record).await?;
            index += 1;
        }

        state.next_index = Some(index);
        debug!(
            family = %active.family,
            records = self.config.batch_size,
            next_index = index,
            "Synthetic batch served"
        );
        Ok(self.config.batch_size)
    }

    /// Serve batches until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_millis(self.config.interval_ms.max(1));
        info!(
            batch_size = self.config.batch_size,
            interval_ms = period.as_millis() as u64,
            drift_regions = self.config.drift_regions.len(),
            "Starting synthetic inference service"
        );

        let mut ticker = interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.emit_batch().await {
                        warn!(error = %format!("{e:#}"), "Synthetic batch failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down synthetic inference service");
                    break;
                }
            }
        }
    }
}

/// Summary "model" produced by [`SimulatedTrainer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedArtifact {
    pub family: ModelKind,
    pub samples: usize,
    pub mean: f64,
    pub std_dev: f64,
}

/// Trainer that fits summary statistics instead of running a job
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedTrainer;

#[async_trait]
impl Trainer for SimulatedTrainer {
    async fn train(&self, family: ModelKind, training_data: &[f64]) -> Result<Vec<u8>, TrainError> {
        if training_data.is_empty() {
            return Err(TrainError::EmptySnapshot);
        }

        let n = training_data.len() as f64;
        let mean = training_data.iter().sum::<f64>() / n;
        let variance = training_data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let artifact = SimulatedArtifact {
            family,
            samples: training_data.len(),
            mean,
            std_dev: variance.sqrt(),
        };
        serde_json::to_vec(&artifact).map_err(|e| TrainError::Io(std::io::Error::other(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MemoryPredictionLog;

    fn service(config: SimulationConfig) -> (Arc<MemoryPredictionLog>, StateStore, SyntheticService) {
        let log = Arc::new(MemoryPredictionLog::new());
        let store = StateStore::in_memory();
        let service = SyntheticService::new(log.clone(), store.clone(), config);
        (log, store, service)
    }

    #[tokio::test]
    async fn test_batch_is_served_by_active_family() {
        let (log, store, service) = service(SimulationConfig {
            batch_size: 20,
            seed: Some(7),
            ..Default::default()
        });
        let active = ActiveModel {
            family: ModelKind::Lstm,
            ..Default::default()
        };
        store.store(StateKey::ActiveModel, &active).await.unwrap();

        assert_eq!(service.emit_batch().await.unwrap(), 20);

        let batch = log.read_from(0).await.unwrap();
        assert_eq!(batch.records.len(), 20);
        assert!(batch
            .records
            .iter()
            .all(|record| record.model_used == ModelKind::Lstm));
        assert_eq!(batch.records[19].sequence_offset, 19);
    }

    #[tokio::test]
    async fn test_energy_follows_family_coefficient() {
        let (log, _store, service) = service(SimulationConfig {
            batch_size: 10,
            seed: Some(1),
            ..Default::default()
        });
        service.emit_batch().await.unwrap();

        let batch = log.read_from(0).await.unwrap();
        let coefficient = ModelKind::Linear.energy_coefficient();
        for record in &batch.records {
            assert!(record.energy_cost >= coefficient * 0.9 - 1e-9);
            assert!(record.energy_cost <= coefficient * 1.1 + 1e-9);
        }
    }

    #[tokio::test]
    async fn test_drift_region_shifts_ground_truth() {
        let (log, _store, service) = service(SimulationConfig {
            batch_size: 100,
            noise: 0.0,
            seed: Some(3),
            drift_regions: vec![DriftRegion {
                start: 50,
                end: 99,
                scale: 2.0,
                shift: 500.0,
            }],
            ..Default::default()
        });
        service.emit_batch().await.unwrap();

        let truth: Vec<f64> = log
            .read_from(0)
            .await
            .unwrap()
            .records
            .iter()
            .map(|record| record.true_value)
            .collect();
        assert!((truth[10] - 100.0).abs() < 1e-9);
        assert!((truth[60] - 700.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_service_resumes_after_existing_records() {
        let (log, store, first) = service(SimulationConfig {
            batch_size: 5,
            seed: Some(9),
            ..Default::default()
        });
        first.emit_batch().await.unwrap();

        let second = SyntheticService::new(
            log.clone(),
            store,
            SimulationConfig {
                batch_size: 5,
                seed: Some(9),
                ..Default::default()
            },
        );
        second.emit_batch().await.unwrap();

        let batch = log.read_from(0).await.unwrap();
        assert_eq!(batch.records[9].sequence_offset, 9);
    }

    #[tokio::test]
    async fn test_simulated_trainer_summarizes_snapshot() {
        let bytes = SimulatedTrainer
            .train(ModelKind::Svm, &[1.0, 2.0, 3.0, 4.0])
            .await
            .unwrap();
        let artifact: SimulatedArtifact = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(artifact.family, ModelKind::Svm);
        assert_eq!(artifact.samples, 4);
        assert!((artifact.mean - 2.5).abs() < 1e-12);

        let empty = SimulatedTrainer.train(ModelKind::Svm, &[]).await;
        assert!(matches!(empty, Err(TrainError::EmptySnapshot)));
    }
}
