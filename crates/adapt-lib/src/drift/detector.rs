//! Sliding-window drift detection over the ground-truth stream

use super::histogram::{kl_between, wasserstein_distance};
use crate::config::{DriftSignals, ThresholdConfig};
use crate::monitor::PredictionLog;
use crate::state::{DriftReferenceSet, StateKey, StateStore};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default size of each comparison window
const DEFAULT_WINDOW_SIZE: usize = 500;

/// Default histogram bin count
const DEFAULT_BINS: usize = 50;

/// Default number of recent values kept as the drift reference set
const DEFAULT_REFERENCE_SIZE: usize = 1000;

/// Window and binning parameters of the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_bins")]
    pub bins: usize,
    /// Values snapshotted on detection; never smaller than `window_size`
    #[serde(default = "default_reference_size")]
    pub reference_size: usize,
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_bins() -> usize {
    DEFAULT_BINS
}

fn default_reference_size() -> usize {
    DEFAULT_REFERENCE_SIZE
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            bins: DEFAULT_BINS,
            reference_size: DEFAULT_REFERENCE_SIZE,
        }
    }
}

/// Drift evaluation of one reference/current window pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    /// `KL(reference ‖ current)`
    pub kl_divergence: f64,
    /// Earth-mover distance, computed only when it contributes to detection
    pub energy_distance: Option<f64>,
    pub drift_detected: bool,
}

/// Result of a drift check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriftOutcome {
    /// Fewer than two full windows of ground truth so far
    Insufficient { have: usize, need: usize },
    Report(DriftReport),
}

impl DriftOutcome {
    pub fn drift_detected(&self) -> bool {
        matches!(self, DriftOutcome::Report(report) if report.drift_detected)
    }
}

/// Compares the two most recent adjacent windows of ground truth
#[derive(Debug, Clone, Copy)]
pub struct DriftDetector {
    config: DriftConfig,
    signals: DriftSignals,
}

impl DriftDetector {
    pub fn new(config: DriftConfig, signals: DriftSignals) -> Self {
        let window_size = config.window_size.max(1);
        Self {
            config: DriftConfig {
                window_size,
                bins: config.bins.max(1),
                reference_size: config.reference_size.max(window_size),
            },
            signals,
        }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Samples needed before a report can be produced
    pub fn required_samples(&self) -> usize {
        2 * self.config.window_size
    }

    /// Evaluate the last `2W` values of `values` (oldest first).
    ///
    /// The reference window immediately precedes the current window.
    pub fn evaluate(&self, values: &[f64], thresholds: &ThresholdConfig) -> DriftOutcome {
        let need = self.required_samples();
        if values.len() < need {
            return DriftOutcome::Insufficient {
                have: values.len(),
                need,
            };
        }

        let tail = &values[values.len() - need..];
        let (reference, current) = tail.split_at(self.config.window_size);

        let kl_divergence = kl_between(reference, current, self.config.bins);
        let kl_drift = kl_divergence > thresholds.drift_kl_threshold;

        let (energy_distance, drift_detected) = match self.signals {
            DriftSignals::KlOnly => (None, kl_drift),
            DriftSignals::KlOrDistance => {
                let distance = wasserstein_distance(reference, current);
                (
                    Some(distance),
                    kl_drift || distance > thresholds.drift_distance_threshold,
                )
            }
        };

        DriftOutcome::Report(DriftReport {
            kl_divergence,
            energy_distance,
            drift_detected,
        })
    }

    /// Evaluate the prediction log and snapshot the reference set on drift.
    ///
    /// The stored reference set is overwritten on every detection.
    pub async fn check(
        &self,
        log: &dyn PredictionLog,
        store: &StateStore,
        thresholds: &ThresholdConfig,
    ) -> Result<DriftOutcome> {
        let fetch = self.required_samples().max(self.config.reference_size);
        let values = log.tail_truth(fetch).await?;

        let outcome = self.evaluate(&values, thresholds);
        match &outcome {
            DriftOutcome::Insufficient { have, need } => {
                debug!(have, need, "Insufficient ground truth for drift detection");
            }
            DriftOutcome::Report(report) if report.drift_detected => {
                let skip = values.len().saturating_sub(self.config.reference_size);
                let reference = DriftReferenceSet {
                    values: values[skip..].to_vec(),
                    captured_at: chrono::Utc::now().timestamp(),
                    kl_divergence: report.kl_divergence,
                };
                store.store(StateKey::DriftReference, &reference).await?;
            }
            DriftOutcome::Report(report) => {
                debug!(kl_divergence = report.kl_divergence, "No drift");
            }
        }

        Ok(outcome)
    }
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new(DriftConfig::default(), DriftSignals::default())
    }
}
