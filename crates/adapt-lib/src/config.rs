//! Threshold and policy configuration
//!
//! Thresholds are re-read from disk at the start of every cycle. A missing
//! file, a malformed file or an out-of-range field never fails a cycle: the
//! documented default is substituted and a warning is logged.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Per-cycle thresholds read by the monitor, ledger, planner and detectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// EMA score below which a switch is warranted
    pub min_score: f64,
    /// Normalized energy budget per cycle
    pub max_energy: f64,
    /// Debt ceiling that forces a recovery switch
    pub max_debt: f64,
    /// Cycles of switch suppression after a forced switch
    pub recovery_time: u32,
    /// Multiplier applied to debt every cycle (< 1)
    pub debt_decay: f64,
    /// Weight of accuracy in the composite score
    pub beta: f64,
    /// EMA blend factor for the newest score
    pub gamma: f64,
    /// Probability of picking a family uniformly at random
    pub exploration_rate: f64,
    pub drift_kl_threshold: f64,
    /// Secondary drift signal threshold (earth-mover distance)
    pub drift_distance_threshold: f64,
    /// Maximum divergence for reusing a stored version instead of retraining
    pub version_accept_threshold: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            min_score: 0.7,
            max_energy: 0.6,
            max_debt: 1.5,
            recovery_time: 5,
            debt_decay: 0.95,
            beta: 0.7,
            gamma: 0.3,
            exploration_rate: 0.1,
            drift_kl_threshold: 0.5,
            drift_distance_threshold: 0.1,
            version_accept_threshold: 0.2,
        }
    }
}

impl ThresholdConfig {
    /// Replace out-of-range or non-finite fields with their defaults
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();

        fn fix(name: &str, value: &mut f64, fallback: f64, valid: impl Fn(f64) -> bool) {
            if !value.is_finite() || !valid(*value) {
                warn!(field = name, value = *value, fallback, "Threshold out of range, using default");
                *value = fallback;
            }
        }

        let unit = |v: f64| (0.0..=1.0).contains(&v);
        let non_negative = |v: f64| v >= 0.0;
        let leaky = |v: f64| (0.0..1.0).contains(&v);

        fix("min_score", &mut self.min_score, defaults.min_score, |_| true);
        fix("max_energy", &mut self.max_energy, defaults.max_energy, |_| true);
        fix("max_debt", &mut self.max_debt, defaults.max_debt, non_negative);
        fix("debt_decay", &mut self.debt_decay, defaults.debt_decay, leaky);
        fix("beta", &mut self.beta, defaults.beta, unit);
        fix("gamma", &mut self.gamma, defaults.gamma, unit);
        fix("exploration_rate", &mut self.exploration_rate, defaults.exploration_rate, unit);
        fix("drift_kl_threshold", &mut self.drift_kl_threshold, defaults.drift_kl_threshold, non_negative);
        fix(
            "drift_distance_threshold",
            &mut self.drift_distance_threshold,
            defaults.drift_distance_threshold,
            non_negative,
        );
        fix(
            "version_accept_threshold",
            &mut self.version_accept_threshold,
            defaults.version_accept_threshold,
            non_negative,
        );
        self
    }

    /// Names of the fields `sanitized` would replace
    pub fn invalid_fields(&self) -> Vec<String> {
        let before = serde_json::to_value(self);
        let after = serde_json::to_value(self.clone().sanitized());
        match (before, after) {
            (Ok(serde_json::Value::Object(before)), Ok(serde_json::Value::Object(after))) => before
                .into_iter()
                .filter(|(key, value)| after.get(key) != Some(value))
                .map(|(key, _)| key)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Keys of a threshold document that no field reads
    pub fn unknown_keys(document: &serde_json::Value) -> Vec<String> {
        let known = match serde_json::to_value(Self::default()) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => return Vec::new(),
        };
        match document {
            serde_json::Value::Object(map) => map
                .keys()
                .filter(|key| !known.contains_key(*key))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Parse thresholds from JSON, falling back to defaults on any error
    pub fn from_json_or_default(data: &[u8]) -> Self {
        match serde_json::from_slice::<ThresholdConfig>(data) {
            Ok(config) => config.sanitized(),
            Err(e) => {
                warn!(error = %e, "Malformed threshold configuration, using defaults");
                Self::default()
            }
        }
    }
}

/// Where the thresholds for a cycle come from
#[derive(Debug, Clone)]
pub enum ThresholdSource {
    /// Fixed thresholds supplied at startup
    Static(ThresholdConfig),
    /// JSON file re-read every cycle
    File(PathBuf),
}

impl ThresholdSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ThresholdSource::File(path.into())
    }

    /// Current thresholds; never fails
    pub async fn current(&self) -> ThresholdConfig {
        match self {
            ThresholdSource::Static(config) => config.clone().sanitized(),
            ThresholdSource::File(path) => load_threshold_file(path).await,
        }
    }
}

impl Default for ThresholdSource {
    fn default() -> Self {
        ThresholdSource::Static(ThresholdConfig::default())
    }
}

async fn load_threshold_file(path: &Path) -> ThresholdConfig {
    match tokio::fs::read(path).await {
        Ok(data) => ThresholdConfig::from_json_or_default(&data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No threshold file, using defaults");
            ThresholdConfig::default()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read thresholds, using defaults");
            ThresholdConfig::default()
        }
    }
}

/// How energy overrun accumulates into debt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebtRule {
    /// `debt = max(0, (debt + max(excess, 0)) * decay)`
    #[default]
    AccrueThenDecay,
    /// `debt = max(0, debt * decay + max(excess, 0))`
    DecayThenAccrue,
    /// `debt = max(0, (debt + excess) * decay)`; under-budget cycles pay debt down
    Signed,
}

/// Which switch trigger is evaluated first while stable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPriority {
    #[default]
    ScoreFirst,
    EnergyFirst,
}

/// Which signals compose `drift_detected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSignals {
    #[default]
    KlOnly,
    KlOrDistance,
}

/// Batch accuracy definition used by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyMetric {
    /// `1 - mean absolute percentage error`
    #[default]
    Mape,
    /// Coefficient of determination
    R2,
}

/// Named behaviors that earlier controller iterations hard-coded differently
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationPolicy {
    pub debt_rule: DebtRule,
    /// Zero the debt when recovery is entered
    pub reset_debt_on_recovery: bool,
    pub priority: ThresholdPriority,
    pub drift_signals: DriftSignals,
    pub accuracy_metric: AccuracyMetric,
    /// Fixed energy normalization bounds; observed bounds are used when absent
    pub energy_bounds: Option<(f64, f64)>,
}

impl Default for AdaptationPolicy {
    fn default() -> Self {
        Self {
            debt_rule: DebtRule::default(),
            reset_debt_on_recovery: false,
            priority: ThresholdPriority::default(),
            drift_signals: DriftSignals::default(),
            accuracy_metric: AccuracyMetric::default(),
            energy_bounds: None,
        }
    }
}
