//! Controller configuration

use adapt_lib::config::{AdaptationPolicy, ThresholdSource};
use adapt_lib::drift::DriftConfig;
use adapt_lib::retrain::DEFAULT_IMMEDIATE_COST_THRESHOLD;
use adapt_lib::scheduler::{RunMode, ScheduleConfig};
use adapt_lib::sim::SimulationConfig;
use adapt_lib::versions::{RetentionPolicy, DEFAULT_VERSIONS_TO_KEEP};
use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "ADAPT_CONFIG_FILE";

/// Controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Name attached to every structured log record
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for health/metrics/state
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub run_mode: RunMode,

    #[serde(default = "default_fast_interval")]
    pub fast_interval_secs: u64,

    #[serde(default = "default_slow_interval")]
    pub slow_interval_secs: u64,

    #[serde(default = "default_retrain_interval")]
    pub retrain_interval_secs: u64,

    /// Directory of the persisted controller state
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// JSON-lines prediction log appended by the inference service
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Thresholds file, re-read every cycle
    #[serde(default = "default_thresholds_path")]
    pub thresholds_path: PathBuf,

    #[serde(default = "default_versions_dir")]
    pub versions_dir: PathBuf,

    /// Per-family artifact slots loaded by the inference service
    #[serde(default = "default_active_dir")]
    pub active_dir: PathBuf,

    /// Scratch space for training jobs
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Versions kept per family; 0 keeps every version
    #[serde(default = "default_versions_to_keep")]
    pub versions_to_keep: usize,

    #[serde(default)]
    pub policy: AdaptationPolicy,

    #[serde(default)]
    pub drift: DriftConfig,

    /// External training command; the simulated trainer is used when unset
    #[serde(default)]
    pub trainer_command: Option<String>,

    #[serde(default)]
    pub trainer_args: Vec<String>,

    /// Retraining quotes cheaper than this start immediately
    #[serde(default = "default_immediate_cost_threshold")]
    pub immediate_cost_threshold: f64,

    /// Seed for the cost feed and exploration; random when unset
    #[serde(default)]
    pub rng_seed: Option<u64>,

    /// Run the synthetic inference service in-process
    #[serde(default)]
    pub simulate: bool,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "adapt-controller".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_fast_interval() -> u64 {
    10
}

fn default_slow_interval() -> u64 {
    60
}

fn default_retrain_interval() -> u64 {
    30
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("data/state")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("data/predictions.jsonl")
}

fn default_thresholds_path() -> PathBuf {
    PathBuf::from("config/thresholds.json")
}

fn default_versions_dir() -> PathBuf {
    PathBuf::from("models/versions")
}

fn default_active_dir() -> PathBuf {
    PathBuf::from("models/active")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("data/training")
}

fn default_versions_to_keep() -> usize {
    DEFAULT_VERSIONS_TO_KEEP
}

fn default_immediate_cost_threshold() -> f64 {
    DEFAULT_IMMEDIATE_COST_THRESHOLD
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            api_port: default_api_port(),
            run_mode: RunMode::default(),
            fast_interval_secs: default_fast_interval(),
            slow_interval_secs: default_slow_interval(),
            retrain_interval_secs: default_retrain_interval(),
            state_dir: default_state_dir(),
            log_path: default_log_path(),
            thresholds_path: default_thresholds_path(),
            versions_dir: default_versions_dir(),
            active_dir: default_active_dir(),
            work_dir: default_work_dir(),
            versions_to_keep: default_versions_to_keep(),
            policy: AdaptationPolicy::default(),
            drift: DriftConfig::default(),
            trainer_command: None,
            trainer_args: Vec::new(),
            immediate_cost_threshold: default_immediate_cost_threshold(),
            rng_seed: None,
            simulate: false,
            simulation: SimulationConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from an optional file and `ADAPT_*` environment
    /// variables. Nested keys use `__`, e.g. `ADAPT_POLICY__DEBT_RULE`.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("ADAPT")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("trainer_args"),
            )
            .build()?;

        Ok(Self::from_config(config))
    }

    /// Deserialize a built configuration, falling back to defaults
    pub fn from_config(config: config::Config) -> Self {
        config.try_deserialize().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid controller configuration, using defaults");
            ControllerConfig::default()
        })
    }

    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            fast_interval: Duration::from_secs(self.fast_interval_secs.max(1)),
            slow_interval: Duration::from_secs(self.slow_interval_secs.max(1)),
            retrain_interval: Duration::from_secs(self.retrain_interval_secs.max(1)),
        }
    }

    pub fn thresholds(&self) -> ThresholdSource {
        ThresholdSource::file(&self.thresholds_path)
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::from_versions_to_keep(self.versions_to_keep)
    }
}
