//! Core data models for the adaptive controller

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Closed set of interchangeable model families the inference service can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Ridge/linear regression over lagged values
    Linear,
    /// Linear-kernel support vector regression
    Svm,
    /// Recurrent sequence model
    Lstm,
}

/// Storage format of a trained artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Pickled estimator
    Pickle,
    /// Serialized tensor state dict
    StateDict,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Pickle => "pkl",
            ArtifactKind::StateDict => "pth",
        }
    }
}

impl ModelKind {
    /// Every family, in declaration order
    pub const ALL: [ModelKind; 3] = [ModelKind::Linear, ModelKind::Svm, ModelKind::Lstm];

    pub fn all() -> &'static [ModelKind] {
        &Self::ALL
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::Svm => "svm",
            ModelKind::Lstm => "lstm",
        }
    }

    /// Static energy-efficiency coefficient; lower means cheaper to run.
    pub fn energy_coefficient(&self) -> f64 {
        match self {
            ModelKind::Linear => 0.2,
            ModelKind::Svm => 0.45,
            ModelKind::Lstm => 1.0,
        }
    }

    pub fn artifact_kind(&self) -> ArtifactKind {
        match self {
            ModelKind::Linear | ModelKind::Svm => ArtifactKind::Pickle,
            ModelKind::Lstm => ArtifactKind::StateDict,
        }
    }

    /// File name of the artifact inside a version directory or the active slot
    pub fn artifact_file_name(&self) -> String {
        format!("{}_model.{}", self.as_str(), self.artifact_kind().extension())
    }

    /// The family with the lowest energy coefficient, skipping `exclude`.
    ///
    /// Ties resolve to declaration order.
    pub fn most_efficient(exclude: Option<ModelKind>) -> Option<ModelKind> {
        Self::ALL
            .iter()
            .copied()
            .filter(|kind| Some(*kind) != exclude)
            .min_by(|a, b| {
                a.energy_coefficient()
                    .partial_cmp(&b.energy_coefficient())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" | "lr" => Ok(ModelKind::Linear),
            "svm" | "svr" => Ok(ModelKind::Svm),
            "lstm" => Ok(ModelKind::Lstm),
            other => Err(format!("unknown model family: {other}")),
        }
    }
}

/// One served prediction, appended by the inference service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub true_value: f64,
    pub predicted_value: f64,
    /// Seconds spent in inference
    pub inference_latency: f64,
    /// Energy spent on this prediction (service-defined unit)
    pub energy_cost: f64,
    pub model_used: ModelKind,
    pub sequence_offset: u64,
}

/// Performance/energy summary of one monitor batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub accuracy: f64,
    pub normalized_energy: f64,
    pub composite_score: f64,
    pub ema_score: f64,
    pub mean_energy: f64,
    pub mean_latency: f64,
    pub records: usize,
}

/// A single adaptation decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    None,
    SwitchTo { model: ModelKind },
    Retrain,
    ReplaceWith { family: ModelKind, version_id: u64 },
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::None => "none",
            Decision::SwitchTo { .. } => "switch",
            Decision::Retrain => "retrain",
            Decision::ReplaceWith { .. } => "replace",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Decision::None)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::None => f.write_str("none"),
            Decision::SwitchTo { model } => write!(f, "switch_to({model})"),
            Decision::Retrain => f.write_str("retrain"),
            Decision::ReplaceWith { family, version_id } => {
                write!(f, "replace_with({family}@{version_id})")
            }
        }
    }
}

/// Currently active model, written only by the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveModel {
    pub family: ModelKind,
    /// Version installed into the active family's slot, if any
    #[serde(default)]
    pub version_id: Option<u64>,
    /// Last version installed into each family's slot
    #[serde(default)]
    pub installed: BTreeMap<ModelKind, u64>,
    #[serde(default)]
    pub updated_at: i64,
}

impl ActiveModel {
    /// True when `family` is active with `version_id` in its slot
    pub fn is_serving(&self, family: ModelKind, version_id: u64) -> bool {
        self.family == family && self.version_id == Some(version_id)
    }
}

impl Default for ActiveModel {
    fn default() -> Self {
        Self {
            family: ModelKind::Linear,
            version_id: None,
            installed: BTreeMap::new(),
            updated_at: 0,
        }
    }
}
