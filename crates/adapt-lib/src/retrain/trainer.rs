//! Training collaborators

use crate::error::TrainError;
use crate::models::ModelKind;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Environment variable naming the family to train
pub const ENV_FAMILY: &str = "ADAPT_TRAIN_FAMILY";
/// Environment variable pointing at the JSON training snapshot
pub const ENV_DATA: &str = "ADAPT_TRAIN_DATA";
/// Environment variable naming where the artifact must be written
pub const ENV_OUTPUT: &str = "ADAPT_TRAIN_OUTPUT";

/// Produces a model artifact from a training snapshot
#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train(&self, family: ModelKind, training_data: &[f64]) -> Result<Vec<u8>, TrainError>;
}

/// Runs an external training command.
///
/// The command receives the family, the snapshot path and the expected
/// artifact path through [`ENV_FAMILY`], [`ENV_DATA`] and [`ENV_OUTPUT`]. A
/// non-zero exit or a missing artifact fails the job.
#[derive(Debug, Clone)]
pub struct ProcessTrainer {
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
}

impl ProcessTrainer {
    pub fn new(program: impl Into<String>, args: Vec<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            work_dir: work_dir.into(),
        }
    }
}

#[async_trait]
impl Trainer for ProcessTrainer {
    async fn train(&self, family: ModelKind, training_data: &[f64]) -> Result<Vec<u8>, TrainError> {
        if training_data.is_empty() {
            return Err(TrainError::EmptySnapshot);
        }

        let job_dir = self.work_dir.join(family.as_str());
        tokio::fs::create_dir_all(&job_dir).await?;

        let data_path = job_dir.join("data.json");
        let output_path = job_dir.join(family.artifact_file_name());
        let data = serde_json::to_vec(training_data).map_err(std::io::Error::other)?;
        tokio::fs::write(&data_path, data).await?;
        match tokio::fs::remove_file(&output_path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        debug!(program = %self.program, family = %family, "Starting trainer process");
        let output = Command::new(&self.program)
            .args(&self.args)
            .env(ENV_FAMILY, family.as_str())
            .env(ENV_DATA, &data_path)
            .env(ENV_OUTPUT, &output_path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(TrainError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let artifact = match tokio::fs::read(&output_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TrainError::MissingArtifact(output_path));
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            family = %family,
            samples = training_data.len(),
            artifact_bytes = artifact.len(),
            "Trainer process completed"
        );
        Ok(artifact)
    }
}
