//! Error types shared across the controller components

use crate::models::ModelKind;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the durable state store
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state backend I/O failed for {key}: {source}")]
    Io {
        key: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode state for {key}: {source}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures of the model version registry
#[derive(Debug, Error)]
pub enum VersionStoreError {
    #[error("version {version_id} of {family} not found")]
    NotFound { family: ModelKind, version_id: u64 },

    #[error("checksum mismatch for {path:?}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("version store I/O failed at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed version metadata at {path:?}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures reported by a training collaborator
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("training data snapshot is empty")]
    EmptySnapshot,

    #[error("trainer command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("trainer did not produce an artifact at {0:?}")]
    MissingArtifact(PathBuf),

    #[error("trainer I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to register trained model: {0}")]
    Register(#[from] VersionStoreError),
}
