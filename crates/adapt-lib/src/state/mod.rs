//! Durable controller state
//!
//! This module provides:
//! - A small key/value backend abstraction (file or in-memory)
//! - Typed, atomic read-modify-write per key with single-writer locking
//! - Fallback to defaults when a stored value is missing or malformed

mod backend;
mod store;

pub use backend::{FileBackend, MemoryBackend, StateBackend};
pub use store::StateStore;

use serde::{Deserialize, Serialize};

/// Keys of the persisted state objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    /// Debt ledger and recovery counter (written by the fast cycle)
    Ledger,
    /// Monitor cursor, EMA scores and energy bounds (written by the fast cycle)
    Monitor,
    /// Active-model pointer (written by the executor)
    ActiveModel,
    /// Most recent drift reference set (written by the slow cycle)
    DriftReference,
}

impl StateKey {
    pub const ALL: [StateKey; 4] = [
        StateKey::Ledger,
        StateKey::Monitor,
        StateKey::ActiveModel,
        StateKey::DriftReference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::Ledger => "ledger",
            StateKey::Monitor => "monitor",
            StateKey::ActiveModel => "active_model",
            StateKey::DriftReference => "drift_reference",
        }
    }
}

/// Snapshot of recent ground truth captured on drift detection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftReferenceSet {
    pub values: Vec<f64>,
    pub captured_at: i64,
    pub kl_divergence: f64,
}
