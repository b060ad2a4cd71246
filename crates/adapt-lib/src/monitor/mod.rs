//! Performance and energy monitoring
//!
//! This module provides:
//! - The append-only prediction log the inference service writes to
//! - Batch accuracy and energy metrics
//! - A cursor-based monitor producing one snapshot per fast cycle

mod log;
mod metrics;
mod snapshot;

pub use log::{JsonlPredictionLog, LogBatch, MemoryPredictionLog, PredictionLog};
pub use metrics::{
    batch_accuracy, composite_score, ema, mape_accuracy, mean_energy, mean_latency,
    normalize_energy, r2_score,
};
pub use snapshot::{observe, MetricsMonitor, MonitorPoll, MonitorState, PendingBatch};
