//! Distribution drift detection
//!
//! This module provides:
//! - Shared-range histograms, KL divergence and earth-mover distance
//! - A two-window detector over the ground-truth stream

mod detector;
mod histogram;

pub use detector::{DriftConfig, DriftDetector, DriftOutcome, DriftReport};
pub use histogram::{
    kl_between, kl_divergence, shared_range, wasserstein_distance, Histogram, PROBABILITY_FLOOR,
};
