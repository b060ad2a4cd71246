//! Energy-aware adaptive controller library
//!
//! This crate provides the core functionality for:
//! - Monitoring a prediction log into EMA performance/energy scores
//! - Energy debt accounting and model family switching
//! - Distribution drift detection and stored version reuse
//! - Cost-aware retraining
//! - Health checks and observability

pub mod config;
pub mod drift;
pub mod error;
pub mod executor;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod planner;
pub mod retrain;
pub mod scheduler;
pub mod sim;
pub mod state;
pub mod versions;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AdaptMetrics, StructuredLogger};
