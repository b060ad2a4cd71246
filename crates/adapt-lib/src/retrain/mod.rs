//! Cost-aware retraining
//!
//! This module provides:
//! - Cost/sustainability quotes (with a simulated regional price feed)
//! - A deduplicating queue ordered by cost, then sustainability
//! - Training collaborators (external process)
//! - The dispatcher deciding between immediate and queued training, and the
//!   background worker draining the queue

mod cost;
mod queue;
mod trainer;
mod worker;

pub use cost::{default_regions, CostFeed, CostQuote, FixedCostFeed, Region, SimulatedCostFeed};
pub use queue::{RetrainJob, RetrainQueue};
pub use trainer::{ProcessTrainer, Trainer, ENV_DATA, ENV_FAMILY, ENV_OUTPUT};
pub use worker::{
    DispatchOutcome, RetrainDispatcher, RetrainWorker, DEFAULT_IMMEDIATE_COST_THRESHOLD,
};
