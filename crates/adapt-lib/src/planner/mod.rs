//! Adaptation decision planning
//!
//! This module provides:
//! - The energy debt ledger
//! - Epsilon-greedy family selection
//! - The Stable/Recovering state machine producing one decision per cycle

mod engine;
mod ledger;
mod selection;

pub use engine::{DecisionPlanner, FastCycleInput, FastCyclePlan, PlannerPhase};
pub use ledger::{DebtLedger, DebtState};
pub use selection::{EpsilonGreedy, Selection, SwitchReason};
