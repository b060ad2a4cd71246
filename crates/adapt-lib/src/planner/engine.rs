//! Decision planner state machine
//!
//! Two phases, derived from the persisted recovery counter:
//! - `Stable`: switch triggers are evaluated in the configured priority order
//! - `Recovering`: a cooldown after a forced energy switch during which every
//!   cycle decrements the counter and no switch is evaluated

use super::ledger::{DebtLedger, DebtState};
use super::selection::{EpsilonGreedy, SwitchReason};
use crate::config::{AdaptationPolicy, ThresholdConfig, ThresholdPriority};
use crate::models::{ActiveModel, Decision, ModelKind, MonitorSnapshot};
use crate::versions::MatchOutcome;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Planner phase as observed at the start of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PlannerPhase {
    Stable,
    Recovering { remaining: u32 },
}

impl PlannerPhase {
    pub fn of(state: &DebtState) -> Self {
        if state.is_recovering() {
            PlannerPhase::Recovering {
                remaining: state.recovery_cycles_remaining,
            }
        } else {
            PlannerPhase::Stable
        }
    }
}

/// Inputs of one fast-cycle planning step
#[derive(Debug, Clone, Copy)]
pub struct FastCycleInput<'a> {
    /// `None` when the monitor had no new data
    pub snapshot: Option<&'a MonitorSnapshot>,
    pub family_scores: &'a BTreeMap<ModelKind, f64>,
    pub active: ModelKind,
}

/// Outcome of one fast-cycle planning step
#[derive(Debug, Clone, PartialEq)]
pub struct FastCyclePlan {
    pub decision: Decision,
    pub phase: PlannerPhase,
    pub reason: Option<SwitchReason>,
    pub explored: bool,
    pub energy_excess: Option<f64>,
    pub entered_recovery: bool,
}

impl FastCyclePlan {
    fn idle(phase: PlannerPhase, energy_excess: Option<f64>) -> Self {
        Self {
            decision: Decision::None,
            phase,
            reason: None,
            explored: false,
            energy_excess,
            entered_recovery: false,
        }
    }
}

/// Decision planner combining the debt ledger, the recovery state machine
/// and the selection policy
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionPlanner {
    policy: AdaptationPolicy,
}

impl DecisionPlanner {
    pub fn new(policy: AdaptationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AdaptationPolicy {
        &self.policy
    }

    /// Run one fast cycle: account energy debt, then plan a switch.
    pub fn plan_fast<R: Rng + ?Sized>(
        &self,
        state: &mut DebtState,
        input: FastCycleInput<'_>,
        thresholds: &ThresholdConfig,
        rng: &mut R,
    ) -> FastCyclePlan {
        let energy_excess = input.snapshot.map(|snapshot| {
            DebtLedger::new(self.policy.debt_rule).accrue(
                state,
                snapshot.normalized_energy,
                thresholds,
            )
        });

        let phase = PlannerPhase::of(state);
        if state.is_recovering() {
            state.recovery_cycles_remaining -= 1;
            return FastCyclePlan::idle(phase, energy_excess);
        }

        let Some(snapshot) = input.snapshot else {
            return FastCyclePlan::idle(phase, energy_excess);
        };

        let score_violation = snapshot.ema_score < thresholds.min_score;
        let debt_violation = state.debt > thresholds.max_debt;

        let reason = match self.policy.priority {
            ThresholdPriority::ScoreFirst if score_violation => Some(SwitchReason::Score),
            ThresholdPriority::ScoreFirst if debt_violation => Some(SwitchReason::Energy),
            ThresholdPriority::EnergyFirst if debt_violation => Some(SwitchReason::Energy),
            ThresholdPriority::EnergyFirst if score_violation => Some(SwitchReason::Score),
            _ => None,
        };

        let Some(reason) = reason else {
            return FastCyclePlan::idle(phase, energy_excess);
        };

        let mut plan = FastCyclePlan::idle(phase, energy_excess);
        plan.reason = Some(reason);

        if reason == SwitchReason::Energy {
            state.recovery_cycles_remaining = thresholds.recovery_time;
            if self.policy.reset_debt_on_recovery {
                state.debt = 0.0;
            }
            plan.entered_recovery = true;
        }

        let selector = EpsilonGreedy::new(thresholds.exploration_rate);
        if let Some(selection) = selector.select(input.active, reason, input.family_scores, rng) {
            plan.explored = selection.explored;
            if selection.family != input.active {
                plan.decision = Decision::SwitchTo {
                    model: selection.family,
                };
            }
        }

        plan
    }

    /// Plan the slow-cycle response to a drift evaluation.
    ///
    /// `matched` is `None` when version matching is disabled for the run
    /// mode, in which case detected drift always retrains.
    pub fn plan_drift(
        &self,
        drift_detected: bool,
        matched: Option<&MatchOutcome>,
        active: &ActiveModel,
    ) -> Decision {
        if !drift_detected {
            return Decision::None;
        }

        match matched {
            Some(MatchOutcome::Accepted {
                family, version_id, ..
            }) => {
                if active.is_serving(*family, *version_id) {
                    Decision::None
                } else {
                    Decision::ReplaceWith {
                        family: *family,
                        version_id: *version_id,
                    }
                }
            }
            Some(MatchOutcome::Rejected { .. }) | Some(MatchOutcome::NoVersions) | None => {
                Decision::Retrain
            }
        }
    }
}
