//! Single fast and slow controller cycles
//!
//! Each cycle reads its thresholds fresh, plans exactly one decision and
//! hands it to the executor. Loops around these live in the scheduler.

use crate::config::ThresholdSource;
use crate::drift::{DriftDetector, DriftOutcome};
use crate::executor::{ExecutionOutcome, Executor};
use crate::health::HealthRegistry;
use crate::models::{Decision, MonitorSnapshot};
use crate::monitor::{MetricsMonitor, MonitorState, PendingBatch, PredictionLog};
use crate::observability::{AdaptMetrics, StructuredLogger};
use crate::planner::{DebtState, DecisionPlanner, FastCycleInput, FastCyclePlan};
use crate::state::{DriftReferenceSet, StateKey, StateStore};
use crate::versions::{MatchOutcome, VersionMatcher};
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Collaborators shared by every cycle
pub struct CycleContext {
    pub store: StateStore,
    pub log: Arc<dyn PredictionLog>,
    pub thresholds: ThresholdSource,
    pub executor: Arc<Executor>,
    pub health: HealthRegistry,
    pub logger: StructuredLogger,
    pub metrics: AdaptMetrics,
}

impl CycleContext {
    pub fn new(
        store: StateStore,
        log: Arc<dyn PredictionLog>,
        thresholds: ThresholdSource,
        executor: Arc<Executor>,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            log,
            thresholds,
            executor,
            health,
            logger,
            metrics: AdaptMetrics::new(),
        }
    }
}

/// What one fast cycle observed and did
#[derive(Debug, Clone, PartialEq)]
pub struct FastCycleReport {
    /// `None` when the log had no new records
    pub snapshot: Option<MonitorSnapshot>,
    pub plan: FastCyclePlan,
    /// Ledger state after this cycle
    pub debt: DebtState,
    pub outcome: ExecutionOutcome,
}

/// Monitor → ledger → planner → executor
pub struct FastCycle {
    ctx: Arc<CycleContext>,
    monitor: MetricsMonitor,
    planner: DecisionPlanner,
    rng: Mutex<StdRng>,
}

impl FastCycle {
    /// # Arguments
    /// * `seed` - Fixes the exploration RNG; `None` seeds from the OS
    pub fn new(ctx: Arc<CycleContext>, planner: DecisionPlanner, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            monitor: MetricsMonitor::new(ctx.log.clone()),
            ctx,
            planner,
            rng: Mutex::new(rng),
        }
    }

    pub async fn run_once(&self) -> Result<FastCycleReport> {
        let ctx = &self.ctx;
        let thresholds = ctx.thresholds.current().await;

        let pending = self
            .monitor
            .read(&ctx.store, &thresholds, self.planner.policy())
            .await
            .context("Metrics monitor read failed")?;
        let snapshot = pending.as_ref().and_then(|p| p.snapshot().cloned());
        let next_offset = pending.as_ref().map(PendingBatch::next_offset);
        let family_scores = match &pending {
            Some(pending) => pending.state().family_scores.clone(),
            None => {
                let monitor: MonitorState = ctx.store.load(StateKey::Monitor).await?;
                monitor.family_scores
            }
        };

        let active = ctx.executor.slot().current().await?;

        let planner = self.planner;
        let (plan, debt) = ctx
            .store
            .update(StateKey::Ledger, |state: &mut DebtState| {
                // A batch whose commit failed last cycle is replayed without
                // accruing its energy again
                let fresh = match next_offset {
                    Some(offset) if offset > state.accounted_through => {
                        state.accounted_through = offset;
                        snapshot.as_ref()
                    }
                    _ => None,
                };
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                let input = FastCycleInput {
                    snapshot: fresh,
                    family_scores: &family_scores,
                    active: active.family,
                };
                let plan = planner.plan_fast(state, input, &thresholds, &mut *rng);
                (plan, *state)
            })
            .await
            .context("Failed to update debt ledger")?;

        if let Some(pending) = pending {
            self.monitor
                .commit(&ctx.store, pending)
                .await
                .context("Failed to commit monitor cursor")?;
        }

        if let Some(snapshot) = &snapshot {
            ctx.metrics
                .set_scores(snapshot.ema_score, snapshot.normalized_energy, snapshot.mean_latency);
        }
        ctx.metrics.set_debt(debt.debt, debt.recovery_cycles_remaining);

        if plan.entered_recovery {
            let target = match plan.decision {
                Decision::SwitchTo { model } => Some(model),
                _ => None,
            };
            ctx.logger
                .log_recovery_entered(debt.debt, thresholds.recovery_time, target);
        }

        let outcome = ctx.executor.apply(&plan.decision).await?;
        if !plan.decision.is_none() {
            ctx.metrics.inc_decision(&plan.decision);
            if plan.explored {
                ctx.metrics.inc_explorations();
            }
            ctx.logger.log_decision(
                "fast",
                &plan.decision,
                plan.reason.map(|reason| reason.as_str()),
                plan.explored,
            );
        }

        debug!(
            phase = ?plan.phase,
            debt = debt.debt,
            decision = %plan.decision,
            "Fast cycle complete"
        );

        Ok(FastCycleReport {
            snapshot,
            plan,
            debt,
            outcome,
        })
    }
}

/// What one slow cycle observed and did
#[derive(Debug, Clone, PartialEq)]
pub struct SlowCycleReport {
    pub drift: DriftOutcome,
    /// `None` when drift was not detected or matching is disabled
    pub matched: Option<MatchOutcome>,
    pub decision: Decision,
    pub outcome: ExecutionOutcome,
}

/// Drift detector → version matcher → planner → executor
pub struct SlowCycle {
    ctx: Arc<CycleContext>,
    detector: DriftDetector,
    matcher: Option<VersionMatcher>,
    planner: DecisionPlanner,
}

impl SlowCycle {
    /// Without a matcher every detected drift retrains
    pub fn new(
        ctx: Arc<CycleContext>,
        detector: DriftDetector,
        matcher: Option<VersionMatcher>,
        planner: DecisionPlanner,
    ) -> Self {
        Self {
            ctx,
            detector,
            matcher,
            planner,
        }
    }

    pub async fn run_once(&self) -> Result<SlowCycleReport> {
        let ctx = &self.ctx;
        let thresholds = ctx.thresholds.current().await;

        let drift = self
            .detector
            .check(ctx.log.as_ref(), &ctx.store, &thresholds)
            .await
            .context("Drift detection failed")?;

        let report = match &drift {
            DriftOutcome::Insufficient { .. } => {
                return Ok(SlowCycleReport {
                    drift,
                    matched: None,
                    decision: Decision::None,
                    outcome: ExecutionOutcome::Unchanged,
                });
            }
            DriftOutcome::Report(report) => *report,
        };

        ctx.metrics.record_drift(&report);
        ctx.logger.log_drift(&report);

        let active = ctx.executor.slot().current().await?;
        let matched = match (&self.matcher, report.drift_detected) {
            (Some(matcher), true) => {
                let reference: DriftReferenceSet = ctx.store.load(StateKey::DriftReference).await?;
                let outcome = matcher
                    .match_version(
                        ctx.executor.slot().versions(),
                        active.family,
                        &reference.values,
                        thresholds.version_accept_threshold,
                    )
                    .await
                    .context("Version matching failed")?;
                debug!(outcome = ?outcome, family = %active.family, "Version match evaluated");
                Some(outcome)
            }
            _ => None,
        };

        let decision = self
            .planner
            .plan_drift(report.drift_detected, matched.as_ref(), &active);
        let outcome = ctx.executor.apply(&decision).await?;
        if !decision.is_none() {
            ctx.metrics.inc_decision(&decision);
            ctx.logger.log_decision("slow", &decision, Some("drift"), false);
        }

        Ok(SlowCycleReport {
            drift,
            matched,
            decision,
            outcome,
        })
    }
}
