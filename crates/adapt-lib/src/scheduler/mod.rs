//! Controller scheduler
//!
//! Runs the fast cycle, the slow cycle and the retrain worker as
//! independent tasks with their own intervals. Every task stops on the
//! shared broadcast shutdown signal.

mod cycles;

pub use cycles::{CycleContext, FastCycle, FastCycleReport, SlowCycle, SlowCycleReport};

use crate::drift::DriftDetector;
use crate::error::StateError;
use crate::health::components;
use crate::planner::DecisionPlanner;
use crate::retrain::{RetrainDispatcher, RetrainWorker};
use crate::versions::VersionMatcher;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::info;

/// Which controller tasks run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Switching, drift handling with version reuse, and retraining
    #[default]
    Adaptive,
    /// Fast cycle only
    SwitchOnly,
    /// Slow cycle with version reuse, plus retraining
    DriftOnly,
    /// Slow cycle that always retrains on drift
    RetrainOnly,
    /// Nothing runs; the active model never changes
    Static,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Adaptive => "adaptive",
            RunMode::SwitchOnly => "switch_only",
            RunMode::DriftOnly => "drift_only",
            RunMode::RetrainOnly => "retrain_only",
            RunMode::Static => "static",
        }
    }

    pub fn runs_fast_cycle(&self) -> bool {
        matches!(self, RunMode::Adaptive | RunMode::SwitchOnly)
    }

    pub fn runs_slow_cycle(&self) -> bool {
        matches!(
            self,
            RunMode::Adaptive | RunMode::DriftOnly | RunMode::RetrainOnly
        )
    }

    pub fn matches_versions(&self) -> bool {
        matches!(self, RunMode::Adaptive | RunMode::DriftOnly)
    }

    pub fn runs_retrain_worker(&self) -> bool {
        self.runs_slow_cycle()
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "adaptive" => Ok(RunMode::Adaptive),
            "switch_only" => Ok(RunMode::SwitchOnly),
            "drift_only" => Ok(RunMode::DriftOnly),
            "retrain_only" => Ok(RunMode::RetrainOnly),
            "static" => Ok(RunMode::Static),
            other => Err(format!("unknown run mode: {other}")),
        }
    }
}

/// Cycle periods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Fast cycle period (default: 10 seconds)
    pub fast_interval: Duration,
    /// Slow cycle period (default: 60 seconds)
    pub slow_interval: Duration,
    /// Retrain queue poll period (default: 30 seconds)
    pub retrain_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fast_interval: Duration::from_secs(10),
            slow_interval: Duration::from_secs(60),
            retrain_interval: Duration::from_secs(30),
        }
    }
}

/// Owns the controller tasks for one run mode
pub struct AdaptationScheduler {
    ctx: Arc<CycleContext>,
    mode: RunMode,
    schedule: ScheduleConfig,
    fast: Option<FastCycle>,
    slow: Option<SlowCycle>,
    worker: Option<RetrainWorker>,
}

impl AdaptationScheduler {
    pub fn builder() -> AdaptationSchedulerBuilder {
        AdaptationSchedulerBuilder::new()
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn context(&self) -> &Arc<CycleContext> {
        &self.ctx
    }

    /// Run every enabled task until `shutdown` fires. The controller reports
    /// ready once each enabled cycle has completed a run.
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> Result<()> {
        info!(
            mode = %self.mode,
            fast_interval_secs = self.schedule.fast_interval.as_secs_f64(),
            slow_interval_secs = self.schedule.slow_interval.as_secs_f64(),
            "Starting adaptation scheduler"
        );

        if self.fast.is_some() {
            self.ctx.health.await_first_run(components::MONITOR).await;
        }
        if self.slow.is_some() {
            self.ctx.health.await_first_run(components::DRIFT).await;
        }

        let mut tasks = JoinSet::new();

        if let Some(fast) = self.fast.map(Arc::new) {
            let ctx = self.ctx.clone();
            let period = self.schedule.fast_interval;
            let shutdown = shutdown.subscribe();
            tasks.spawn(async move {
                run_cycle_loop("fast", components::MONITOR, period, ctx, shutdown, move || {
                    let fast = fast.clone();
                    async move { fast.run_once().await.map(|_| ()) }
                })
                .await
            });
        }

        if let Some(slow) = self.slow.map(Arc::new) {
            let ctx = self.ctx.clone();
            let period = self.schedule.slow_interval;
            let shutdown = shutdown.subscribe();
            tasks.spawn(async move {
                run_cycle_loop("slow", components::DRIFT, period, ctx, shutdown, move || {
                    let slow = slow.clone();
                    async move { slow.run_once().await.map(|_| ()) }
                })
                .await
            });
        }

        if let Some(worker) = self.worker {
            let shutdown = shutdown.subscribe();
            tasks.spawn(async move {
                if let Err(e) = worker.run(shutdown).await {
                    tracing::error!(error = %e, "Retrain worker stopped with error");
                }
            });
        }

        self.ctx.health.mark_running().await;

        if tasks.is_empty() {
            info!(mode = %self.mode, "No adaptive tasks for this run mode");
            let mut shutdown = shutdown.subscribe();
            let _ = shutdown.recv().await;
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Scheduler task panicked");
            }
        }

        info!("Adaptation scheduler stopped");
        Ok(())
    }
}

/// Tick `cycle` every `period` until shutdown; failures are logged and the
/// next tick runs normally.
async fn run_cycle_loop<F, Fut>(
    name: &'static str,
    component: &'static str,
    period: Duration,
    ctx: Arc<CycleContext>,
    mut shutdown: broadcast::Receiver<()>,
    mut cycle: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    info!(cycle = name, interval_secs = period.as_secs_f64(), "Starting controller cycle");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let start = Instant::now();
                let result = cycle().await;
                ctx.metrics.observe_cycle_latency(name, start.elapsed().as_secs_f64());

                match result {
                    Ok(()) => {
                        ctx.health.record_success(component).await;
                        ctx.health.record_success(components::STATE_STORE).await;
                    }
                    Err(e) => {
                        ctx.metrics.inc_cycle_errors(name);
                        ctx.logger.log_cycle_error(name, &e);
                        if e.chain().any(|cause| cause.is::<StateError>()) {
                            ctx.health
                                .record_failure(components::STATE_STORE, format!("{e:#}"))
                                .await;
                        }
                        ctx.health.record_failure(component, format!("{e:#}")).await;
                    }
                }
            }
            _ = shutdown.recv() => {
                info!(cycle = name, "Controller cycle received shutdown signal");
                break;
            }
        }
    }
}

/// Builder wiring cycles and the retrain worker for a run mode
pub struct AdaptationSchedulerBuilder {
    ctx: Option<Arc<CycleContext>>,
    mode: RunMode,
    schedule: ScheduleConfig,
    planner: DecisionPlanner,
    detector: DriftDetector,
    dispatcher: Option<Arc<RetrainDispatcher>>,
    rng_seed: Option<u64>,
}

impl AdaptationSchedulerBuilder {
    pub fn new() -> Self {
        Self {
            ctx: None,
            mode: RunMode::default(),
            schedule: ScheduleConfig::default(),
            planner: DecisionPlanner::default(),
            detector: DriftDetector::default(),
            dispatcher: None,
            rng_seed: None,
        }
    }

    pub fn context(mut self, ctx: Arc<CycleContext>) -> Self {
        self.ctx = Some(ctx);
        self
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn planner(mut self, planner: DecisionPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn detector(mut self, detector: DriftDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Dispatcher drained by the retrain worker
    pub fn dispatcher(mut self, dispatcher: Arc<RetrainDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn rng_seed(mut self, seed: Option<u64>) -> Self {
        self.rng_seed = seed;
        self
    }

    pub fn build(self) -> Result<AdaptationScheduler> {
        let ctx = self
            .ctx
            .ok_or_else(|| anyhow::anyhow!("Cycle context is required"))?;

        let fast = self
            .mode
            .runs_fast_cycle()
            .then(|| FastCycle::new(ctx.clone(), self.planner, self.rng_seed));

        let slow = self.mode.runs_slow_cycle().then(|| {
            let matcher = self
                .mode
                .matches_versions()
                .then(|| VersionMatcher::new(self.detector.config().bins));
            SlowCycle::new(ctx.clone(), self.detector, matcher, self.planner)
        });

        let worker = match (&self.dispatcher, self.mode.runs_retrain_worker()) {
            (Some(dispatcher), true) => Some(RetrainWorker::new(
                dispatcher.clone(),
                self.schedule.retrain_interval,
            )),
            _ => None,
        };

        Ok(AdaptationScheduler {
            ctx,
            mode: self.mode,
            schedule: self.schedule,
            fast,
            slow,
            worker,
        })
    }
}

impl Default for AdaptationSchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
