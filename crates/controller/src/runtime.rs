//! Process wiring: builds every controller component from configuration

use crate::api::AppState;
use crate::config::ControllerConfig;
use adapt_lib::drift::DriftDetector;
use adapt_lib::executor::{ActiveSlot, Executor};
use adapt_lib::health::HealthRegistry;
use adapt_lib::models::ActiveModel;
use adapt_lib::monitor::{JsonlPredictionLog, PredictionLog};
use adapt_lib::observability::{AdaptMetrics, StructuredLogger};
use adapt_lib::planner::DecisionPlanner;
use adapt_lib::retrain::{
    default_regions, ProcessTrainer, RetrainDispatcher, SimulatedCostFeed, Trainer,
};
use adapt_lib::scheduler::{AdaptationScheduler, CycleContext};
use adapt_lib::sim::{SimulatedTrainer, SyntheticService};
use adapt_lib::state::{FileBackend, StateKey, StateStore};
use adapt_lib::versions::VersionStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// A fully wired controller, ready to run
pub struct Controller {
    config: ControllerConfig,
    health: HealthRegistry,
    metrics: AdaptMetrics,
    logger: StructuredLogger,
    store: StateStore,
    versions: Arc<VersionStore>,
    dispatcher: Arc<RetrainDispatcher>,
    scheduler: AdaptationScheduler,
    simulator: Option<SyntheticService>,
}

impl Controller {
    pub async fn build(config: ControllerConfig) -> Result<Self> {
        let health = HealthRegistry::with_controller_components().await;
        let metrics = AdaptMetrics::new();
        let logger = StructuredLogger::new(&config.instance);

        let backend = FileBackend::new(&config.state_dir)
            .with_context(|| format!("Failed to open state directory {:?}", config.state_dir))?;
        let store = StateStore::new(Arc::new(backend));
        let log: Arc<dyn PredictionLog> = Arc::new(JsonlPredictionLog::new(&config.log_path));
        let versions = Arc::new(
            VersionStore::new(&config.versions_dir, config.retention())
                .with_context(|| format!("Failed to open version store {:?}", config.versions_dir))?,
        );
        let slot = ActiveSlot::new(store.clone(), versions.clone(), &config.active_dir);

        let trainer: Arc<dyn Trainer> = match &config.trainer_command {
            Some(command) => Arc::new(ProcessTrainer::new(
                command.clone(),
                config.trainer_args.clone(),
                &config.work_dir,
            )),
            None => {
                info!("No trainer command configured, using the simulated trainer");
                Arc::new(SimulatedTrainer)
            }
        };
        let costs = Arc::new(SimulatedCostFeed::new(default_regions(), config.rng_seed));
        let dispatcher = Arc::new(
            RetrainDispatcher::new(costs, trainer, slot.clone(), health.clone(), logger.clone())
                .with_immediate_cost_threshold(config.immediate_cost_threshold),
        );
        let executor = Arc::new(Executor::new(slot, Some(dispatcher.clone()), logger.clone()));

        let ctx = Arc::new(CycleContext::new(
            store.clone(),
            log.clone(),
            config.thresholds(),
            executor,
            health.clone(),
            logger.clone(),
        ));
        let scheduler = AdaptationScheduler::builder()
            .context(ctx)
            .mode(config.run_mode)
            .schedule(config.schedule())
            .planner(DecisionPlanner::new(config.policy))
            .detector(DriftDetector::new(config.drift, config.policy.drift_signals))
            .dispatcher(dispatcher.clone())
            .rng_seed(config.rng_seed)
            .build()?;

        let simulator = config
            .simulate
            .then(|| SyntheticService::new(log, store.clone(), config.simulation.clone()));

        Ok(Self {
            config,
            health,
            metrics,
            logger,
            store,
            versions,
            dispatcher,
            scheduler,
            simulator,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Shared state for the HTTP API
    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState::new(
            self.health.clone(),
            self.metrics.clone(),
            self.store.clone(),
            self.versions.clone(),
            self.dispatcher.queue().clone(),
            self.config.run_mode,
            self.config.instance.clone(),
        ))
    }

    pub async fn active_model(&self) -> Result<ActiveModel> {
        Ok(self.store.load(StateKey::ActiveModel).await?)
    }

    /// Run the scheduler (and the synthetic service, if enabled) until
    /// `shutdown` fires
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> Result<()> {
        let active = self.active_model().await?;
        self.metrics.set_active_model(active.family, active.version_id);

        let simulator = self.simulator.map(|service| {
            let receiver = shutdown.subscribe();
            tokio::spawn(service.run(receiver))
        });

        self.scheduler.run(shutdown).await?;

        if let Some(handle) = simulator {
            handle.await.context("Synthetic inference service panicked")?;
        }
        Ok(())
    }
}
