//! Retraining dispatch and the background queue worker

use super::cost::{CostFeed, CostQuote};
use super::queue::{RetrainJob, RetrainQueue};
use super::trainer::Trainer;
use crate::executor::ActiveSlot;
use crate::health::{components, HealthRegistry};
use crate::models::ModelKind;
use crate::observability::{AdaptMetrics, StructuredLogger};
use crate::versions::ModelVersion;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Quotes below this cost train immediately instead of queuing
pub const DEFAULT_IMMEDIATE_COST_THRESHOLD: f64 = 0.3;

/// How a retraining request was handled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Cheap enough: training started in the background
    Started { quote: CostQuote },
    /// Queued for the retrain worker
    Queued { quote: CostQuote },
    /// A job for this family is already queued or running
    AlreadyPending,
    /// No drift reference set to train on
    EmptySnapshot,
}

/// Routes retraining requests by cost and runs training jobs
pub struct RetrainDispatcher {
    queue: Arc<RetrainQueue>,
    costs: Arc<dyn CostFeed>,
    trainer: Arc<dyn Trainer>,
    slot: ActiveSlot,
    health: HealthRegistry,
    logger: StructuredLogger,
    metrics: AdaptMetrics,
    immediate_cost_threshold: f64,
    in_flight: Mutex<JoinSet<()>>,
}

impl RetrainDispatcher {
    pub fn new(
        costs: Arc<dyn CostFeed>,
        trainer: Arc<dyn Trainer>,
        slot: ActiveSlot,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            queue: Arc::new(RetrainQueue::new()),
            costs,
            trainer,
            slot,
            health,
            logger,
            metrics: AdaptMetrics::new(),
            immediate_cost_threshold: DEFAULT_IMMEDIATE_COST_THRESHOLD,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_immediate_cost_threshold(mut self, threshold: f64) -> Self {
        self.immediate_cost_threshold = threshold;
        self
    }

    pub fn queue(&self) -> &Arc<RetrainQueue> {
        &self.queue
    }

    /// Request a new version of `family` trained on `training_data`.
    ///
    /// Returns without waiting for training. A family that already has a
    /// job queued or running is not queued again.
    pub async fn request(self: &Arc<Self>, family: ModelKind, training_data: Vec<f64>) -> DispatchOutcome {
        if training_data.is_empty() {
            warn!(family = %family, "Retraining requested without a drift reference set");
            return DispatchOutcome::EmptySnapshot;
        }

        if !self.queue.try_claim(family).await {
            debug!(family = %family, "Retraining already pending");
            return DispatchOutcome::AlreadyPending;
        }

        let now = chrono::Utc::now();
        let quote = self.costs.quote(now);
        let job = RetrainJob {
            family,
            quote: quote.clone(),
            queued_at: now.timestamp(),
            training_data,
        };

        if quote.cost < self.immediate_cost_threshold {
            self.logger.log_retrain_dispatched(family, &quote, true);
            let dispatcher = Arc::clone(self);
            let mut in_flight = self.in_flight.lock().await;
            // Reap finished jobs so the set only holds running ones
            while in_flight.try_join_next().is_some() {}
            in_flight.spawn(async move {
                // Failures are logged and counted inside run_job
                let _ = dispatcher.run_job(job).await;
            });
            DispatchOutcome::Started { quote }
        } else {
            self.logger.log_retrain_dispatched(family, &quote, false);
            self.queue.push(job).await;
            self.metrics.set_retrain_queue_depth(self.queue.len().await);
            DispatchOutcome::Queued { quote }
        }
    }

    /// Run the best queued job, if any. Used by the retrain worker.
    pub async fn run_next(&self) -> Option<Result<ModelVersion>> {
        let job = self.queue.pop_best().await?;
        self.metrics.set_retrain_queue_depth(self.queue.len().await);
        info!(
            family = %job.family,
            region = %job.quote.region,
            cost = job.quote.cost,
            "Running queued retraining job"
        );
        Some(self.run_job(job).await)
    }

    /// Wait for every immediately dispatched job to finish
    pub async fn join_in_flight(&self) {
        let mut in_flight = self.in_flight.lock().await;
        while in_flight.join_next().await.is_some() {}
    }

    /// Train, register the version and refresh the family's active slot.
    ///
    /// The family claim is released whatever the outcome; failures are not
    /// retried.
    async fn run_job(&self, job: RetrainJob) -> Result<ModelVersion> {
        let family = job.family;
        let result = self.train_and_install(&job).await;
        self.queue.release(family).await;

        match &result {
            Ok(version) => {
                self.metrics.inc_retrains_completed();
                self.logger.log_retrain_completed(family, version.version_id);
                self.health.record_success(components::RETRAIN).await;
            }
            Err(e) => {
                let message = format!("{e:#}");
                self.metrics.inc_retrain_failures();
                self.logger.log_retrain_failed(family, &message);
                self.health
                    .record_failure(components::RETRAIN, format!("{family} retraining failed: {message}"))
                    .await;
            }
        }
        result
    }

    async fn train_and_install(&self, job: &RetrainJob) -> Result<ModelVersion> {
        let artifact = self
            .trainer
            .train(job.family, &job.training_data)
            .await
            .with_context(|| format!("Training {} failed", job.family))?;

        let version = self
            .slot
            .versions()
            .register(job.family, &artifact, &job.training_data)
            .await
            .context("Failed to register trained version")?;

        self.slot
            .install(job.family, version.version_id, false)
            .await
            .context("Failed to install trained version")?;

        Ok(version)
    }
}

/// Background worker draining the retraining queue
pub struct RetrainWorker {
    dispatcher: Arc<RetrainDispatcher>,
    interval: Duration,
}

impl RetrainWorker {
    pub fn new(dispatcher: Arc<RetrainDispatcher>, interval: Duration) -> Self {
        Self {
            dispatcher,
            interval,
        }
    }

    /// Run one queued job per tick until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut interval = tokio::time::interval(self.interval);
        info!(interval_secs = self.interval.as_secs_f64(), "Retrain worker started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let started = std::time::Instant::now();
                    match self.dispatcher.run_next().await {
                        Some(_) => {
                            AdaptMetrics::new()
                                .observe_cycle_latency("retrain", started.elapsed().as_secs_f64());
                        }
                        None => debug!("Retraining queue empty"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Retrain worker received shutdown signal");
                    break;
                }
            }
        }

        self.dispatcher.join_in_flight().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrainError;
    use crate::retrain::FixedCostFeed;
    use crate::state::StateStore;
    use crate::versions::{RetentionPolicy, VersionStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingTrainer {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Trainer for CountingTrainer {
        async fn train(&self, family: ModelKind, data: &[f64]) -> Result<Vec<u8>, TrainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TrainError::CommandFailed {
                    status: "exit status: 1".to_string(),
                    stderr: "diverged".to_string(),
                });
            }
            Ok(format!("{family}:{}", data.len()).into_bytes())
        }
    }

    struct Fixture {
        _temp_dir: TempDir,
        dispatcher: Arc<RetrainDispatcher>,
        trainer: Arc<CountingTrainer>,
        slot: ActiveSlot,
        health: HealthRegistry,
    }

    async fn fixture(cost: f64, fail: bool) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let versions = Arc::new(
            VersionStore::new(temp_dir.path().join("versions"), RetentionPolicy::KeepAll).unwrap(),
        );
        let slot = ActiveSlot::new(StateStore::in_memory(), versions, temp_dir.path().join("active"));
        let trainer = Arc::new(CountingTrainer {
            calls: AtomicUsize::new(0),
            fail,
        });
        let health = HealthRegistry::with_controller_components().await;
        let costs = Arc::new(FixedCostFeed(CostQuote {
            region: "India".to_string(),
            cost,
            sustainability: 0.5,
        }));

        let dispatcher = Arc::new(RetrainDispatcher::new(
            costs,
            trainer.clone(),
            slot.clone(),
            health.clone(),
            StructuredLogger::new("test"),
        ));

        Fixture {
            _temp_dir: temp_dir,
            dispatcher,
            trainer,
            slot,
            health,
        }
    }

    #[tokio::test]
    async fn test_finished_jobs_are_reaped() {
        let f = fixture(0.1, false).await;

        f.dispatcher.request(ModelKind::Linear, vec![1.0]).await;
        for _ in 0..100 {
            if !f.slot.versions().list(ModelKind::Linear).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        f.dispatcher.request(ModelKind::Svm, vec![2.0]).await;
        assert_eq!(f.dispatcher.in_flight.lock().await.len(), 1);

        f.dispatcher.join_in_flight().await;
        assert_eq!(f.trainer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cheap_quote_trains_immediately() {
        let f = fixture(0.2, false).await;

        let outcome = f.dispatcher.request(ModelKind::Svm, vec![1.0, 2.0, 3.0]).await;
        assert!(matches!(outcome, DispatchOutcome::Started { .. }));

        f.dispatcher.join_in_flight().await;
        assert_eq!(f.trainer.calls.load(Ordering::SeqCst), 1);

        let versions = f.slot.versions().list(ModelKind::Svm).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(
            std::fs::read(f.slot.artifact_path(ModelKind::Svm)).unwrap(),
            b"svm:3"
        );

        // The active family was linear; only the svm slot was refreshed
        let active = f.slot.current().await.unwrap();
        assert_eq!(active.family, ModelKind::Linear);
        assert_eq!(active.installed.get(&ModelKind::Svm), Some(&1));
        assert!(!f.dispatcher.queue().is_pending(ModelKind::Svm).await);
    }

    #[tokio::test]
    async fn test_expensive_quote_is_queued_once() {
        let f = fixture(0.45, false).await;

        let first = f.dispatcher.request(ModelKind::Lstm, vec![1.0]).await;
        let second = f.dispatcher.request(ModelKind::Lstm, vec![2.0]).await;

        assert!(matches!(first, DispatchOutcome::Queued { .. }));
        assert_eq!(second, DispatchOutcome::AlreadyPending);
        assert_eq!(f.dispatcher.queue().len().await, 1);
        assert_eq!(f.trainer.calls.load(Ordering::SeqCst), 0);

        let version = f.dispatcher.run_next().await.unwrap().unwrap();
        assert_eq!(version.family, ModelKind::Lstm);
        assert!(f.dispatcher.run_next().await.is_none());

        // Claim released after the job finished
        let third = f.dispatcher.request(ModelKind::Lstm, vec![3.0]).await;
        assert!(matches!(third, DispatchOutcome::Queued { .. }));
    }

    #[tokio::test]
    async fn test_failure_degrades_health_without_retry() {
        let f = fixture(0.9, true).await;

        f.dispatcher.request(ModelKind::Linear, vec![1.0]).await;
        let result = f.dispatcher.run_next().await.unwrap();
        assert!(result.is_err());
        assert_eq!(f.trainer.calls.load(Ordering::SeqCst), 1);
        assert!(f.dispatcher.run_next().await.is_none());

        let health = f.health.health().await;
        let retrain = &health.components[components::RETRAIN];
        assert_eq!(retrain.status, crate::health::ComponentStatus::Degraded);
        assert_eq!(retrain.failures_total, 1);
        assert!(retrain
            .message
            .as_deref()
            .is_some_and(|message| message.starts_with("linear retraining failed")));
        assert!(f.slot.versions().list(ModelKind::Linear).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_snapshot_is_not_dispatched() {
        let f = fixture(0.1, false).await;
        let outcome = f.dispatcher.request(ModelKind::Svm, Vec::new()).await;
        assert_eq!(outcome, DispatchOutcome::EmptySnapshot);
        assert!(!f.dispatcher.queue().is_pending(ModelKind::Svm).await);
    }

    #[tokio::test]
    async fn test_worker_drains_queue_and_stops() {
        let f = fixture(0.6, false).await;
        f.dispatcher.request(ModelKind::Svm, vec![1.0, 2.0]).await;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let worker = RetrainWorker::new(f.dispatcher.clone(), Duration::from_millis(10));
        let handle = tokio::spawn(worker.run(shutdown_rx));

        for _ in 0..100 {
            if f.trainer.calls.load(Ordering::SeqCst) == 1 && !f.dispatcher.queue().is_pending(ModelKind::Svm).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(f.slot.versions().list(ModelKind::Svm).await.unwrap().len(), 1);
    }
}
