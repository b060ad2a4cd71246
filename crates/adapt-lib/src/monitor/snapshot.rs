//! Cursor-based metrics monitor
//!
//! Turns the records appended since the last cycle into one performance and
//! energy snapshot. The cursor is persisted with the EMA scores, so a
//! restarted controller never counts a record twice.

use super::log::{LogBatch, PredictionLog};
use super::metrics::{
    batch_accuracy, composite_score, ema, mean_energy, mean_latency, normalize_energy,
};
use crate::config::{AdaptationPolicy, ThresholdConfig};
use crate::models::{ModelKind, MonitorSnapshot, PredictionRecord};
use crate::state::{StateKey, StateStore};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Persisted monitor state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorState {
    /// Log offset of the first unprocessed record
    pub cursor: u64,
    /// Overall EMA of the composite score
    pub ema_score: Option<f64>,
    /// EMA of the composite score per family that served records
    pub family_scores: BTreeMap<ModelKind, f64>,
    /// Lowest and highest per-record energy seen so far
    pub observed_energy: Option<(f64, f64)>,
    pub last_snapshot: Option<MonitorSnapshot>,
}

/// Result of a monitor poll
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorPoll {
    /// The cursor already covers the whole log
    NoNewData,
    Snapshot(MonitorSnapshot),
}

/// A batch folded into a copy of the monitor state that is not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBatch {
    start: u64,
    state: MonitorState,
    poll: MonitorPoll,
}

impl PendingBatch {
    /// Monitor state as it will be after [`MetricsMonitor::commit`]
    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// Log offset the cursor moves to on commit
    pub fn next_offset(&self) -> u64 {
        self.state.cursor
    }

    /// `None` when every consumed line was unreadable
    pub fn snapshot(&self) -> Option<&MonitorSnapshot> {
        match &self.poll {
            MonitorPoll::Snapshot(snapshot) => Some(snapshot),
            MonitorPoll::NoNewData => None,
        }
    }
}

/// Metrics monitor reading forward from the prediction log
pub struct MetricsMonitor {
    log: Arc<dyn PredictionLog>,
}

impl MetricsMonitor {
    pub fn new(log: Arc<dyn PredictionLog>) -> Self {
        Self { log }
    }

    /// Read new records and fold them into a copy of the monitor state.
    ///
    /// Nothing is persisted; the cursor only moves on [`Self::commit`].
    pub async fn read(
        &self,
        store: &StateStore,
        thresholds: &ThresholdConfig,
        policy: &AdaptationPolicy,
    ) -> Result<Option<PendingBatch>> {
        let mut state: MonitorState = store.load(StateKey::Monitor).await?;
        let batch = self.log.read_from(state.cursor).await?;

        if batch.next_offset < state.cursor {
            warn!(
                cursor = state.cursor,
                log_len = batch.next_offset,
                "Prediction log is shorter than the cursor, waiting for new data"
            );
            return Ok(None);
        }

        if batch.consumed() == 0 {
            debug!(cursor = state.cursor, "No new prediction records");
            return Ok(None);
        }

        let start = state.cursor;
        let poll = observe(&mut state, &batch, thresholds, policy);
        Ok(Some(PendingBatch { start, state, poll }))
    }

    /// Persist a batch produced by [`Self::read`]
    pub async fn commit(&self, store: &StateStore, pending: PendingBatch) -> Result<MonitorPoll> {
        let poll = store
            .update(StateKey::Monitor, |state: &mut MonitorState| {
                if state.cursor != pending.start {
                    // Another writer advanced the cursor since we read it
                    return MonitorPoll::NoNewData;
                }
                *state = pending.state;
                pending.poll
            })
            .await?;
        Ok(poll)
    }

    /// Read and commit in one step
    pub async fn poll(
        &self,
        store: &StateStore,
        thresholds: &ThresholdConfig,
        policy: &AdaptationPolicy,
    ) -> Result<MonitorPoll> {
        match self.read(store, thresholds, policy).await? {
            Some(pending) => self.commit(store, pending).await,
            None => Ok(MonitorPoll::NoNewData),
        }
    }
}

/// Fold one batch into the monitor state
pub fn observe(
    state: &mut MonitorState,
    batch: &LogBatch,
    thresholds: &ThresholdConfig,
    policy: &AdaptationPolicy,
) -> MonitorPoll {
    state.cursor = batch.next_offset;

    let records = &batch.records;
    if records.is_empty() {
        return MonitorPoll::NoNewData;
    }

    for record in records {
        if !record.energy_cost.is_finite() {
            continue;
        }
        state.observed_energy = Some(match state.observed_energy {
            Some((low, high)) => (low.min(record.energy_cost), high.max(record.energy_cost)),
            None => (record.energy_cost, record.energy_cost),
        });
    }
    let bounds = policy
        .energy_bounds
        .or(state.observed_energy)
        .unwrap_or((0.0, 0.0));

    let score_of = |records: &[PredictionRecord]| {
        let accuracy = batch_accuracy(records, policy.accuracy_metric);
        let energy = mean_energy(records);
        let normalized = normalize_energy(energy, bounds);
        (
            accuracy,
            energy,
            normalized,
            composite_score(accuracy, normalized, thresholds.beta),
        )
    };

    let (accuracy, energy, normalized_energy, composite) = score_of(records);
    let ema_score = ema(state.ema_score, composite, thresholds.gamma);
    state.ema_score = Some(ema_score);

    let mut by_family: BTreeMap<ModelKind, Vec<PredictionRecord>> = BTreeMap::new();
    for record in records {
        by_family
            .entry(record.model_used)
            .or_default()
            .push(record.clone());
    }
    for (family, family_records) in by_family {
        let (_, _, _, family_composite) = score_of(&family_records);
        let previous = state.family_scores.get(&family).copied();
        state
            .family_scores
            .insert(family, ema(previous, family_composite, thresholds.gamma));
    }

    let snapshot = MonitorSnapshot {
        accuracy,
        normalized_energy,
        composite_score: composite,
        ema_score,
        mean_energy: energy,
        mean_latency: mean_latency(records),
        records: records.len(),
    };
    state.last_snapshot = Some(snapshot.clone());

    debug!(
        records = snapshot.records,
        accuracy = snapshot.accuracy,
        normalized_energy = snapshot.normalized_energy,
        ema_score = snapshot.ema_score,
        cursor = state.cursor,
        "Monitor batch processed"
    );

    MonitorPoll::Snapshot(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MemoryPredictionLog;

    fn record(model: ModelKind, truth: f64, predicted: f64, energy: f64) -> PredictionRecord {
        PredictionRecord {
            true_value: truth,
            predicted_value: predicted,
            inference_latency: 0.005,
            energy_cost: energy,
            model_used: model,
            sequence_offset: 0,
        }
    }

    async fn setup() -> (Arc<MemoryPredictionLog>, MetricsMonitor, StateStore) {
        let log = Arc::new(MemoryPredictionLog::new());
        let monitor = MetricsMonitor::new(log.clone());
        (log, monitor, StateStore::in_memory())
    }

    #[tokio::test]
    async fn test_empty_log_reports_no_new_data() {
        let (_log, monitor, store) = setup().await;
        let poll = monitor
            .poll(&store, &ThresholdConfig::default(), &AdaptationPolicy::default())
            .await
            .unwrap();
        assert_eq!(poll, MonitorPoll::NoNewData);
    }

    #[tokio::test]
    async fn test_cursor_prevents_double_counting() {
        let (log, monitor, store) = setup().await;
        let thresholds = ThresholdConfig::default();
        let policy = AdaptationPolicy::default();

        log.extend((0..4).map(|_| record(ModelKind::Linear, 10.0, 9.0, 5.0)))
            .await;

        let first = monitor.poll(&store, &thresholds, &policy).await.unwrap();
        let MonitorPoll::Snapshot(snapshot) = first else {
            panic!("expected a snapshot");
        };
        assert_eq!(snapshot.records, 4);

        // Nothing new: quiescent, not an error
        let second = monitor.poll(&store, &thresholds, &policy).await.unwrap();
        assert_eq!(second, MonitorPoll::NoNewData);

        log.extend((0..3).map(|_| record(ModelKind::Linear, 10.0, 9.0, 5.0)))
            .await;
        let MonitorPoll::Snapshot(third) = monitor.poll(&store, &thresholds, &policy).await.unwrap()
        else {
            panic!("expected a snapshot");
        };
        assert_eq!(third.records, 3);

        let state: MonitorState = store.load(StateKey::Monitor).await.unwrap();
        assert_eq!(state.cursor, 7);
    }

    #[tokio::test]
    async fn test_read_leaves_cursor_until_commit() {
        let (log, monitor, store) = setup().await;
        let thresholds = ThresholdConfig::default();
        let policy = AdaptationPolicy::default();

        log.extend((0..5).map(|_| record(ModelKind::Svm, 10.0, 9.5, 2.0)))
            .await;

        let pending = monitor
            .read(&store, &thresholds, &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.next_offset(), 5);
        assert_eq!(pending.snapshot().map(|s| s.records), Some(5));

        // Dropping an uncommitted batch replays it on the next read
        let state: MonitorState = store.load(StateKey::Monitor).await.unwrap();
        assert_eq!(state.cursor, 0);
        let again = monitor
            .read(&store, &thresholds, &policy)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again, pending);

        let poll = monitor.commit(&store, again).await.unwrap();
        assert!(matches!(poll, MonitorPoll::Snapshot(_)));
        let state: MonitorState = store.load(StateKey::Monitor).await.unwrap();
        assert_eq!(state.cursor, 5);

        // A stale batch never rewinds a cursor that already moved
        assert_eq!(
            monitor.commit(&store, pending).await.unwrap(),
            MonitorPoll::NoNewData
        );
    }

    #[test]
    fn test_observe_composite_and_ema() {
        let thresholds = ThresholdConfig {
            beta: 0.5,
            gamma: 0.5,
            ..Default::default()
        };
        let policy = AdaptationPolicy {
            energy_bounds: Some((0.0, 20.0)),
            ..Default::default()
        };
        let mut state = MonitorState {
            ema_score: Some(0.5),
            ..Default::default()
        };

        let batch = LogBatch {
            start: 0,
            next_offset: 2,
            records: vec![
                record(ModelKind::Svm, 100.0, 90.0, 10.0),
                record(ModelKind::Svm, 100.0, 110.0, 10.0),
            ],
        };

        let MonitorPoll::Snapshot(snapshot) = observe(&mut state, &batch, &thresholds, &policy)
        else {
            panic!("expected a snapshot");
        };

        // accuracy 0.9, normalized energy 0.5 -> composite 0.5*0.9 + 0.5*0.5 = 0.7
        assert!((snapshot.accuracy - 0.9).abs() < 1e-12);
        assert!((snapshot.normalized_energy - 0.5).abs() < 1e-12);
        assert!((snapshot.composite_score - 0.7).abs() < 1e-12);
        assert!((snapshot.ema_score - 0.6).abs() < 1e-12);
        assert_eq!(state.cursor, 2);
        assert!(state.family_scores.contains_key(&ModelKind::Svm));
        assert!(!state.family_scores.contains_key(&ModelKind::Lstm));
    }

    #[test]
    fn test_observed_energy_bounds_are_tracked() {
        let thresholds = ThresholdConfig::default();
        let policy = AdaptationPolicy::default();
        let mut state = MonitorState::default();

        let batch = LogBatch {
            start: 0,
            next_offset: 3,
            records: vec![
                record(ModelKind::Linear, 1.0, 1.0, 4.0),
                record(ModelKind::Lstm, 1.0, 1.0, 20.0),
                record(ModelKind::Svm, 1.0, 1.0, 12.0),
            ],
        };
        let MonitorPoll::Snapshot(snapshot) = observe(&mut state, &batch, &thresholds, &policy)
        else {
            panic!("expected a snapshot");
        };

        assert_eq!(state.observed_energy, Some((4.0, 20.0)));
        assert!((0.0..=1.0).contains(&snapshot.normalized_energy));
        assert_eq!(state.family_scores.len(), 3);
    }
}
