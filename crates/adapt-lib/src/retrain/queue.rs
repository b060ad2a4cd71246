//! Cost-aware retraining queue
//!
//! Tracks every family with a retraining job queued or in flight, so a
//! repeated request for the same family is dropped instead of duplicated.

use super::cost::CostQuote;
use crate::models::ModelKind;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tokio::sync::Mutex;

/// A retraining request waiting for a cheap enough slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainJob {
    pub family: ModelKind,
    pub quote: CostQuote,
    pub queued_at: i64,
    /// Ground-truth snapshot the new version is trained on
    #[serde(skip)]
    pub training_data: Vec<f64>,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: Vec<RetrainJob>,
    /// Families queued or in flight
    pending: BTreeSet<ModelKind>,
}

/// Queue of retraining jobs ordered by cost, then sustainability
#[derive(Debug, Default)]
pub struct RetrainQueue {
    state: Mutex<QueueState>,
}

impl RetrainQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `family`; false if a job for it is already queued or running
    pub async fn try_claim(&self, family: ModelKind) -> bool {
        self.state.lock().await.pending.insert(family)
    }

    /// Release a family once its job finished, successfully or not
    pub async fn release(&self, family: ModelKind) {
        self.state.lock().await.pending.remove(&family);
    }

    pub async fn push(&self, job: RetrainJob) {
        let mut state = self.state.lock().await;
        state.pending.insert(job.family);
        state.jobs.push(job);
    }

    /// Remove the lowest-cost job; ties go to the most sustainable region
    /// and then to the oldest job. The family stays claimed until released.
    pub async fn pop_best(&self) -> Option<RetrainJob> {
        let mut state = self.state.lock().await;
        let index = state
            .jobs
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| job_order(a, b))
            .map(|(index, _)| index)?;
        Some(state.jobs.remove(index))
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_pending(&self, family: ModelKind) -> bool {
        self.state.lock().await.pending.contains(&family)
    }

    /// Queued jobs in dispatch order
    pub async fn snapshot(&self) -> Vec<RetrainJob> {
        let mut jobs = self.state.lock().await.jobs.clone();
        jobs.sort_by(job_order);
        jobs
    }
}

fn job_order(a: &RetrainJob, b: &RetrainJob) -> Ordering {
    a.quote
        .cost
        .partial_cmp(&b.quote.cost)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.quote
                .sustainability
                .partial_cmp(&a.quote.sustainability)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.queued_at.cmp(&b.queued_at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(family: ModelKind, cost: f64, sustainability: f64, queued_at: i64) -> RetrainJob {
        RetrainJob {
            family,
            quote: CostQuote {
                region: "test".to_string(),
                cost,
                sustainability,
            },
            queued_at,
            training_data: vec![1.0],
        }
    }

    #[tokio::test]
    async fn test_pop_best_orders_by_cost_then_sustainability() {
        let queue = RetrainQueue::new();
        queue.push(job(ModelKind::Linear, 0.5, 0.9, 1)).await;
        queue.push(job(ModelKind::Svm, 0.35, 0.5, 2)).await;
        queue.push(job(ModelKind::Lstm, 0.35, 0.7, 3)).await;

        assert_eq!(queue.pop_best().await.unwrap().family, ModelKind::Lstm);
        assert_eq!(queue.pop_best().await.unwrap().family, ModelKind::Svm);
        assert_eq!(queue.pop_best().await.unwrap().family, ModelKind::Linear);
        assert!(queue.pop_best().await.is_none());
    }

    #[tokio::test]
    async fn test_claims_prevent_duplicates_until_released() {
        let queue = RetrainQueue::new();
        assert!(queue.try_claim(ModelKind::Svm).await);
        assert!(!queue.try_claim(ModelKind::Svm).await);
        assert!(queue.try_claim(ModelKind::Lstm).await);

        queue.release(ModelKind::Svm).await;
        assert!(!queue.is_pending(ModelKind::Svm).await);
        assert!(queue.try_claim(ModelKind::Svm).await);
    }

    #[tokio::test]
    async fn test_popped_job_stays_pending() {
        let queue = RetrainQueue::new();
        queue.push(job(ModelKind::Linear, 0.4, 0.5, 0)).await;
        let popped = queue.pop_best().await.unwrap();
        assert!(queue.is_empty().await);
        assert!(queue.is_pending(popped.family).await);
    }

    #[tokio::test]
    async fn test_snapshot_is_in_dispatch_order() {
        let queue = RetrainQueue::new();
        queue.push(job(ModelKind::Linear, 0.6, 0.9, 0)).await;
        queue.push(job(ModelKind::Svm, 0.4, 0.5, 1)).await;
        let order: Vec<_> = queue.snapshot().await.iter().map(|j| j.family).collect();
        assert_eq!(order, vec![ModelKind::Svm, ModelKind::Linear]);
        assert_eq!(queue.len().await, 2);
    }
}
