//! Reuse of stored versions whose training data fits the drifted regime

use super::store::VersionStore;
use crate::drift::kl_between;
use crate::error::VersionStoreError;
use crate::models::ModelKind;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Result of matching a drift reference set against stored versions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// Closest version is within `version_accept_threshold`
    Accepted {
        family: ModelKind,
        version_id: u64,
        divergence: f64,
    },
    /// Closest version is still too far away
    Rejected {
        family: ModelKind,
        version_id: u64,
        divergence: f64,
    },
    /// The family has no readable versions
    NoVersions,
}

/// Scores every stored version of a family against a reference set
#[derive(Debug, Clone, Copy)]
pub struct VersionMatcher {
    bins: usize,
}

impl VersionMatcher {
    /// `bins` should match the drift detector so divergences are comparable
    pub fn new(bins: usize) -> Self {
        Self { bins: bins.max(1) }
    }

    /// Pick the version minimizing `KL(reference ‖ training snapshot)`.
    ///
    /// Ties go to the newest version. Versions whose snapshot cannot be
    /// read are skipped.
    pub async fn match_version(
        &self,
        store: &VersionStore,
        family: ModelKind,
        reference: &[f64],
        accept_threshold: f64,
    ) -> Result<MatchOutcome, VersionStoreError> {
        let versions = store.list(family).await?;

        let mut scored = Vec::with_capacity(versions.len());
        for version in &versions {
            match store.training_data(version).await {
                Ok(snapshot) => {
                    let divergence = kl_between(reference, &snapshot, self.bins);
                    debug!(
                        family = %family,
                        version_id = version.version_id,
                        divergence,
                        "Scored model version"
                    );
                    scored.push((version.version_id, divergence));
                }
                Err(e) => {
                    warn!(
                        family = %family,
                        version_id = version.version_id,
                        error = %e,
                        "Skipping version with unreadable training data"
                    );
                }
            }
        }

        Ok(select_version(family, &scored, accept_threshold))
    }
}

/// Choose among `(version_id, divergence)` pairs
pub fn select_version(family: ModelKind, scored: &[(u64, f64)], accept_threshold: f64) -> MatchOutcome {
    let best = scored
        .iter()
        .filter(|(_, divergence)| divergence.is_finite())
        .min_by(|(a_id, a), (b_id, b)| {
            a.partial_cmp(b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b_id.cmp(a_id))
        });

    match best {
        None => MatchOutcome::NoVersions,
        Some(&(version_id, divergence)) if divergence < accept_threshold => MatchOutcome::Accepted {
            family,
            version_id,
            divergence,
        },
        Some(&(version_id, divergence)) => MatchOutcome::Rejected {
            family,
            version_id,
            divergence,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::RetentionPolicy;
    use tempfile::TempDir;

    fn uniform(n: usize, low: f64, high: f64) -> Vec<f64> {
        (0..n)
            .map(|i| low + (high - low) * (i as f64 + 0.5) / n as f64)
            .collect()
    }

    #[test]
    fn test_select_version_prefers_minimum_then_newest() {
        let scored = [(1, 0.3), (2, 0.05), (3, 0.05), (4, 0.9)];
        assert_eq!(
            select_version(ModelKind::Svm, &scored, 0.2),
            MatchOutcome::Accepted {
                family: ModelKind::Svm,
                version_id: 3,
                divergence: 0.05
            }
        );
    }

    #[test]
    fn test_select_version_rejects_above_threshold() {
        let scored = [(1, 0.8), (2, 0.5)];
        assert_eq!(
            select_version(ModelKind::Linear, &scored, 0.2),
            MatchOutcome::Rejected {
                family: ModelKind::Linear,
                version_id: 2,
                divergence: 0.5
            }
        );
        assert_eq!(
            select_version(ModelKind::Linear, &[], 0.2),
            MatchOutcome::NoVersions
        );
    }

    #[tokio::test]
    async fn test_match_finds_version_trained_on_same_regime() {
        let temp_dir = TempDir::new().unwrap();
        let store = VersionStore::new(temp_dir.path(), RetentionPolicy::KeepAll).unwrap();

        store
            .register(ModelKind::Lstm, b"low", &uniform(400, 0.0, 1.0))
            .await
            .unwrap();
        store
            .register(ModelKind::Lstm, b"high", &uniform(400, 10.0, 11.0))
            .await
            .unwrap();

        let matcher = VersionMatcher::new(50);
        let outcome = matcher
            .match_version(&store, ModelKind::Lstm, &uniform(1000, 10.0, 11.0), 0.2)
            .await
            .unwrap();

        let MatchOutcome::Accepted { version_id, divergence, .. } = outcome else {
            panic!("expected an accepted match, got {outcome:?}");
        };
        assert_eq!(version_id, 2);
        assert!(divergence < 0.2);
    }

    #[tokio::test]
    async fn test_match_falls_back_when_every_version_is_far() {
        let temp_dir = TempDir::new().unwrap();
        let store = VersionStore::new(temp_dir.path(), RetentionPolicy::KeepAll).unwrap();
        store
            .register(ModelKind::Svm, b"a", &uniform(400, 0.0, 1.0))
            .await
            .unwrap();

        let matcher = VersionMatcher::new(50);
        let outcome = matcher
            .match_version(&store, ModelKind::Svm, &uniform(1000, 50.0, 60.0), 0.2)
            .await
            .unwrap();
        assert!(matches!(outcome, MatchOutcome::Rejected { version_id: 1, .. }));

        let empty = matcher
            .match_version(&store, ModelKind::Linear, &uniform(10, 0.0, 1.0), 0.2)
            .await
            .unwrap();
        assert_eq!(empty, MatchOutcome::NoVersions);
    }
}
