//! Epsilon-greedy model family selection

use crate::models::ModelKind;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Why a switch is being considered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    /// The EMA score fell below `min_score`
    Score,
    /// Energy debt exceeded `max_debt`
    Energy,
}

impl SwitchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchReason::Score => "score",
            SwitchReason::Energy => "energy",
        }
    }
}

/// A selected family and whether it came from the exploration branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub family: ModelKind,
    pub explored: bool,
}

/// Epsilon-greedy selection over the closed set of model families
#[derive(Debug, Clone, Copy)]
pub struct EpsilonGreedy {
    exploration_rate: f64,
}

impl EpsilonGreedy {
    pub fn new(exploration_rate: f64) -> Self {
        Self {
            exploration_rate: exploration_rate.clamp(0.0, 1.0),
        }
    }

    /// Pick a candidate family.
    ///
    /// Score switches explore uniformly with probability `exploration_rate`
    /// and otherwise take the highest tracked family EMA. Energy switches are
    /// never randomized: they take the lowest energy coefficient other than
    /// the active family, so the switch always reduces consumption.
    ///
    /// Returns `None` when no family qualifies (no tracked scores yet).
    pub fn select<R: Rng + ?Sized>(
        &self,
        active: ModelKind,
        reason: SwitchReason,
        family_scores: &BTreeMap<ModelKind, f64>,
        rng: &mut R,
    ) -> Option<Selection> {
        match reason {
            SwitchReason::Energy => ModelKind::most_efficient(Some(active)).map(|family| Selection {
                family,
                explored: false,
            }),
            SwitchReason::Score => {
                if rng.gen_bool(self.exploration_rate) {
                    return ModelKind::all().choose(rng).map(|family| Selection {
                        family: *family,
                        explored: true,
                    });
                }
                best_scoring(family_scores).map(|family| Selection {
                    family,
                    explored: false,
                })
            }
        }
    }
}

/// Highest tracked EMA; ties go to the cheaper family
fn best_scoring(family_scores: &BTreeMap<ModelKind, f64>) -> Option<ModelKind> {
    family_scores
        .iter()
        .filter(|(_, score)| score.is_finite())
        .max_by(|(a_kind, a), (b_kind, b)| {
            a.partial_cmp(b).unwrap_or(Ordering::Equal).then_with(|| {
                b_kind
                    .energy_coefficient()
                    .partial_cmp(&a_kind.energy_coefficient())
                    .unwrap_or(Ordering::Equal)
            })
        })
        .map(|(kind, _)| *kind)
}
