//! Compute cost and sustainability quotes for retraining jobs

use chrono::{DateTime, Timelike, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Price and sustainability of running a job in one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostQuote {
    pub region: String,
    /// Price per unit of training work
    pub cost: f64,
    /// 0..1, higher is greener
    pub sustainability: f64,
}

/// Cost/sustainability collaborator consulted once per retraining evaluation
pub trait CostFeed: Send + Sync {
    fn quote(&self, at: DateTime<Utc>) -> CostQuote;
}

/// A compute region with a static base price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub base_cost: f64,
    pub sustainability: f64,
}

impl Region {
    pub fn new(name: impl Into<String>, base_cost: f64, sustainability: f64) -> Self {
        Self {
            name: name.into(),
            base_cost,
            sustainability,
        }
    }
}

/// Regions offered by the simulated feed
pub fn default_regions() -> Vec<Region> {
    vec![
        Region::new("Amsterdam", 0.5, 0.9),
        Region::new("India", 0.2, 0.5),
        Region::new("USA", 0.35, 0.7),
    ]
}

/// Hours (inclusive) during which demand pushes prices up
const PEAK_HOURS: std::ops::RangeInclusive<u32> = 6..=18;

/// Randomly priced regions with a day/night demand cycle.
///
/// Daytime prices rise 20-50% over base; at night they move between -10%
/// and +20%. Each quote comes from a region picked uniformly at random.
pub struct SimulatedCostFeed {
    regions: Vec<Region>,
    rng: Mutex<StdRng>,
}

impl SimulatedCostFeed {
    pub fn new(regions: Vec<Region>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            regions,
            rng: Mutex::new(rng),
        }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Price of `region` at `at`, rounded to three decimals
    pub fn price<R: Rng + ?Sized>(region: &Region, at: DateTime<Utc>, rng: &mut R) -> f64 {
        let fluctuation = if PEAK_HOURS.contains(&at.hour()) {
            rng.gen_range(0.2..=0.5)
        } else {
            rng.gen_range(-0.1..=0.2)
        };
        (region.base_cost * (1.0 + fluctuation) * 1000.0).round() / 1000.0
    }
}

impl Default for SimulatedCostFeed {
    fn default() -> Self {
        Self::new(default_regions(), None)
    }
}

impl CostFeed for SimulatedCostFeed {
    fn quote(&self, at: DateTime<Utc>) -> CostQuote {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match self.regions.choose(&mut *rng) {
            Some(region) => CostQuote {
                region: region.name.clone(),
                cost: Self::price(region, at, &mut *rng),
                sustainability: region.sustainability,
            },
            None => CostQuote {
                region: "unknown".to_string(),
                cost: f64::INFINITY,
                sustainability: 0.0,
            },
        }
    }
}

/// Always returns the same quote
#[derive(Debug, Clone)]
pub struct FixedCostFeed(pub CostQuote);

impl CostFeed for FixedCostFeed {
    fn quote(&self, _at: DateTime<Utc>) -> CostQuote {
        self.0.clone()
    }
}
