//! Binned distributions and divergence measures
//!
//! Both samples of a comparison are binned over their shared range so bin `i`
//! means the same interval on both sides. Each histogram is density
//! normalized, floored with [`PROBABILITY_FLOOR`] and renormalized to sum to 1.

use std::cmp::Ordering;

/// Additive floor keeping every bin strictly positive
pub const PROBABILITY_FLOOR: f64 = 1e-10;

/// Half-width used when every value of a comparison is identical
const DEGENERATE_HALF_WIDTH: f64 = 0.5;

/// Probability mass per bin over a fixed `[low, high]` range
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub low: f64,
    pub high: f64,
    pub probabilities: Vec<f64>,
}

impl Histogram {
    /// Bin `values` into `bins` equal-width bins over `[low, high]`.
    ///
    /// Values outside the range are clamped into the edge bins and non-finite
    /// values are ignored.
    pub fn build(values: &[f64], bins: usize, low: f64, high: f64) -> Self {
        let bins = bins.max(1);
        let width = (high - low) / bins as f64;

        let mut counts = vec![0u64; bins];
        let mut total = 0u64;
        for value in values.iter().copied().filter(|v| v.is_finite()) {
            let index = if width > 0.0 {
                (((value - low) / width).floor().max(0.0) as usize).min(bins - 1)
            } else {
                0
            };
            counts[index] += 1;
            total += 1;
        }

        // density = count / (n * width), then floor and renormalize to unit mass
        let mut probabilities: Vec<f64> = counts
            .iter()
            .map(|&count| {
                let density = if total > 0 && width > 0.0 {
                    count as f64 / (total as f64 * width)
                } else {
                    0.0
                };
                density + PROBABILITY_FLOOR
            })
            .collect();
        let mass: f64 = probabilities.iter().sum();
        for p in &mut probabilities {
            *p /= mass;
        }

        Self {
            low,
            high,
            probabilities,
        }
    }

    /// Bin two samples over the union of their ranges
    pub fn pair(reference: &[f64], current: &[f64], bins: usize) -> (Self, Self) {
        let (low, high) = shared_range(reference, current);
        (
            Self::build(reference, bins, low, high),
            Self::build(current, bins, low, high),
        )
    }

    pub fn bins(&self) -> usize {
        self.probabilities.len()
    }
}

/// Range covering every finite value of both samples
pub fn shared_range(a: &[f64], b: &[f64]) -> (f64, f64) {
    let (low, high) = a
        .iter()
        .chain(b)
        .copied()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });

    if !low.is_finite() {
        return (-DEGENERATE_HALF_WIDTH, DEGENERATE_HALF_WIDTH);
    }
    if high - low < f64::EPSILON {
        return (low - DEGENERATE_HALF_WIDTH, high + DEGENERATE_HALF_WIDTH);
    }
    (low, high)
}

/// `KL(p ‖ q) = Σ p·ln(p/q)` over two histograms with the same binning
pub fn kl_divergence(p: &Histogram, q: &Histogram) -> f64 {
    debug_assert_eq!(p.bins(), q.bins());
    p.probabilities
        .iter()
        .zip(&q.probabilities)
        .map(|(&pi, &qi)| pi * (pi / qi).ln())
        .sum::<f64>()
        .max(0.0)
}

/// KL divergence of `current` from `reference` using a shared binning
pub fn kl_between(reference: &[f64], current: &[f64], bins: usize) -> f64 {
    let (p, q) = Histogram::pair(reference, current, bins);
    kl_divergence(&p, &q)
}

/// 1-D earth-mover distance between two empirical distributions
///
/// Integral of `|F_a(x) - F_b(x)|` over the merged support.
pub fn wasserstein_distance(a: &[f64], b: &[f64]) -> f64 {
    let a = finite_sorted(a);
    let b = finite_sorted(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut all: Vec<f64> = a.iter().chain(&b).copied().collect();
    all.sort_by(|x, y| x.partial_cmp(y).unwrap_or(Ordering::Equal));

    let (na, nb) = (a.len() as f64, b.len() as f64);

    all.windows(2)
        .map(|pair| {
            let (x, next) = (pair[0], pair[1]);
            let cdf_a = a.partition_point(|v| *v <= x) as f64 / na;
            let cdf_b = b.partition_point(|v| *v <= x) as f64 / nb;
            (cdf_a - cdf_b).abs() * (next - x)
        })
        .sum()
}

fn finite_sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|x, y| x.partial_cmp(y).unwrap_or(Ordering::Equal));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, offset: f64) -> Vec<f64> {
        (0..n).map(|i| offset + i as f64 / n as f64).collect()
    }

    #[test]
    fn test_histogram_has_unit_mass() {
        let values = ramp(200, 0.0);
        let histogram = Histogram::build(&values, 50, 0.0, 1.0);
        let mass: f64 = histogram.probabilities.iter().sum();
        assert!((mass - 1.0).abs() < 1e-12);
        assert!(histogram.probabilities.iter().all(|p| *p > 0.0));
    }

    #[test]
    fn test_kl_identical_is_zero() {
        let values = ramp(500, 3.0);
        assert!(kl_between(&values, &values, 50).abs() < 1e-9);
    }

    #[test]
    fn test_kl_identical_constant_windows() {
        let values = vec![42.0; 500];
        assert!(kl_between(&values, &values, 50).abs() < 1e-9);
        assert_eq!(shared_range(&values, &values), (41.5, 42.5));
    }

    #[test]
    fn test_kl_disjoint_support_is_large() {
        let reference = ramp(500, 0.0);
        let current = ramp(500, 10.0);
        assert!(kl_between(&reference, &current, 50) > 5.0);
    }

    #[test]
    fn test_kl_is_asymmetric_and_directional() {
        // Concentrated vs spread over the same range
        let mut concentrated = vec![0.05; 450];
        concentrated.extend(ramp(50, 0.0));
        let spread = ramp(500, 0.0);

        let (p, q) = Histogram::pair(&concentrated, &spread, 10);
        let forward = kl_divergence(&p, &q);
        let backward = kl_divergence(&q, &p);

        assert!(forward > 0.0 && backward > 0.0);
        assert!((forward - backward).abs() > 1e-3);
        assert_eq!(forward, kl_between(&concentrated, &spread, 10));
        assert_eq!(backward, kl_between(&spread, &concentrated, 10));
    }

    #[test]
    fn test_wasserstein_shift() {
        let a = vec![0.0, 1.0, 2.0];
        let b = vec![5.0, 6.0, 7.0];
        assert!((wasserstein_distance(&a, &b) - 5.0).abs() < 1e-12);
        assert_eq!(wasserstein_distance(&a, &a), 0.0);
        assert_eq!(wasserstein_distance(&a, &[]), 0.0);
    }

    #[test]
    fn test_wasserstein_unequal_sizes() {
        let a = vec![0.0, 1.0];
        let b = vec![0.0, 0.0, 1.0, 1.0];
        assert!(wasserstein_distance(&a, &b).abs() < 1e-12);
    }
}
