//! Batch performance and energy metrics

use crate::config::AccuracyMetric;
use crate::models::PredictionRecord;

/// Ground truth closer to zero than this is excluded from percentage errors
const MIN_ABS_TRUTH: f64 = 1e-9;

/// `1 - MAPE` over records with non-zero ground truth
pub fn mape_accuracy(records: &[PredictionRecord]) -> Option<f64> {
    let errors: Vec<f64> = records
        .iter()
        .filter(|r| r.true_value.abs() > MIN_ABS_TRUTH)
        .map(|r| ((r.true_value - r.predicted_value) / r.true_value).abs())
        .collect();

    if errors.is_empty() {
        return None;
    }

    let mape = errors.iter().sum::<f64>() / errors.len() as f64;
    Some(1.0 - mape)
}

/// Coefficient of determination of the predictions
pub fn r2_score(records: &[PredictionRecord]) -> Option<f64> {
    if records.is_empty() {
        return None;
    }

    let n = records.len() as f64;
    let mean_truth = records.iter().map(|r| r.true_value).sum::<f64>() / n;
    let ss_res: f64 = records
        .iter()
        .map(|r| (r.true_value - r.predicted_value).powi(2))
        .sum();
    let ss_tot: f64 = records
        .iter()
        .map(|r| (r.true_value - mean_truth).powi(2))
        .sum();

    if ss_tot < f64::EPSILON {
        // Constant ground truth: perfect predictions score 1, anything else 0
        return Some(if ss_res < f64::EPSILON { 1.0 } else { 0.0 });
    }

    Some(1.0 - ss_res / ss_tot)
}

/// Batch accuracy under the configured metric; 0 when undefined
pub fn batch_accuracy(records: &[PredictionRecord], metric: AccuracyMetric) -> f64 {
    let accuracy = match metric {
        AccuracyMetric::Mape => mape_accuracy(records),
        AccuracyMetric::R2 => r2_score(records),
    };
    accuracy.unwrap_or(0.0)
}

pub fn mean_energy(records: &[PredictionRecord]) -> f64 {
    mean(records.iter().map(|r| r.energy_cost))
}

pub fn mean_latency(records: &[PredictionRecord]) -> f64 {
    mean(records.iter().map(|r| r.inference_latency))
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Min-max normalize an energy value into `[0, 1]`
pub fn normalize_energy(energy: f64, bounds: (f64, f64)) -> f64 {
    let (low, high) = bounds;
    let span = high - low;
    if !span.is_finite() || span < f64::EPSILON {
        return 0.0;
    }
    ((energy - low) / span).clamp(0.0, 1.0)
}

/// `beta * accuracy + (1 - beta) * (1 - normalized_energy)`
pub fn composite_score(accuracy: f64, normalized_energy: f64, beta: f64) -> f64 {
    beta * accuracy + (1.0 - beta) * (1.0 - normalized_energy)
}

/// `gamma * score + (1 - gamma) * previous`; the first score seeds the average
pub fn ema(previous: Option<f64>, score: f64, gamma: f64) -> f64 {
    match previous {
        Some(prev) => gamma * score + (1.0 - gamma) * prev,
        None => score,
    }
}
