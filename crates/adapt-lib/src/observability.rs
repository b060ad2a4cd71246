//! Observability infrastructure for the adaptive controller
//!
//! Provides:
//! - Prometheus metrics (cycle latency, debt, scores, drift, decisions, retraining)
//! - Structured JSON logging with tracing

use crate::drift::DriftReport;
use crate::models::{Decision, ModelKind};
use crate::retrain::CostQuote;
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, Gauge, GaugeVec, HistogramVec, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle durations (in seconds)
const CYCLE_LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0, 60.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AdaptMetricsInner> = OnceLock::new();

struct AdaptMetricsInner {
    cycle_latency_seconds: HistogramVec,
    cycle_errors: IntCounterVec,
    decisions: IntCounterVec,
    explorations: IntCounter,
    energy_debt: Gauge,
    recovery_cycles_remaining: IntGauge,
    ema_score: Gauge,
    normalized_energy: Gauge,
    inference_latency_seconds: Gauge,
    kl_divergence: Gauge,
    drift_detections: IntCounter,
    active_model_info: GaugeVec,
    retrain_queue_depth: IntGauge,
    retrains_completed: IntCounter,
    retrain_failures: IntCounter,
}

impl AdaptMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram_vec!(
                "adapt_controller_cycle_latency_seconds",
                "Time spent in one controller cycle",
                &["cycle"],
                CYCLE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            cycle_errors: register_int_counter_vec!(
                "adapt_controller_cycle_errors_total",
                "Cycles that failed and were retried at the next tick",
                &["cycle"]
            )
            .expect("Failed to register cycle_errors"),

            decisions: register_int_counter_vec!(
                "adapt_controller_decisions_total",
                "Applied adaptation decisions by kind",
                &["kind"]
            )
            .expect("Failed to register decisions"),

            explorations: register_int_counter!(
                "adapt_controller_explorations_total",
                "Score switches that took the exploration branch"
            )
            .expect("Failed to register explorations"),

            energy_debt: register_gauge!(
                "adapt_controller_energy_debt",
                "Current accumulated energy debt"
            )
            .expect("Failed to register energy_debt"),

            recovery_cycles_remaining: register_int_gauge!(
                "adapt_controller_recovery_cycles_remaining",
                "Fast cycles left before switching is evaluated again"
            )
            .expect("Failed to register recovery_cycles_remaining"),

            ema_score: register_gauge!(
                "adapt_controller_ema_score",
                "Exponential moving average of the composite score"
            )
            .expect("Failed to register ema_score"),

            normalized_energy: register_gauge!(
                "adapt_controller_normalized_energy",
                "Normalized mean energy of the latest batch"
            )
            .expect("Failed to register normalized_energy"),

            inference_latency_seconds: register_gauge!(
                "adapt_controller_inference_latency_seconds",
                "Mean inference latency of the latest batch"
            )
            .expect("Failed to register inference_latency_seconds"),

            kl_divergence: register_gauge!(
                "adapt_controller_drift_kl_divergence",
                "KL divergence of the latest drift evaluation"
            )
            .expect("Failed to register kl_divergence"),

            drift_detections: register_int_counter!(
                "adapt_controller_drift_detections_total",
                "Drift evaluations that detected drift"
            )
            .expect("Failed to register drift_detections"),

            active_model_info: register_gauge_vec!(
                "adapt_controller_active_model_info",
                "Currently active model family and installed version",
                &["family", "version"]
            )
            .expect("Failed to register active_model_info"),

            retrain_queue_depth: register_int_gauge!(
                "adapt_controller_retrain_queue_depth",
                "Retraining jobs waiting in the queue"
            )
            .expect("Failed to register retrain_queue_depth"),

            retrains_completed: register_int_counter!(
                "adapt_controller_retrains_completed_total",
                "Retraining jobs that produced a new version"
            )
            .expect("Failed to register retrains_completed"),

            retrain_failures: register_int_counter!(
                "adapt_controller_retrain_failures_total",
                "Retraining jobs that failed"
            )
            .expect("Failed to register retrain_failures"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AdaptMetrics {
    _private: (),
}

impl Default for AdaptMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AdaptMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AdaptMetricsInner {
        GLOBAL_METRICS.get_or_init(AdaptMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, cycle: &str, duration_secs: f64) {
        self.inner()
            .cycle_latency_seconds
            .with_label_values(&[cycle])
            .observe(duration_secs);
    }

    pub fn inc_cycle_errors(&self, cycle: &str) {
        self.inner().cycle_errors.with_label_values(&[cycle]).inc();
    }

    pub fn inc_decision(&self, decision: &Decision) {
        self.inner()
            .decisions
            .with_label_values(&[decision.label()])
            .inc();
    }

    pub fn inc_explorations(&self) {
        self.inner().explorations.inc();
    }

    /// Update the ledger gauges
    pub fn set_debt(&self, debt: f64, recovery_cycles_remaining: u32) {
        self.inner().energy_debt.set(debt);
        self.inner()
            .recovery_cycles_remaining
            .set(recovery_cycles_remaining as i64);
    }

    /// Update the monitor gauges
    pub fn set_scores(&self, ema_score: f64, normalized_energy: f64, mean_latency: f64) {
        self.inner().ema_score.set(ema_score);
        self.inner().normalized_energy.set(normalized_energy);
        self.inner().inference_latency_seconds.set(mean_latency);
    }

    pub fn record_drift(&self, report: &DriftReport) {
        self.inner().kl_divergence.set(report.kl_divergence);
        if report.drift_detected {
            self.inner().drift_detections.inc();
        }
    }

    pub fn set_active_model(&self, family: ModelKind, version_id: Option<u64>) {
        let version = version_id
            .map(|v| v.to_string())
            .unwrap_or_else(|| "base".to_string());
        self.inner().active_model_info.reset();
        self.inner()
            .active_model_info
            .with_label_values(&[family.as_str(), version.as_str()])
            .set(1.0);
    }

    pub fn set_retrain_queue_depth(&self, depth: usize) {
        self.inner().retrain_queue_depth.set(depth as i64);
    }

    pub fn inc_retrains_completed(&self) {
        self.inner().retrains_completed.inc();
    }

    pub fn inc_retrain_failures(&self) {
        self.inner().retrain_failures.inc();
    }
}

/// Structured logger for controller events
///
/// Every record carries an `event` tag and the controller instance name.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_startup(&self, version: &str, run_mode: &str, active: ModelKind) {
        info!(
            event = "controller_started",
            instance = %self.instance,
            version = %version,
            run_mode = %run_mode,
            active_model = %active,
            "Adaptive controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Adaptive controller shutting down"
        );
    }

    /// Log a decision that changed, or requested a change of, the active model
    pub fn log_decision(&self, cycle: &str, decision: &Decision, reason: Option<&str>, explored: bool) {
        info!(
            event = "decision_applied",
            instance = %self.instance,
            cycle = %cycle,
            decision = %decision,
            reason = reason.unwrap_or("none"),
            explored = explored,
            "Adaptation decision applied"
        );
    }

    pub fn log_recovery_entered(&self, debt: f64, recovery_cycles: u32, target: Option<ModelKind>) {
        warn!(
            event = "recovery_entered",
            instance = %self.instance,
            debt = debt,
            recovery_cycles = recovery_cycles,
            target = ?target,
            "Energy debt ceiling exceeded, forcing switch"
        );
    }

    pub fn log_drift(&self, report: &DriftReport) {
        if report.drift_detected {
            warn!(
                event = "drift_detected",
                instance = %self.instance,
                kl_divergence = report.kl_divergence,
                energy_distance = ?report.energy_distance,
                "Distribution drift detected"
            );
        } else {
            info!(
                event = "drift_checked",
                instance = %self.instance,
                kl_divergence = report.kl_divergence,
                energy_distance = ?report.energy_distance,
                "No distribution drift"
            );
        }
    }

    pub fn log_version_installed(&self, family: ModelKind, version_id: u64, checksum: &str) {
        info!(
            event = "version_installed",
            instance = %self.instance,
            family = %family,
            version_id = version_id,
            checksum = %checksum,
            "Model version installed into active slot"
        );
    }

    pub fn log_retrain_dispatched(&self, family: ModelKind, quote: &CostQuote, immediate: bool) {
        info!(
            event = "retrain_dispatched",
            instance = %self.instance,
            family = %family,
            region = %quote.region,
            cost = quote.cost,
            sustainability = quote.sustainability,
            immediate = immediate,
            "Retraining dispatched"
        );
    }

    pub fn log_retrain_completed(&self, family: ModelKind, version_id: u64) {
        info!(
            event = "retrain_completed",
            instance = %self.instance,
            family = %family,
            version_id = version_id,
            "Retraining produced a new version"
        );
    }

    pub fn log_retrain_failed(&self, family: ModelKind, error: &str) {
        warn!(
            event = "retrain_failed",
            instance = %self.instance,
            family = %family,
            error = %error,
            "Retraining failed, not retrying"
        );
    }

    pub fn log_cycle_error(&self, cycle: &str, error: &anyhow::Error) {
        warn!(
            event = "cycle_failed",
            instance = %self.instance,
            cycle = %cycle,
            error = %format!("{error:#}"),
            "Controller cycle failed, retrying at next tick"
        );
    }
}
