//! Controller health
//!
//! Every controller activity reports each run as a success or a failure.
//! A component degrades on its first failure. The cycles and the state
//! store turn unhealthy after [`UNHEALTHY_AFTER`] failures in a row, while
//! retraining stays degraded since the controller keeps adapting without it.
//! Readiness waits for the first successful run of every enabled cycle.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures after which a critical component is unhealthy
pub const UNHEALTHY_AFTER: u32 = 3;

/// Component names for health tracking
pub mod components {
    /// Fast cycle: monitor, ledger and switch planning
    pub const MONITOR: &str = "monitor";
    /// Slow cycle: drift detection and version matching
    pub const DRIFT: &str = "drift";
    pub const RETRAIN: &str = "retrain";
    pub const STATE_STORE: &str = "state_store";

    pub const ALL: [&str; 4] = [MONITOR, DRIFT, RETRAIN, STATE_STORE];

    /// Components whose repeated failures stop adaptation altogether
    pub const CRITICAL: [&str; 3] = [MONITOR, DRIFT, STATE_STORE];
}

/// Ordered from best to worst, so the overall status is the maximum
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

/// Run history of one component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    /// Error of the latest failure while the component is failing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_success: Option<i64>,
    pub last_failure: Option<i64>,
    pub consecutive_failures: u32,
    pub failures_total: u64,
}

impl ComponentHealth {
    fn succeeded(&mut self, now: i64) {
        self.status = ComponentStatus::Healthy;
        self.message = None;
        self.last_success = Some(now);
        self.consecutive_failures = 0;
    }

    fn failed(&mut self, message: String, now: i64, critical: bool) {
        self.consecutive_failures += 1;
        self.failures_total += 1;
        self.last_failure = Some(now);
        self.message = Some(message);
        self.status = if critical && self.consecutive_failures >= UNHEALTHY_AFTER {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
    }
}

/// Body of the liveness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Lifecycle {
    #[default]
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Default)]
struct RegistryState {
    lifecycle: Lifecycle,
    components: BTreeMap<String, ComponentHealth>,
    /// Cycles that have not completed a run yet
    awaiting_first_run: BTreeSet<String>,
}

/// Shared health of the controller's activities
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every controller component registered
    pub async fn with_controller_components() -> Self {
        let registry = Self::new();
        for name in components::ALL {
            registry.register(name).await;
        }
        registry
    }

    pub async fn register(&self, name: &str) {
        self.state
            .write()
            .await
            .components
            .entry(name.to_string())
            .or_default();
    }

    /// Hold readiness until `name` has completed one run
    pub async fn await_first_run(&self, name: &str) {
        let mut state = self.state.write().await;
        state.components.entry(name.to_string()).or_default();
        state.awaiting_first_run.insert(name.to_string());
    }

    pub async fn record_success(&self, name: &str) {
        let now = chrono::Utc::now().timestamp();
        let mut state = self.state.write().await;
        state.awaiting_first_run.remove(name);
        state
            .components
            .entry(name.to_string())
            .or_default()
            .succeeded(now);
    }

    pub async fn record_failure(&self, name: &str, message: impl Into<String>) {
        let now = chrono::Utc::now().timestamp();
        let critical = components::CRITICAL.contains(&name);
        self.state
            .write()
            .await
            .components
            .entry(name.to_string())
            .or_default()
            .failed(message.into(), now, critical);
    }

    /// Every task has been started
    pub async fn mark_running(&self) {
        self.state.write().await.lifecycle = Lifecycle::Running;
    }

    pub async fn mark_stopping(&self) {
        self.state.write().await.lifecycle = Lifecycle::Stopping;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|component| component.status)
            .max()
            .unwrap_or_default();
        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        let reason = match state.lifecycle {
            Lifecycle::Starting => Some("controller is starting".to_string()),
            Lifecycle::Stopping => Some("controller is shutting down".to_string()),
            Lifecycle::Running if !state.awaiting_first_run.is_empty() => {
                let pending: Vec<&str> =
                    state.awaiting_first_run.iter().map(String::as_str).collect();
                Some(format!("waiting for first {} run", pending.join(", ")))
            }
            Lifecycle::Running => state
                .components
                .iter()
                .find(|(_, component)| component.status == ComponentStatus::Unhealthy)
                .map(|(name, component)| {
                    format!(
                        "{name} failed {} times in a row: {}",
                        component.consecutive_failures,
                        component.message.as_deref().unwrap_or("unknown error")
                    )
                }),
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let health = HealthRegistry::new().health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_failure_then_success_resets_streak() {
        let registry = HealthRegistry::with_controller_components().await;
        registry
            .record_failure(components::MONITOR, "log device unavailable")
            .await;

        let health = registry.health().await;
        let monitor = &health.components[components::MONITOR];
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(monitor.consecutive_failures, 1);
        assert_eq!(monitor.message.as_deref(), Some("log device unavailable"));
        assert!(monitor.last_failure.is_some());

        registry.record_success(components::MONITOR).await;
        let health = registry.health().await;
        let monitor = &health.components[components::MONITOR];
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(monitor.consecutive_failures, 0);
        assert_eq!(monitor.failures_total, 1);
        assert_eq!(monitor.message, None);
    }

    #[tokio::test]
    async fn test_repeated_cycle_failures_turn_unhealthy() {
        let registry = HealthRegistry::with_controller_components().await;
        for _ in 0..UNHEALTHY_AFTER {
            registry
                .record_failure(components::STATE_STORE, "state directory not writable")
                .await;
        }
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_retrain_failures_only_degrade() {
        let registry = HealthRegistry::with_controller_components().await;
        registry.mark_running().await;
        for _ in 0..10 {
            registry
                .record_failure(components::RETRAIN, "trainer exited with status 1")
                .await;
        }

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(health.components[components::RETRAIN].failures_total, 10);
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_readiness_follows_lifecycle() {
        let registry = HealthRegistry::with_controller_components().await;
        let starting = registry.readiness().await;
        assert!(!starting.ready);
        assert_eq!(starting.reason.as_deref(), Some("controller is starting"));

        registry.mark_running().await;
        assert!(registry.readiness().await.ready);

        registry.mark_stopping().await;
        assert!(!registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_readiness_waits_for_first_cycle_runs() {
        let registry = HealthRegistry::with_controller_components().await;
        registry.await_first_run(components::MONITOR).await;
        registry.await_first_run(components::DRIFT).await;
        registry.mark_running().await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("waiting for first drift, monitor run")
        );

        // A failing run does not count as the first run
        registry.record_failure(components::DRIFT, "insufficient disk").await;
        registry.record_success(components::MONITOR).await;
        assert!(!registry.readiness().await.ready);

        registry.record_success(components::DRIFT).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_unhealthy_component_blocks_readiness() {
        let registry = HealthRegistry::with_controller_components().await;
        registry.mark_running().await;
        for _ in 0..UNHEALTHY_AFTER {
            registry.record_failure(components::MONITOR, "log gone").await;
        }

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("monitor failed 3 times in a row: log gone")
        );
    }
}
