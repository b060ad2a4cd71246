//! HTTP API for health checks, Prometheus metrics and operator state

use adapt_lib::{
    health::{ComponentStatus, HealthRegistry},
    models::{ActiveModel, ModelKind, MonitorSnapshot},
    monitor::MonitorState,
    observability::AdaptMetrics,
    planner::DebtState,
    retrain::{RetrainJob, RetrainQueue},
    scheduler::RunMode,
    state::{DriftReferenceSet, StateKey, StateStore},
    versions::{ModelVersion, VersionStore},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AdaptMetrics,
    pub store: StateStore,
    pub versions: Arc<VersionStore>,
    pub retrain_queue: Arc<RetrainQueue>,
    pub run_mode: RunMode,
    pub instance: String,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: AdaptMetrics,
        store: StateStore,
        versions: Arc<VersionStore>,
        retrain_queue: Arc<RetrainQueue>,
        run_mode: RunMode,
        instance: String,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            store,
            versions,
            retrain_queue,
            run_mode,
            instance,
        }
    }
}

/// Summary of the stored drift reference set
#[derive(Debug, Serialize)]
pub struct DriftReferenceSummary {
    pub samples: usize,
    pub captured_at: i64,
    pub kl_divergence: f64,
}

/// Response of `GET /api/v1/state`
#[derive(Debug, Serialize)]
pub struct ControllerStateResponse {
    pub instance: String,
    pub run_mode: RunMode,
    pub active: ActiveModel,
    pub debt: DebtState,
    pub ema_score: Option<f64>,
    pub family_scores: BTreeMap<ModelKind, f64>,
    pub cursor: u64,
    pub last_snapshot: Option<MonitorSnapshot>,
    pub drift_reference: Option<DriftReferenceSummary>,
    pub retrain_queue: Vec<RetrainJob>,
}

/// Response of `GET /api/v1/versions/{family}`
#[derive(Debug, Serialize)]
pub struct VersionsResponse {
    pub family: ModelKind,
    pub active_version: Option<u64>,
    pub versions: Vec<ModelVersion>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// Per-component run history; 503 once a cycle or the state store keeps failing
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = if health.status == ComponentStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(health))
}

/// 200 once every enabled cycle has run, 503 otherwise
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Read-only snapshot of the persisted controller state
async fn controller_state(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = async {
        let active: ActiveModel = state.store.load(StateKey::ActiveModel).await?;
        let debt: DebtState = state.store.load(StateKey::Ledger).await?;
        let monitor: MonitorState = state.store.load(StateKey::Monitor).await?;
        let reference: DriftReferenceSet = state.store.load(StateKey::DriftReference).await?;
        Ok::<_, adapt_lib::error::StateError>((active, debt, monitor, reference))
    }
    .await;

    let (active, debt, monitor, reference) = match snapshot {
        Ok(parts) => parts,
        Err(e) => {
            warn!(error = %e, "Failed to read controller state");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let drift_reference = (!reference.values.is_empty()).then(|| DriftReferenceSummary {
        samples: reference.values.len(),
        captured_at: reference.captured_at,
        kl_divergence: reference.kl_divergence,
    });

    Json(ControllerStateResponse {
        instance: state.instance.clone(),
        run_mode: state.run_mode,
        active,
        debt,
        ema_score: monitor.ema_score,
        family_scores: monitor.family_scores,
        cursor: monitor.cursor,
        last_snapshot: monitor.last_snapshot,
        drift_reference,
        retrain_queue: state.retrain_queue.snapshot().await,
    })
    .into_response()
}

/// Stored versions of one family, oldest first
async fn family_versions(
    State(state): State<Arc<AppState>>,
    Path(family): Path<String>,
) -> Response {
    let family: ModelKind = match family.parse() {
        Ok(family) => family,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let versions = match state.versions.list(family).await {
        Ok(versions) => versions,
        Err(e) => {
            warn!(family = %family, error = %e, "Failed to list versions");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let active_version = match state.store.load::<ActiveModel>(StateKey::ActiveModel).await {
        Ok(active) => active.installed.get(&family).copied(),
        Err(e) => {
            warn!(error = %e, "Failed to read active model");
            None
        }
    };

    Json(VersionsResponse {
        family,
        active_version,
        versions,
    })
    .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/state", get(controller_state))
        .route("/api/v1/versions/:family", get(family_versions))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
