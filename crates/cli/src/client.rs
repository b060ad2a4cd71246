//! API client for communicating with the controller's HTTP API

use adapt_lib::{
    health::{HealthResponse, ReadinessResponse},
    models::{ActiveModel, ModelKind, MonitorSnapshot},
    planner::DebtState,
    retrain::RetrainJob,
    versions::ModelVersion,
};
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the controller
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let (status, body) = self.get_raw(path).await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        serde_json::from_str(&body).context("Failed to parse response")
    }

    /// GET a health endpoint; 503 carries a body describing why
    pub async fn get_status<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let (status, body) = self.get_raw(path).await?;

        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            anyhow::bail!("API error ({}): {}", status, body);
        }

        serde_json::from_str(&body).context("Failed to parse response")
    }

    async fn get_raw(&self, path: &str) -> Result<(StatusCode, String)> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response")?;
        Ok((status, body))
    }

    pub async fn state(&self) -> Result<ControllerState> {
        self.get("api/v1/state").await
    }

    pub async fn versions(&self, family: ModelKind) -> Result<VersionList> {
        self.get(&format!("api/v1/versions/{}", family)).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get_status("healthz").await
    }

    pub async fn readiness(&self) -> Result<ReadinessResponse> {
        self.get_status("readyz").await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReferenceSummary {
    pub samples: usize,
    pub captured_at: i64,
    pub kl_divergence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerState {
    pub instance: String,
    pub run_mode: String,
    pub active: ActiveModel,
    pub debt: DebtState,
    pub ema_score: Option<f64>,
    #[serde(default)]
    pub family_scores: BTreeMap<ModelKind, f64>,
    pub cursor: u64,
    pub last_snapshot: Option<MonitorSnapshot>,
    pub drift_reference: Option<DriftReferenceSummary>,
    #[serde(default)]
    pub retrain_queue: Vec<RetrainJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionList {
    pub family: ModelKind,
    pub active_version: Option<u64>,
    pub versions: Vec<ModelVersion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATE_BODY: &str = r#"{
        "instance": "edge-1",
        "run_mode": "adaptive",
        "active": {"family": "svm", "version_id": 3, "installed": {"svm": 3}, "updated_at": 1700000000},
        "debt": {"debt": 0.42, "recovery_cycles_remaining": 0},
        "ema_score": 0.81,
        "family_scores": {"svm": 0.81, "linear": 0.6},
        "cursor": 250,
        "last_snapshot": null,
        "drift_reference": {"samples": 100, "captured_at": 1700000000, "kl_divergence": 0.12},
        "retrain_queue": []
    }"#;

    #[tokio::test]
    async fn test_state_parses_controller_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/state")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(STATE_BODY)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let state = client.state().await.unwrap();

        mock.assert_async().await;
        assert_eq!(state.active.family, ModelKind::Svm);
        assert_eq!(state.active.version_id, Some(3));
        assert_eq!(state.cursor, 250);
        assert_eq!(state.family_scores.get(&ModelKind::Linear), Some(&0.6));
        assert_eq!(state.drift_reference.unwrap().samples, 100);
    }

    #[tokio::test]
    async fn test_api_error_surfaces_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/versions/lstm")
            .with_status(500)
            .with_body(r#"{"error": "version registry unreadable"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.versions(ModelKind::Lstm).await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("500"));
        assert!(message.contains("version registry unreadable"));
    }

    #[tokio::test]
    async fn test_health_accepts_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_body(r#"{"status": "unhealthy", "components": {"state_store": {"status": "unhealthy", "message": "read-only", "last_success": null, "last_failure": 1700000000, "consecutive_failures": 3, "failures_total": 4}}}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let health = client.health().await.unwrap();

        assert_eq!(health.status, adapt_lib::health::ComponentStatus::Unhealthy);
        assert_eq!(health.components.len(), 1);
        assert_eq!(health.components["state_store"].consecutive_failures, 3);
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
