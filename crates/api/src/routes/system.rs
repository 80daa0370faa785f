//! Health, PID catalogue, scenario and metrics routes

use super::body;
use crate::{ApiError, ApiResult, AppState};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signal_generator::Scenario;
use telemetry_core::{Channel, SessionId};

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub uptime_seconds: u64,
    pub pipeline_running: bool,
    pub current_session: SessionId,
    pub subscribers: usize,
    pub stored_readings: usize,
    pub active_replays: usize,
    pub archive_enabled: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let service = &state.service;
    let running = service.pipeline().is_running();
    Json(HealthResponse {
        status: if running { "healthy" } else { "stopped" }.to_string(),
        timestamp: Utc::now(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        pipeline_running: running,
        current_session: service.current_session().id,
        subscribers: service.hub().subscriber_count(),
        stored_readings: service.store().total_readings(),
        active_replays: service.replays().active().len(),
        archive_enabled: state.archive.is_some(),
    })
}

pub async fn list_pids(State(state): State<AppState>) -> Json<Vec<Channel>> {
    Json(state.service.channels().to_vec())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScenarioRequest {
    pub scenario: String,
}

pub async fn set_scenario(
    State(state): State<AppState>,
    payload: Result<Json<ScenarioRequest>, JsonRejection>,
) -> ApiResult<Json<ScenarioRequest>> {
    let request = body(payload)?;
    let scenario: Scenario = request
        .scenario
        .parse()
        .map_err(|e: signal_generator::UnknownScenario| ApiError::BadRequest(e.to_string()))?;
    state.service.set_scenario(scenario).await?;
    Ok(Json(ScenarioRequest {
        scenario: scenario.as_str().to_string(),
    }))
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => ApiError::NotFound("Metrics exporter not installed".into()).into_response(),
    }
}
