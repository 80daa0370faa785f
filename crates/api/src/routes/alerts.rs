//! Alert Routes

use super::body;
use crate::{ApiError, ApiResult, AppState};
use alerting::{AlertConfig, AlertEvent, AlertId, AlertUpdate, NewAlert};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use pipeline::WireAlert;
use serde::{Deserialize, Serialize};

/// Query parameters for the history endpoint
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of events, newest kept
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct AlertListResponse {
    pub data: Vec<AlertConfig>,
    pub count: usize,
    pub enabled_count: usize,
}

#[derive(Debug, Serialize)]
pub struct AlertHistoryResponse {
    pub data: Vec<WireAlert>,
    pub count: usize,
}

fn parse_alert_id(raw: &str) -> Result<AlertId, ApiError> {
    raw.parse::<u64>()
        .map(AlertId)
        .map_err(|_| ApiError::BadRequest(format!("Invalid alert id: {}", raw)))
}

pub async fn list_alerts(State(state): State<AppState>) -> Json<AlertListResponse> {
    let data = state.service.alerts().list();
    Json(AlertListResponse {
        count: data.len(),
        enabled_count: data.iter().filter(|a| a.enabled).count(),
        data,
    })
}

pub async fn create_alert(
    State(state): State<AppState>,
    payload: Result<Json<NewAlert>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AlertConfig>)> {
    let alert = state.service.alerts().create(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

pub async fn update_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<AlertUpdate>, JsonRejection>,
) -> ApiResult<Json<AlertConfig>> {
    let id = parse_alert_id(&id)?;
    Ok(Json(state.service.alerts().update(id, body(payload)?).await?))
}

pub async fn delete_alert(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.service.alerts().remove(parse_alert_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn enable_alert(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<AlertConfig>> {
    Ok(Json(state.service.alerts().set_enabled(parse_alert_id(&id)?, true).await?))
}

pub async fn disable_alert(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<AlertConfig>> {
    Ok(Json(state.service.alerts().set_enabled(parse_alert_id(&id)?, false).await?))
}

/// Alerts fired in the current live session
pub async fn alert_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> ApiResult<Json<AlertHistoryResponse>> {
    let history: Vec<AlertEvent> = state.service.alert_history().await?;
    let skip = history.len().saturating_sub(params.limit);
    let data: Vec<WireAlert> = history[skip..].iter().map(WireAlert::from).collect();
    Ok(Json(AlertHistoryResponse {
        count: data.len(),
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::testing::call_json;
    use crate::testing::router;
    use crate::{create_router, AppState};
    use alerting::AlertConfig;
    use archive::SqliteArchive;
    use axum::http::{Method, StatusCode};
    use pipeline::{AlertStore, PipelineConfig, TelemetryService};
    use serde_json::json;
    use signal_generator::Scenario;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_alert_lifecycle() {
        let (router, service) = router();

        let (status, created) = call_json(
            &router,
            Method::POST,
            "/api/v1/alerts",
            Some(json!({"name": "Overboost", "pid": "BOOST", "condition": "GT", "threshold": 20.0})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["condition"], "gt");
        assert_eq!(created["enabled"], true);
        let id = created["id"].as_u64().unwrap();

        let (status, updated) = call_json(
            &router,
            Method::PUT,
            &format!("/api/v1/alerts/{}", id),
            Some(json!({"threshold": 25.5})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["threshold"], 25.5);
        assert_eq!(updated["name"], "Overboost");

        let (status, disabled) =
            call_json(&router, Method::POST, &format!("/api/v1/alerts/{}/disable", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(disabled["enabled"], false);

        let (_, list) = call_json(&router, Method::GET, "/api/v1/alerts", None).await;
        assert_eq!(list["count"], 1);
        assert_eq!(list["enabled_count"], 0);

        let (status, _) = call_json(&router, Method::DELETE, &format!("/api/v1/alerts/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = call_json(&router, Method::DELETE, &format!("/api/v1/alerts/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_alerts_rejected() {
        let (router, service) = router();
        let bad = [
            json!({"name": "x", "pid": "NOPE", "condition": "gt", "threshold": 1.0}),
            json!({"name": "x", "pid": "RPM", "condition": "approx", "threshold": 1.0}),
            json!({"name": "", "pid": "RPM", "condition": "gt", "threshold": 1.0}),
            json!({"pid": "RPM"}),
        ];
        for request in bad {
            let (status, body) = call_json(&router, Method::POST, "/api/v1/alerts", Some(request)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
            assert!(body["error"].is_string());
        }
        let (status, _) = call_json(&router, Method::POST, "/api/v1/alerts/abc/enable", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(service.alerts().list().is_empty());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_alert_changes_survive_restart() {
        let archive = SqliteArchive::in_memory().await.unwrap();
        let start = |saved: Vec<AlertConfig>| {
            let config = PipelineConfig::deterministic(7, Scenario::Idle);
            let service = TelemetryService::builder(config)
                .alert_store(Arc::new(archive.clone()) as Arc<dyn AlertStore>)
                .restore_alerts(saved)
                .start()
                .unwrap();
            let service = Arc::new(service);
            (create_router(AppState::new(Arc::clone(&service))), service)
        };

        let (router, service) = start(Vec::new());
        let (status, created) = call_json(
            &router,
            Method::POST,
            "/api/v1/alerts",
            Some(json!({"name": "Overboost", "pid": "BOOST", "condition": "gt", "threshold": 20.0})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_u64().unwrap();
        call_json(&router, Method::POST, &format!("/api/v1/alerts/{}/disable", id), None).await;
        service.shutdown().await;

        let (router, service) = start(archive.alert_configs().await.unwrap());
        let (_, list) = call_json(&router, Method::GET, "/api/v1/alerts", None).await;
        assert_eq!(list["count"], 1);
        assert_eq!(list["data"][0]["id"], id);
        assert_eq!(list["data"][0]["enabled"], false);

        let (_, next) = call_json(
            &router,
            Method::POST,
            "/api/v1/alerts",
            Some(json!({"name": "Redline", "pid": "RPM", "condition": "gte", "threshold": 6500.0})),
        )
        .await;
        assert_eq!(next["id"], id + 1);
        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_reports_live_alerts() {
        let (router, service) = router();
        call_json(
            &router,
            Method::POST,
            "/api/v1/alerts",
            Some(json!({"name": "High RPM", "pid": "RPM", "condition": "gt", "threshold": 3000.0})),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let (status, body) = call_json(&router, Method::GET, "/api/v1/alerts/history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["pid"], "RPM");
        assert!(body["data"][0]["message"].as_str().unwrap().starts_with("Alert 'High RPM': RPM = "));
        service.shutdown().await;
    }
}
