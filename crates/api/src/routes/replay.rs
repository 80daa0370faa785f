//! Replay Routes

use super::parse_session_id;
use crate::{ApiResult, AppState};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use pipeline::ReplayStatus;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct ReplayQuery {
    #[serde(default = "default_speed")]
    pub speed: f64,
}

fn default_speed() -> f64 {
    1.0
}

pub async fn list_replays(State(state): State<AppState>) -> Json<Vec<ReplayStatus>> {
    Json(state.service.replays().active())
}

pub async fn start_replay(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<ReplayQuery>,
) -> ApiResult<(StatusCode, Json<ReplayStatus>)> {
    let source = parse_session_id(&session_id)?;
    let handle = state.service.start_replay(source, params.speed)?;
    let status = handle.status();

    tokio::spawn(async move {
        match handle.wait().await {
            Ok(report) => info!(
                "Replay of {} ended {:?}: {} readings, {} alerts",
                report.source,
                report.final_state,
                report.readings_sent,
                report.alerts.len()
            ),
            Err(e) => warn!("Replay of {} failed: {}", source, e),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(status)))
}

pub async fn cancel_replay(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<StatusCode> {
    state.service.replays().cancel(parse_session_id(&session_id)?)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pause_replay(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<StatusCode> {
    state.service.replays().pause(parse_session_id(&session_id)?)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn resume_replay(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<StatusCode> {
    state.service.replays().resume(parse_session_id(&session_id)?)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::super::testing::call_json;
    use crate::testing::router;
    use axum::http::{Method, StatusCode};
    use std::time::Duration;
    use telemetry_core::SessionKind;

    #[tokio::test(start_paused = true)]
    async fn test_replay_lifecycle() {
        let (router, service) = router();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let source = service.current_session().id;
        service.pipeline().new_session().await.unwrap();

        let uri = format!("/api/v1/replay/{}?speed=0.5", source);
        let (status, started) = call_json(&router, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(started["source"], source.to_string());
        assert_eq!(started["speed"], 0.5);

        let (status, body) = call_json(&router, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("already being replayed"));

        let (status, _) = call_json(&router, Method::DELETE, &format!("/api/v1/sessions/{}", source), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let pause = format!("/api/v1/replay/{}/pause", source);
        let (status, _) = call_json(&router, Method::POST, &pause, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, active) = call_json(&router, Method::GET, "/api/v1/replay", None).await;
        assert_eq!(active.as_array().unwrap().len(), 1);

        let cancel = format!("/api/v1/replay/{}", source);
        let (status, _) = call_json(&router, Method::DELETE, &cancel, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let (status, _) = call_json(&router, Method::DELETE, &cancel, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        service.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_replay_of_empty_session_accepted() {
        let (router, service) = router();
        for _ in 0..20 {
            let empty = service.store().open_session(SessionKind::Live, vec![]).unwrap();
            service.store().close_session(&empty.id).unwrap();

            let uri = format!("/api/v1/replay/{}?speed=2", empty.id);
            let (status, body) = call_json(&router, Method::POST, &uri, None).await;
            assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
            assert_eq!(body["source"], empty.id.to_string());
            assert_eq!(body["speed"], 2.0);
        }
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_replay_bad_requests() {
        let (router, service) = router();
        let current = service.current_session().id;

        let uri = format!("/api/v1/replay/{}?speed=0", current);
        let (status, _) = call_json(&router, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/api/v1/replay/{}?speed=1000", current);
        let (status, _) = call_json(&router, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/api/v1/replay/{}", telemetry_core::SessionId::new());
        let (status, _) = call_json(&router, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        service.shutdown().await;
    }
}
