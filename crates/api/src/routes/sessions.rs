//! Session Routes

use super::{body, parse_session_id};
use crate::{ApiError, ApiResult, AppState};
use archive::{export_to_vec, ExportFormat, ExportRecord};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use session_store::StoreError;
use telemetry_core::{Reading, Session, SessionId, SessionSummary};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_list_limit")]
    pub limit: usize,
}

fn default_list_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent_seconds")]
    pub seconds: u64,
}

fn default_recent_seconds() -> u64 {
    60
}

/// Optional wall-clock range, RFC 3339
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ReadingsResponse {
    pub session_id: SessionId,
    pub count: usize,
    pub readings: Vec<ExportRecord>,
}

#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub session: Session,
    /// "memory" for the live store, "archive" for SQLite
    pub source: &'static str,
    pub count: usize,
    pub readings: Vec<ExportRecord>,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub session_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub format: Option<String>,
}

fn records(readings: &[Reading]) -> Vec<ExportRecord> {
    readings.iter().map(ExportRecord::from).collect()
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> ApiResult<Json<Vec<SessionSummary>>> {
    let mut sessions = state.service.store().list_sessions()?;
    sessions.truncate(params.limit);
    Ok(Json(sessions))
}

/// Close the current live session and start a new one
pub async fn new_session(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state.service.pipeline().new_session().await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn recent(
    State(state): State<AppState>,
    Query(params): Query<RecentQuery>,
) -> ApiResult<Json<ReadingsResponse>> {
    let session = state.service.current_session();
    let readings = state.service.store().recent(&session.id, params.seconds)?;
    Ok(Json(ReadingsResponse {
        session_id: session.id,
        count: readings.len(),
        readings: records(&readings),
    }))
}

/// Readings of one session, from memory or, failing that, the archive
async fn load(
    state: &AppState,
    id: SessionId,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> ApiResult<(Session, &'static str, Vec<ExportRecord>)> {
    let store = state.service.store();
    match store.session(&id) {
        Ok(session) => {
            let readings = match (start, end) {
                (None, None) => store.query_all(&id)?,
                (start, end) => store.query(
                    &id,
                    start.unwrap_or(DateTime::<Utc>::MIN_UTC),
                    end.unwrap_or(DateTime::<Utc>::MAX_UTC),
                )?,
            };
            Ok((session, "memory", records(&readings)))
        }
        Err(StoreError::UnknownSession(_)) => {
            let Some(archive) = &state.archive else {
                return Err(StoreError::UnknownSession(id).into());
            };
            if let (Some(start), Some(end)) = (start, end) {
                if start > end {
                    return Err(StoreError::InvalidRange { start, end }.into());
                }
            }
            let session = archive
                .sessions()
                .await?
                .into_iter()
                .find(|s| s.id == id)
                .ok_or(ApiError::NotFound(format!("Unknown session: {}", id)))?;
            let readings = archive
                .readings(id)
                .await?
                .into_iter()
                .filter(|r| start.map_or(true, |s| r.timestamp >= s) && end.map_or(true, |e| r.timestamp <= e))
                .collect();
            Ok((session, "archive", readings))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Json<SessionDetail>> {
    let id = parse_session_id(&id)?;
    let (session, source, readings) = load(&state, id, range.start, range.end).await?;
    Ok(Json(SessionDetail {
        session,
        source,
        count: readings.len(),
        readings,
    }))
}

pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let id = parse_session_id(&id)?;
    let in_memory = match state.service.delete_session(id) {
        Ok(()) => true,
        Err(pipeline::PipelineError::Store(StoreError::UnknownSession(_))) => false,
        Err(e) => return Err(e.into()),
    };
    let archived = match &state.archive {
        Some(archive) => archive.delete_session(id).await?,
        None => false,
    };
    if !in_memory && !archived {
        return Err(StoreError::UnknownSession(id).into());
    }
    info!("Deleted session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn export_session(
    State(state): State<AppState>,
    payload: Result<Json<ExportRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let request = body(payload)?;
    let id = parse_session_id(&request.session_id)?;
    let format: ExportFormat = match &request.format {
        Some(name) => name.parse()?,
        None => ExportFormat::default(),
    };
    let (_, _, readings) = load(&state, id, request.start_time, request.end_time).await?;
    let bytes = export_to_vec(&readings, format)?;
    if readings.is_empty() {
        warn!("Exporting empty session {}", id);
    }
    let disposition = format!("attachment; filename=\"session_{}.{}\"", id, format.extension());
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
