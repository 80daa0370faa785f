//! API Errors

use alerting::AlertError;
use archive::ArchiveError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pipeline::{PipelineError, ReplayError};
use serde_json::json;
use session_store::StoreError;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownSession(_) => ApiError::NotFound(e.to_string()),
            StoreError::InvalidRange { .. } => ApiError::BadRequest(e.to_string()),
            StoreError::SessionClosed(_) | StoreError::DuplicateSession(_) => ApiError::Conflict(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AlertError> for ApiError {
    fn from(e: AlertError) -> Self {
        match e {
            AlertError::NotFound(_) => ApiError::NotFound(e.to_string()),
            AlertError::Storage(_) => ApiError::Internal(e.to_string()),
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<ReplayError> for ApiError {
    fn from(e: ReplayError) -> Self {
        match e {
            ReplayError::InvalidSpeed(_) => ApiError::BadRequest(e.to_string()),
            ReplayError::UnknownSession(_) | ReplayError::NotActive(_) => ApiError::NotFound(e.to_string()),
            ReplayError::Conflict(_) => ApiError::Conflict(e.to_string()),
            ReplayError::Store(e) => e.into(),
            ReplayError::Aborted(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::InvalidConfig(_) | PipelineError::Channel(_) => ApiError::BadRequest(e.to_string()),
            PipelineError::Store(e) => e.into(),
            PipelineError::Alert(e) => e.into(),
            PipelineError::Replay(e) => e.into(),
            PipelineError::SessionBusy(_) => ApiError::Conflict(e.to_string()),
            PipelineError::Generator(_) | PipelineError::Stopped => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ArchiveError> for ApiError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::UnknownFormat(_) => ApiError::BadRequest(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
