//! Telemetry Gateway API Server
//!
//! REST API and WebSocket stream in front of the telemetry pipeline.

use axum::{
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use pipeline::TelemetryService;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod error;
mod routes;
mod server;
mod settings;

pub use error::{ApiError, ApiResult};
pub use routes::stream::WsTransport;
pub use server::run_server;
pub use settings::{ArchiveSettings, CloudSettings, LoggingSettings, ServerSettings, Settings, DEFAULT_SETTINGS_FILE};

use archive::SqliteArchive;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TelemetryService>,
    /// Present when the SQLite archive is enabled
    pub archive: Option<SqliteArchive>,
    /// Present when the Prometheus recorder is installed
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(service: Arc<TelemetryService>) -> Self {
        Self {
            service,
            archive: None,
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn with_archive(mut self, archive: SqliteArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(routes::system::health))
        .route("/api/v1/pids", get(routes::system::list_pids))
        .route("/api/v1/scenario", post(routes::system::set_scenario))
        .route(
            "/api/v1/sessions",
            get(routes::sessions::list_sessions).post(routes::sessions::new_session),
        )
        .route("/api/v1/sessions/current/recent", get(routes::sessions::recent))
        .route(
            "/api/v1/sessions/:id",
            get(routes::sessions::get_session).delete(routes::sessions::delete_session),
        )
        .route("/api/v1/export", post(routes::sessions::export_session))
        .route(
            "/api/v1/alerts",
            get(routes::alerts::list_alerts).post(routes::alerts::create_alert),
        )
        .route("/api/v1/alerts/history", get(routes::alerts::alert_history))
        .route(
            "/api/v1/alerts/:id",
            put(routes::alerts::update_alert).delete(routes::alerts::delete_alert),
        )
        .route("/api/v1/alerts/:id/enable", post(routes::alerts::enable_alert))
        .route("/api/v1/alerts/:id/disable", post(routes::alerts::disable_alert))
        .route("/api/v1/replay", get(routes::replay::list_replays))
        .route(
            "/api/v1/replay/:session_id",
            post(routes::replay::start_replay).delete(routes::replay::cancel_replay),
        )
        .route("/api/v1/replay/:session_id/pause", post(routes::replay::pause_replay))
        .route("/api/v1/replay/:session_id/resume", post(routes::replay::resume_replay))
        .route("/ws/telemetry", get(routes::stream::telemetry_socket))
        .route("/metrics", get(routes::system::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Initialize logging. Unknown levels fall back to `info`.
pub fn init_logging(level: &str, json: bool) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);
    if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}
