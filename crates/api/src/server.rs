//! Server bootstrap

use crate::{create_router, AppState, Settings};
use anyhow::Context;
use archive::SqliteArchive;
use cloud_sync::CloudSync;
use metrics_exporter_prometheus::PrometheusBuilder;
use pipeline::{AlertStore, Archiver, LogNotifier, Notifier, TelemetryService};
use std::sync::Arc;
use tracing::{info, warn};

/// Start the pipeline and serve the API until Ctrl-C
pub async fn run_server(settings: Settings) -> anyhow::Result<()> {
    let mut builder = TelemetryService::builder(settings.pipeline.clone())
        .notifier(Arc::new(LogNotifier) as Arc<dyn Notifier>);

    let archive = if settings.archive.enabled {
        let archive = SqliteArchive::connect(&settings.archive.database_url)
            .await
            .with_context(|| format!("opening archive {}", settings.archive.database_url))?;
        let saved = archive.alert_configs().await.context("loading saved alerts")?;
        info!("Loaded {} saved alerts", saved.len());
        builder = builder
            .archiver(Arc::new(archive.clone()) as Arc<dyn Archiver>)
            .alert_store(Arc::new(archive.clone()) as Arc<dyn AlertStore>)
            .restore_alerts(saved);
        Some(archive)
    } else {
        None
    };

    if settings.cloud.enabled {
        let cloud = Arc::new(CloudSync::connect(settings.cloud.config.clone()).context("starting cloud sync")?);
        builder = builder.notifier(cloud.clone() as Arc<dyn Notifier>);
        if settings.cloud.config.forward_readings {
            builder = builder.archiver(cloud as Arc<dyn Archiver>);
        }
    }

    let service = Arc::new(builder.start().context("starting telemetry pipeline")?);

    let mut state = AppState::new(Arc::clone(&service));
    if let Some(archive) = archive {
        state = state.with_archive(archive);
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => warn!("Prometheus exporter unavailable: {}", e),
    }

    let addr = settings.bind_addr().context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Starting API server on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
