//! Telemetry Gateway - Main Entry Point

use api::{init_logging, run_server, Settings, DEFAULT_SETTINGS_FILE};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::var("TELEMETRY_CONFIG").unwrap_or_else(|_| DEFAULT_SETTINGS_FILE.to_string());
    let settings = Settings::load(&path)?;
    init_logging(&settings.logging.level, settings.logging.json)?;

    info!("=== Telemetry Gateway v{} ===", env!("CARGO_PKG_VERSION"));
    run_server(settings).await
}
