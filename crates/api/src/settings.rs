//! Gateway Settings
//!
//! Layered from built-in defaults, an optional TOML file, then
//! `TELEMETRY__SECTION__KEY` environment variables.

use cloud_sync::CloudConfig;
use config::{Config, ConfigError, Environment, File};
use pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Default settings file, looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "telemetry.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub pipeline: PipelineConfig,
    pub archive: ArchiveSettings,
    pub cloud: CloudSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// trace, debug, info, warn or error
    pub level: String,
    /// JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    pub enabled: bool,
    pub database_url: String,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            database_url: "sqlite://telemetry.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSettings {
    pub enabled: bool,
    #[serde(flatten)]
    pub config: CloudConfig,
}

impl Settings {
    /// Load from `path` (optional) and the environment
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Self::from_config(
            Config::builder()
                .add_source(File::with_name(path).required(false))
                .add_source(
                    Environment::with_prefix("TELEMETRY")
                        .prefix_separator("__")
                        .separator("__")
                        .try_parsing(true),
                )
                .build()?,
        )
    }

    /// Parse settings from TOML text, without the environment
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Self::from_config(
            Config::builder()
                .add_source(File::from_str(text, config::FileFormat::Toml))
                .build()?,
        )
    }

    fn from_config(config: Config) -> Result<Self, ConfigError> {
        config.try_deserialize()
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloud_sync::UploadSchedule;

    #[test]
    fn test_defaults_without_sources() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.pipeline, PipelineConfig::default());
        assert!(!settings.archive.enabled);
        assert!(!settings.cloud.enabled);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let settings = Settings::from_toml(
            r#"
            [server]
            port = 9000

            [logging]
            json = true

            [pipeline]
            sample_period_ms = 50

            [pipeline.store]
            window_seconds = 120

            [cloud]
            enabled = true
            vehicle_id = "VH-7"
            schedule = "nightly"
            "#,
        )
        .unwrap();

        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert!(settings.logging.json);
        assert_eq!(settings.pipeline.sample_period_ms, 50);
        assert_eq!(settings.pipeline.store.window_seconds, 120);
        assert_eq!(settings.pipeline.store.max_readings, session_store::DEFAULT_MAX_READINGS);
        assert!(settings.cloud.enabled);
        assert_eq!(settings.cloud.config.vehicle_id, "VH-7");
        assert_eq!(settings.cloud.config.schedule, UploadSchedule::Nightly);
        assert_eq!(settings.bind_addr().unwrap().port(), 9000);
    }
}
