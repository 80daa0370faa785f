//! Pipeline Configuration

use crate::PipelineError;
use alerting::ThrottleConfig;
use broadcast_hub::HubConfig;
use serde::{Deserialize, Serialize};
use session_store::StoreConfig;
use signal_generator::{GeneratorConfig, Scenario, ScenarioSchedule};
use std::time::Duration;
use telemetry_core::{default_channels, Channel};

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Channel definitions; the default PID catalogue when empty
    pub channels: Vec<Channel>,
    /// Tick period (milliseconds)
    pub sample_period_ms: u64,
    /// Rolling window and count backstop
    pub store: StoreConfig,
    /// Seed, scenario schedule and channel models
    pub generator: GeneratorConfig,
    /// Subscriber queue sizes and drop policy
    pub hub: HubConfig,
    /// Per-sink queue capacity
    pub sink_queue_size: usize,
    /// Notification cooldown and hourly cap
    pub throttle: ThrottleConfig,
    /// Upper bound on replay speed multipliers
    pub max_replay_speed: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            sample_period_ms: 100,
            store: StoreConfig::default(),
            generator: GeneratorConfig::default(),
            hub: HubConfig::default(),
            sink_queue_size: 1024,
            throttle: ThrottleConfig::default(),
            max_replay_speed: 100.0,
        }
    }
}

impl PipelineConfig {
    /// Reproducible run: fixed seed, single scenario
    pub fn deterministic(seed: u64, scenario: Scenario) -> Self {
        Self {
            generator: GeneratorConfig {
                seed: Some(seed),
                schedule: ScenarioSchedule::Fixed { scenario },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    /// Configured channels, or the default catalogue
    pub fn resolved_channels(&self) -> Vec<Channel> {
        if self.channels.is_empty() {
            default_channels()
        } else {
            self.channels.clone()
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.sample_period_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "sample_period_ms must be positive".into(),
            ));
        }
        if self.store.window_seconds == 0 || self.store.max_readings == 0 {
            return Err(PipelineError::InvalidConfig(
                "store window and max_readings must be positive".into(),
            ));
        }
        if self.hub.queue_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "hub queue_capacity must be positive".into(),
            ));
        }
        if self.sink_queue_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "sink_queue_size must be positive".into(),
            ));
        }
        if !(self.max_replay_speed.is_finite() && self.max_replay_speed > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "max_replay_speed {} must be finite and positive",
                self.max_replay_speed
            )));
        }
        Ok(())
    }
}
