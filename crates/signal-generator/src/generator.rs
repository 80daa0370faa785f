//! Signal Generator
//!
//! Produces one reading per channel per tick from the scenario baseline, the
//! channel waveform and seeded noise.

use crate::scenario::{Scenario, ScenarioMachine, ScenarioSchedule};
use crate::waveform::{sample, ChannelModel};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use telemetry_core::{validate_channels, Channel, ChannelError, Reading, Session};
use thiserror::Error;
use tracing::{info, warn};

/// Readings of one tick, keyed by channel id
pub type TickBatch = BTreeMap<String, Reading>;

/// Generator construction errors
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Model override for unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Invalid model for {channel}: {reason}")]
    InvalidModel { channel: String, reason: String },

    #[error("Invalid scenario schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid transition time: {0} seconds")]
    InvalidTransition(f64),
}

/// A single channel computation that produced no usable value
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Channel {channel} produced non-finite value {value}")]
pub struct GenerationFault {
    pub channel: String,
    pub value: f64,
}

/// Generator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Noise seed; random when absent
    pub seed: Option<u64>,
    /// Scenario schedule
    pub schedule: ScenarioSchedule,
    /// Baseline ramp time after a scenario change (seconds)
    pub transition_secs: f64,
    /// Per-channel model overrides
    pub models: HashMap<String, ChannelModel>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: None,
            schedule: ScenarioSchedule::default(),
            transition_secs: 3.0,
            models: HashMap::new(),
        }
    }
}

struct ChannelSlot {
    channel: Channel,
    model: ChannelModel,
    last_good: Option<f64>,
}

/// Scenario-driven signal generator
pub struct SignalGenerator {
    slots: Vec<ChannelSlot>,
    machine: ScenarioMachine,
    rng: StdRng,
    seed: u64,
    faults: u64,
    ticks: u64,
}

impl SignalGenerator {
    /// Create a generator for a validated channel set
    pub fn new(channels: Vec<Channel>, config: GeneratorConfig) -> Result<Self, GeneratorError> {
        validate_channels(&channels)?;
        config.schedule.validate().map_err(GeneratorError::InvalidSchedule)?;

        if let Some(unknown) = config
            .models
            .keys()
            .find(|id| !channels.iter().any(|c| &c.id == *id))
        {
            return Err(GeneratorError::UnknownChannel(unknown.clone()));
        }

        let slots = channels
            .into_iter()
            .map(|channel| {
                let model = config
                    .models
                    .get(&channel.id)
                    .copied()
                    .unwrap_or_else(|| ChannelModel::for_channel(&channel.id));
                // The noise draw spans twice the amplitude
                if !(model.noise_amplitude >= 0.0 && (2.0 * model.noise_amplitude).is_finite()) {
                    return Err(GeneratorError::InvalidModel {
                        channel: channel.id.clone(),
                        reason: format!("noise amplitude {}", model.noise_amplitude),
                    });
                }
                Ok(ChannelSlot {
                    channel,
                    model,
                    last_good: None,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let transition = Duration::try_from_secs_f64(config.transition_secs)
            .map_err(|_| GeneratorError::InvalidTransition(config.transition_secs))?;
        let seed = config.seed.unwrap_or_else(rand::random);
        info!(
            "Signal generator created: {} channels, seed {}, schedule {:?}",
            slots.len(),
            seed,
            config.schedule
        );

        Ok(Self {
            slots,
            machine: ScenarioMachine::new(config.schedule, transition),
            rng: StdRng::seed_from_u64(seed),
            seed,
            faults: 0,
            ticks: 0,
        })
    }

    /// Produce one reading per channel for the tick at `elapsed`
    pub fn tick(&mut self, session: &Session, elapsed: Duration) -> TickBatch {
        self.machine.advance(elapsed, &mut self.rng);
        let timestamp = session.timestamp_at(elapsed);
        let mut batch = TickBatch::new();

        for index in 0..self.slots.len() {
            let value = match self.compute(index, elapsed) {
                Ok(value) => value,
                Err(fault) => {
                    self.faults += 1;
                    let slot = &self.slots[index];
                    let substitute = slot.last_good.unwrap_or_else(|| {
                        let baseline = self.machine.baseline(&slot.channel, elapsed);
                        if baseline.is_finite() {
                            slot.channel.clamp(baseline)
                        } else {
                            slot.channel.midpoint()
                        }
                    });
                    warn!("Generation fault: {}; substituting {}", fault, substitute);
                    substitute
                }
            };

            let slot = &mut self.slots[index];
            slot.last_good = Some(value);
            let reading = Reading::from_engineering(session.id, &slot.channel, value, timestamp);
            batch.insert(slot.channel.id.clone(), reading);
        }

        self.ticks += 1;
        batch
    }

    fn compute(&mut self, index: usize, elapsed: Duration) -> Result<f64, GenerationFault> {
        let amplitude = self.slots[index].model.noise_amplitude;
        // Always draw so the noise sequence does not depend on faults
        let noise = if amplitude > 0.0 {
            // Scaled unit draw; an out-of-range amplitude yields a fault, not a panic
            (self.rng.gen::<f64>() * 2.0 - 1.0) * amplitude
        } else {
            0.0
        };

        let slot = &self.slots[index];
        let baseline = self.machine.baseline(&slot.channel, elapsed);
        let value = sample(baseline, &slot.model.waveform, elapsed, noise);
        if !value.is_finite() {
            return Err(GenerationFault {
                channel: slot.channel.id.clone(),
                value,
            });
        }
        Ok(slot.channel.clamp(value))
    }

    /// Switch scenario on command
    pub fn set_scenario(&mut self, scenario: Scenario, elapsed: Duration) {
        self.machine.command(scenario, elapsed);
    }

    /// Active scenario
    pub fn scenario(&self) -> Scenario {
        self.machine.current()
    }

    /// Channel definitions in generation order
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.slots.iter().map(|slot| &slot.channel)
    }

    /// Channel ids in generation order
    pub fn channel_ids(&self) -> Vec<String> {
        self.channels().map(|c| c.id.clone()).collect()
    }

    /// Seed in use
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generation faults recovered so far
    pub fn fault_count(&self) -> u64 {
        self.faults
    }

    /// Ticks produced so far
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }
}
