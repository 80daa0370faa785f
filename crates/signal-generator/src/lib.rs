//! PID Signal Generator
//!
//! Simulates a vehicle's sensor channels: a driving-scenario state machine
//! sets per-channel baselines, and each channel adds its waveform and bounded
//! noise. Given a seed and schedule the output is reproducible.

mod generator;
mod scenario;
mod waveform;

pub use generator::{GenerationFault, GeneratorConfig, GeneratorError, SignalGenerator, TickBatch};
pub use scenario::{Scenario, ScenarioMachine, ScenarioSchedule, ScheduleStep, UnknownScenario};
pub use waveform::{sample, ChannelModel, Waveform};
