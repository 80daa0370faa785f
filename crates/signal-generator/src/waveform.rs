//! Waveform and Noise Models

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::time::Duration;
use telemetry_core::Pid;

/// Periodic component added on top of the scenario baseline
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Waveform {
    #[default]
    Flat,
    Sine {
        amplitude: f64,
        period_secs: f64,
        #[serde(default)]
        phase: f64,
    },
}

impl Waveform {
    /// Waveform value at a point in the session
    pub fn value_at(&self, elapsed: Duration) -> f64 {
        match *self {
            Waveform::Flat => 0.0,
            Waveform::Sine {
                amplitude,
                period_secs,
                phase,
            } => amplitude * (TAU * elapsed.as_secs_f64() / period_secs + phase).sin(),
        }
    }
}

/// Per-channel signal model
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelModel {
    #[serde(default)]
    pub waveform: Waveform,
    /// Half-width of the uniform noise band
    #[serde(default)]
    pub noise_amplitude: f64,
}

impl ChannelModel {
    /// Default model for a catalogue PID
    pub fn for_pid(pid: Pid) -> Self {
        let waveform = match pid {
            // Boost cycles between vacuum and boost
            Pid::Boost => Waveform::Sine {
                amplitude: 3.0,
                period_secs: 12.0,
                phase: 0.0,
            },
            Pid::OilTemp => Waveform::Sine {
                amplitude: 8.0,
                period_secs: 60.0,
                phase: 0.0,
            },
            Pid::Oar => Waveform::Sine {
                amplitude: 0.15,
                period_secs: 20.0,
                phase: 0.0,
            },
            _ => Waveform::Flat,
        };
        Self {
            waveform,
            noise_amplitude: pid.noise_amplitude(),
        }
    }

    /// Default model for any channel id
    pub fn for_channel(channel_id: &str) -> Self {
        Pid::from_id(channel_id).map(Self::for_pid).unwrap_or_default()
    }
}

/// `baseline + waveform(t) + noise`, before clamping
pub fn sample(baseline: f64, waveform: &Waveform, elapsed: Duration, noise: f64) -> f64 {
    baseline + waveform.value_at(elapsed) + noise
}
