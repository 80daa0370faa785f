//! Stream Wire Format
//!
//! One message per reading, carrying the alerts that reading fired.
//! Field names are part of the dashboard contract and must not change.

use alerting::{AlertEvent, Condition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use telemetry_core::Reading;

/// Alert as carried on the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireAlert {
    pub alert_id: u64,
    pub name: String,
    pub pid: String,
    pub value: f64,
    pub threshold: f64,
    pub condition: Condition,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&AlertEvent> for WireAlert {
    fn from(event: &AlertEvent) -> Self {
        Self {
            alert_id: event.alert_id.0,
            name: event.name.clone(),
            pid: event.channel_id.clone(),
            value: event.observed_value,
            threshold: event.threshold,
            condition: event.condition,
            message: event.message.clone(),
            timestamp: event.timestamp.wall,
        }
    }
}

/// Stream message sent to every subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub pid: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub alerts: Vec<WireAlert>,
}

impl StreamMessage {
    pub fn from_reading(reading: &Reading, alerts: &[AlertEvent]) -> Self {
        Self {
            pid: reading.channel_id.clone(),
            value: reading.converted_value,
            unit: reading.unit.clone(),
            timestamp: reading.timestamp.wall,
            alerts: alerts.iter().map(WireAlert::from).collect(),
        }
    }
}
