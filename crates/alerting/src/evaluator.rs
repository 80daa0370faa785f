//! Alert Evaluation
//!
//! Alerts are edge-triggered: an event is produced only when a condition goes
//! from false to true for an `(alert, channel)` pair. The pair re-arms once
//! the condition is observed false again, or the alert is disabled.

use crate::{AlertConfig, AlertId, Condition, NotifyFlags};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use telemetry_core::{Reading, SessionId, Timestamp};
use tracing::info;

/// A fired alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_id: AlertId,
    pub name: String,
    pub session_id: SessionId,
    pub channel_id: String,
    pub observed_value: f64,
    pub threshold: f64,
    pub condition: Condition,
    pub message: String,
    pub timestamp: Timestamp,
    /// Delivery flags copied from the config at the time it fired
    pub notify: NotifyFlags,
}

impl AlertEvent {
    fn fired(config: &AlertConfig, reading: &Reading) -> Self {
        Self {
            alert_id: config.id,
            name: config.name.clone(),
            session_id: reading.session_id,
            channel_id: reading.channel_id.clone(),
            observed_value: reading.converted_value,
            threshold: config.threshold,
            condition: config.condition,
            message: alert_message(config, reading.converted_value),
            timestamp: reading.timestamp,
            notify: config.notify,
        }
    }
}

/// `Alert '<name>': <pid> = <value> <condition> <threshold>`
pub fn alert_message(config: &AlertConfig, value: f64) -> String {
    format!(
        "Alert '{}': {} = {:?} {} {:?}",
        config.name, config.channel_id, value, config.condition, config.threshold
    )
}

/// Edge-triggered evaluator with a history of everything it has fired
#[derive(Debug, Default)]
pub struct AlertEvaluator {
    active: HashSet<(AlertId, String)>,
    history: Vec<AlertEvent>,
}

impl AlertEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one reading against the given alert configs
    pub fn evaluate(&mut self, reading: &Reading, configs: &[AlertConfig]) -> Vec<AlertEvent> {
        let mut fired = Vec::new();
        for config in configs.iter().filter(|c| c.channel_id == reading.channel_id) {
            let key = (config.id, reading.channel_id.clone());
            if !config.enabled {
                self.active.remove(&key);
                continue;
            }
            if config.condition.holds(reading.converted_value, config.threshold) {
                if self.active.insert(key) {
                    let event = AlertEvent::fired(config, reading);
                    info!("{}", event.message);
                    counter!("telemetry_alerts_fired_total").increment(1);
                    fired.push(event);
                }
            } else {
                self.active.remove(&key);
            }
        }
        self.history.extend(fired.iter().cloned());
        fired
    }

    /// Whether a pair is currently in the triggered state
    pub fn is_active(&self, alert_id: AlertId, channel_id: &str) -> bool {
        self.active.contains(&(alert_id, channel_id.to_string()))
    }

    /// Keep trigger state only for alerts that still exist
    pub fn retain_alerts(&mut self, keep: impl Fn(AlertId) -> bool) {
        self.active.retain(|(id, _)| keep(*id));
    }

    /// Every event fired since creation or the last reset, oldest first
    pub fn history(&self) -> &[AlertEvent] {
        &self.history
    }

    /// Clear trigger state and history
    pub fn reset(&mut self) {
        self.active.clear();
        self.history.clear();
    }
}
