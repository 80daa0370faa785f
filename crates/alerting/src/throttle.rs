//! Notification Throttle
//!
//! Rate-limits what reaches external notifiers. The stream and the alert
//! history always see every event.

use crate::{AlertEvent, AlertId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Throttle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Minimum time between notifications for the same alert (seconds)
    pub cooldown_seconds: u64,
    /// Maximum notifications per hour across all alerts
    pub max_per_hour: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 300,
            max_per_hour: 60,
        }
    }
}

impl ThrottleConfig {
    /// No throttling at all
    pub fn unlimited() -> Self {
        Self {
            cooldown_seconds: 0,
            max_per_hour: usize::MAX,
        }
    }
}

/// Per-alert notification state
#[derive(Debug, Clone)]
pub struct NotificationState {
    pub last_sent: Instant,
    pub sent_count: usize,
}

pub struct NotificationThrottle {
    config: ThrottleConfig,
    states: HashMap<AlertId, NotificationState>,
    hourly_count: usize,
    hour_start: Instant,
    suppressed: u64,
}

impl NotificationThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        info!("Creating notification throttle with config: {:?}", config);
        Self {
            config,
            states: HashMap::new(),
            hourly_count: 0,
            hour_start: Instant::now(),
            suppressed: 0,
        }
    }

    /// Check whether a notification may go out now, without recording it
    pub fn should_notify(&mut self, alert_id: AlertId) -> bool {
        if self.hour_start.elapsed() > Duration::from_secs(3600) {
            self.hourly_count = 0;
            self.hour_start = Instant::now();
        }

        if self.hourly_count >= self.config.max_per_hour {
            warn!("Notification throttled: max notifications per hour reached");
            return false;
        }

        if let Some(state) = self.states.get(&alert_id) {
            let cooldown = Duration::from_secs(self.config.cooldown_seconds);
            if state.last_sent.elapsed() < cooldown {
                debug!("Notification for alert {} suppressed: in cooldown", alert_id);
                return false;
            }
        }

        true
    }

    /// Record that a notification went out
    pub fn record(&mut self, alert_id: AlertId) {
        self.hourly_count += 1;
        let state = self.states.entry(alert_id).or_insert(NotificationState {
            last_sent: Instant::now(),
            sent_count: 0,
        });
        state.last_sent = Instant::now();
        state.sent_count += 1;
    }

    /// Check and record in one step; events without notify flags never pass
    pub fn admit(&mut self, event: &AlertEvent) -> bool {
        if !event.notify.any() {
            return false;
        }
        if self.should_notify(event.alert_id) {
            self.record(event.alert_id);
            true
        } else {
            self.suppressed += 1;
            false
        }
    }

    pub fn state(&self, alert_id: AlertId) -> Option<&NotificationState> {
        self.states.get(&alert_id)
    }

    pub fn hourly_count(&self) -> usize {
        self.hourly_count
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.hourly_count = 0;
    }
}

impl Default for NotificationThrottle {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}
