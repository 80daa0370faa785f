//! Alert Registry
//!
//! Owns the set of alert definitions and validates every change before it
//! is accepted. Invalid input never reaches the evaluator.

use crate::{AlertConfig, AlertError, AlertId, AlertUpdate, Condition, NewAlert};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AlertRegistry {
    known_channels: HashSet<String>,
    alerts: BTreeMap<AlertId, AlertConfig>,
    next_id: u64,
}

impl AlertRegistry {
    /// Create an empty registry accepting alerts on the given channels
    pub fn new<I, S>(known_channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_channels: known_channels.into_iter().map(Into::into).collect(),
            alerts: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn check_channel(&self, channel_id: &str) -> Result<(), AlertError> {
        if self.known_channels.contains(channel_id) {
            Ok(())
        } else {
            Err(AlertError::UnknownChannel(channel_id.to_string()))
        }
    }

    fn check_name(name: &str) -> Result<(), AlertError> {
        if name.trim().is_empty() {
            Err(AlertError::EmptyName)
        } else {
            Ok(())
        }
    }

    fn check_threshold(threshold: f64) -> Result<(), AlertError> {
        if threshold.is_finite() {
            Ok(())
        } else {
            Err(AlertError::InvalidThreshold(threshold))
        }
    }

    /// Reload saved alerts, keeping their ids. New ids continue after the
    /// highest one loaded. Alerts that no longer validate (a channel that
    /// was removed, say) are skipped. Returns how many were loaded.
    pub fn restore<I>(&mut self, saved: I) -> usize
    where
        I: IntoIterator<Item = AlertConfig>,
    {
        let mut loaded = 0;
        for config in saved {
            let valid = Self::check_name(&config.name)
                .and_then(|_| self.check_channel(&config.channel_id))
                .and_then(|_| Self::check_threshold(config.threshold));
            if let Err(e) = valid {
                warn!("Skipping saved alert {}: {}", config.id, e);
                continue;
            }
            self.next_id = self.next_id.max(config.id.0.saturating_add(1));
            self.alerts.insert(config.id, config);
            loaded += 1;
        }
        loaded
    }

    /// Validate and add a new alert
    pub fn create(&mut self, request: NewAlert) -> Result<AlertConfig, AlertError> {
        Self::check_name(&request.name)?;
        self.check_channel(&request.channel_id)?;
        let condition: Condition = request.condition.parse()?;
        Self::check_threshold(request.threshold)?;

        let id = AlertId(self.next_id);
        self.next_id += 1;
        let config = AlertConfig {
            id,
            name: request.name,
            channel_id: request.channel_id,
            condition,
            threshold: request.threshold,
            enabled: request.enabled,
            notify: request.notify,
        };
        info!(
            "Alert {} created: {} {} {}",
            id, config.channel_id, config.condition, config.threshold
        );
        self.alerts.insert(id, config.clone());
        Ok(config)
    }

    /// Apply a partial update. Nothing changes if any field is invalid.
    pub fn update(&mut self, id: AlertId, update: AlertUpdate) -> Result<AlertConfig, AlertError> {
        let current = self.alerts.get(&id).ok_or(AlertError::NotFound(id))?;
        let mut next = current.clone();

        if let Some(name) = update.name {
            Self::check_name(&name)?;
            next.name = name;
        }
        if let Some(channel_id) = update.channel_id {
            self.check_channel(&channel_id)?;
            next.channel_id = channel_id;
        }
        if let Some(condition) = update.condition {
            next.condition = condition.parse()?;
        }
        if let Some(threshold) = update.threshold {
            Self::check_threshold(threshold)?;
            next.threshold = threshold;
        }
        if let Some(enabled) = update.enabled {
            next.enabled = enabled;
        }
        if let Some(notify) = update.notify {
            next.notify = notify;
        }

        info!("Alert {} updated", id);
        self.alerts.insert(id, next.clone());
        Ok(next)
    }

    pub fn set_enabled(&mut self, id: AlertId, enabled: bool) -> Result<AlertConfig, AlertError> {
        let config = self.alerts.get_mut(&id).ok_or(AlertError::NotFound(id))?;
        config.enabled = enabled;
        info!("Alert {} {}", id, if enabled { "enabled" } else { "disabled" });
        Ok(config.clone())
    }

    pub fn remove(&mut self, id: AlertId) -> Result<AlertConfig, AlertError> {
        let removed = self.alerts.remove(&id).ok_or(AlertError::NotFound(id))?;
        info!("Alert {} removed", id);
        Ok(removed)
    }

    pub fn get(&self, id: AlertId) -> Option<&AlertConfig> {
        self.alerts.get(&id)
    }

    /// All alerts ordered by id
    pub fn list(&self) -> Vec<AlertConfig> {
        self.alerts.values().cloned().collect()
    }

    /// Enabled alerts ordered by id
    pub fn enabled(&self) -> Vec<AlertConfig> {
        self.alerts.values().filter(|a| a.enabled).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}
