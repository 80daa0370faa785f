//! Alert Definitions

use crate::Condition;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert identifier, assigned by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a fired alert is delivered besides the stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyFlags {
    pub email: bool,
    pub cloud: bool,
}

impl NotifyFlags {
    pub fn any(&self) -> bool {
        self.email || self.cloud
    }
}

/// A validated threshold alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    pub id: AlertId,
    pub name: String,
    #[serde(alias = "pid")]
    pub channel_id: String,
    pub condition: Condition,
    pub threshold: f64,
    pub enabled: bool,
    #[serde(default)]
    pub notify: NotifyFlags,
}

/// Request to create an alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub name: String,
    #[serde(alias = "pid")]
    pub channel_id: String,
    /// Parsed case-insensitively
    pub condition: String,
    pub threshold: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub notify: NotifyFlags,
}

fn default_enabled() -> bool {
    true
}

impl NewAlert {
    pub fn new(
        name: impl Into<String>,
        channel_id: impl Into<String>,
        condition: impl Into<String>,
        threshold: f64,
    ) -> Self {
        Self {
            name: name.into(),
            channel_id: channel_id.into(),
            condition: condition.into(),
            threshold,
            enabled: true,
            notify: NotifyFlags::default(),
        }
    }
}

/// Partial update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertUpdate {
    pub name: Option<String>,
    #[serde(alias = "pid")]
    pub channel_id: Option<String>,
    pub condition: Option<String>,
    pub threshold: Option<f64>,
    pub enabled: Option<bool>,
    pub notify: Option<NotifyFlags>,
}
