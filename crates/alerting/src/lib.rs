//! Alerting System
//!
//! User-defined threshold alerts: validated registry, edge-triggered
//! evaluation against the reading stream, and notification throttling.

mod condition;
mod config;
mod evaluator;
mod registry;
mod throttle;

pub use condition::Condition;
pub use config::{AlertConfig, AlertId, AlertUpdate, NewAlert, NotifyFlags};
pub use evaluator::{alert_message, AlertEvaluator, AlertEvent};
pub use registry::AlertRegistry;
pub use throttle::{NotificationState, NotificationThrottle, ThrottleConfig};

use thiserror::Error;

/// Alert configuration errors
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert not found: {0}")]
    NotFound(AlertId),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Invalid condition: {0} (expected gt, gte, lt, lte, eq or neq)")]
    InvalidCondition(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(f64),

    #[error("Alert name must not be empty")]
    EmptyName,

    #[error("Alert storage failed: {0}")]
    Storage(String),
}
