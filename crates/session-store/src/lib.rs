//! Session Store
//!
//! Append-only, time-ordered storage of readings partitioned by session.
//! Live sessions keep a rolling window bounded by age and by count; closed
//! and replay sessions are retained until deleted.

mod buffer;
mod store;

pub use store::{SessionStore, StoreConfig, DEFAULT_MAX_READINGS, DEFAULT_WINDOW_SECONDS};

use chrono::{DateTime, Utc};
use std::time::Duration;
use telemetry_core::SessionId;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Session already exists: {0}")]
    DuplicateSession(SessionId),

    #[error("Session {0} is closed")]
    SessionClosed(SessionId),

    #[error("Reading belongs to session {got}, not {expected}")]
    SessionMismatch { expected: SessionId, got: SessionId },

    #[error("Out-of-order reading in session {session}: {got:?} after {last:?}")]
    OutOfOrder {
        session: SessionId,
        last: Duration,
        got: Duration,
    },

    #[error("Invalid range: {start} is after {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Store error: {0}")]
    Poisoned(String),
}
