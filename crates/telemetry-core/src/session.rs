//! Sessions
//!
//! A session groups the readings of one generator run or one replay run.

use crate::reading::Timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Opaque session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing uuid
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying uuid
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// What produced a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionKind {
    /// Live generation; subject to the rolling window while open
    Live,
    /// Replay of a stored session
    Replay { source: SessionId },
}

/// Session metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub kind: SessionKind,
    pub started_at: DateTime<Utc>,
    /// None while the session is active
    pub ended_at: Option<DateTime<Utc>>,
    pub channels: Vec<String>,
}

impl Session {
    /// Start a new session now
    pub fn start(kind: SessionKind, channels: Vec<String>) -> Self {
        Self {
            id: SessionId::new(),
            kind,
            started_at: Utc::now(),
            ended_at: None,
            channels,
        }
    }

    /// Whether the session still accepts writes
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Whether this is a live session
    pub fn is_live(&self) -> bool {
        matches!(self.kind, SessionKind::Live)
    }

    /// Timestamp for a point `elapsed` after the session started.
    ///
    /// Wall time is derived from the start time so it never runs backwards
    /// within a session, whatever the system clock does.
    pub fn timestamp_at(&self, elapsed: Duration) -> Timestamp {
        let offset = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        Timestamp {
            elapsed,
            wall: self.started_at + offset,
        }
    }
}

/// Session listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    /// Readings currently held
    pub reading_count: usize,
    /// Readings removed by the rolling window or the count backstop
    pub evicted_count: u64,
}
