//! Session Store Implementation

use crate::buffer::SessionBuffer;
use crate::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use telemetry_core::{Reading, Session, SessionId, SessionKind, SessionSummary};
use tracing::{debug, info};

/// Default rolling window (10 minutes)
pub const DEFAULT_WINDOW_SECONDS: u64 = 600;

/// Default count backstop (10 minutes of 17 channels at 10Hz, plus headroom)
pub const DEFAULT_MAX_READINGS: usize = 120_000;

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Rolling window for live sessions (seconds)
    pub window_seconds: u64,
    /// Absolute reading cap per live session
    pub max_readings: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_WINDOW_SECONDS,
            max_readings: DEFAULT_MAX_READINGS,
        }
    }
}

impl StoreConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// In-memory store of readings partitioned by session
pub struct SessionStore {
    config: StoreConfig,
    sessions: RwLock<HashMap<SessionId, SessionBuffer>>,
    next_seq: AtomicU64,
}

impl SessionStore {
    /// Create a new store
    pub fn new(config: StoreConfig) -> Self {
        info!(
            "Creating session store: window={}s, max_readings={}",
            config.window_seconds, config.max_readings
        );
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<SessionId, SessionBuffer>>, StoreError> {
        self.sessions
            .read()
            .map_err(|e| StoreError::Poisoned(format!("Lock error: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<SessionId, SessionBuffer>>, StoreError> {
        self.sessions
            .write()
            .map_err(|e| StoreError::Poisoned(format!("Lock error: {}", e)))
    }

    /// Start and register a new session
    pub fn open_session(&self, kind: SessionKind, channels: Vec<String>) -> Result<Session, StoreError> {
        let session = Session::start(kind, channels);
        self.register(session.clone())?;
        Ok(session)
    }

    /// Register an already-constructed session
    pub fn register(&self, session: Session) -> Result<(), StoreError> {
        let mut sessions = self.write()?;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::DuplicateSession(session.id));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        info!("Session {} opened ({:?})", session.id, session.kind);
        sessions.insert(session.id, SessionBuffer::new(session, seq));
        Ok(())
    }

    /// Mark a session ended. Its readings are kept until deleted.
    pub fn close_session(&self, id: &SessionId) -> Result<Session, StoreError> {
        let mut sessions = self.write()?;
        let buffer = sessions.get_mut(id).ok_or(StoreError::UnknownSession(*id))?;
        if buffer.session.ended_at.is_none() {
            buffer.session.ended_at = Some(Utc::now());
            info!(
                "Session {} closed with {} readings ({} written)",
                id,
                buffer.len(),
                buffer.total_written()
            );
        }
        Ok(buffer.session.clone())
    }

    /// Remove a session and its readings
    pub fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut sessions = self.write()?;
        sessions.remove(id).ok_or(StoreError::UnknownSession(*id))?;
        info!("Session {} deleted", id);
        Ok(())
    }

    /// Append a reading to the tail of a session, then evict that session
    pub fn append(&self, id: &SessionId, reading: Reading) -> Result<(), StoreError> {
        if reading.session_id != *id {
            return Err(StoreError::SessionMismatch {
                expected: *id,
                got: reading.session_id,
            });
        }
        let mut sessions = self.write()?;
        let buffer = sessions.get_mut(id).ok_or(StoreError::UnknownSession(*id))?;
        if !buffer.session.is_active() {
            return Err(StoreError::SessionClosed(*id));
        }
        buffer.push(reading)?;
        if buffer.session.is_live() {
            buffer.evict(self.config.window(), self.config.max_readings);
        }
        Ok(())
    }

    /// Apply the rolling window to every open live session.
    /// Closed and replay sessions are exempt.
    pub fn evict(&self) -> Result<usize, StoreError> {
        let mut sessions = self.write()?;
        let window = self.config.window();
        let removed = sessions
            .values_mut()
            .filter(|b| b.session.is_live() && b.session.is_active())
            .map(|b| b.evict(window, self.config.max_readings))
            .sum();
        if removed > 0 {
            debug!("Evicted {} readings", removed);
        }
        Ok(removed)
    }

    /// Readings with wall time in `[start, end]` (inclusive), oldest first
    pub fn query(
        &self,
        id: &SessionId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StoreError> {
        if start > end {
            return Err(StoreError::InvalidRange { start, end });
        }
        let sessions = self.read()?;
        let buffer = sessions.get(id).ok_or(StoreError::UnknownSession(*id))?;
        Ok(buffer.range(start, end))
    }

    /// Every stored reading of a session, oldest first
    pub fn query_all(&self, id: &SessionId) -> Result<Vec<Reading>, StoreError> {
        let sessions = self.read()?;
        let buffer = sessions.get(id).ok_or(StoreError::UnknownSession(*id))?;
        Ok(buffer.all())
    }

    /// Readings from the last `seconds` of a session, oldest first
    pub fn recent(&self, id: &SessionId, seconds: u64) -> Result<Vec<Reading>, StoreError> {
        let sessions = self.read()?;
        let buffer = sessions.get(id).ok_or(StoreError::UnknownSession(*id))?;
        Ok(buffer.read_window(Duration::from_secs(seconds)))
    }

    /// Session metadata
    pub fn session(&self, id: &SessionId) -> Result<Session, StoreError> {
        let sessions = self.read()?;
        sessions
            .get(id)
            .map(|b| b.session.clone())
            .ok_or(StoreError::UnknownSession(*id))
    }

    /// All sessions, most recent first
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let sessions = self.read()?;
        let mut entries: Vec<_> = sessions.values().collect();
        entries.sort_by(|a, b| {
            b.session
                .started_at
                .cmp(&a.session.started_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        Ok(entries
            .into_iter()
            .map(|b| SessionSummary {
                session: b.session.clone(),
                reading_count: b.len(),
                evicted_count: b.evicted(),
            })
            .collect())
    }

    /// Number of readings held for a session
    pub fn reading_count(&self, id: &SessionId) -> Result<usize, StoreError> {
        let sessions = self.read()?;
        sessions
            .get(id)
            .map(|b| b.len())
            .ok_or(StoreError::UnknownSession(*id))
    }

    /// Total readings held across sessions
    pub fn total_readings(&self) -> usize {
        self.read()
            .map(|s| s.values().map(|b| b.len()).sum())
            .unwrap_or(0)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use telemetry_core::Channel;

    fn reading(session: &Session, channel: &str, ms: u64, value: f64) -> Reading {
        let channel = Channel::new(channel, "u", -1e9, 1e9);
        Reading::from_engineering(
            session.id,
            &channel,
            value,
            session.timestamp_at(Duration::from_millis(ms)),
        )
    }

    #[test]
    fn test_append_and_query() {
        let store = SessionStore::default();
        let session = store.open_session(SessionKind::Live, vec!["RPM".into()]).unwrap();
        for i in 0..10u64 {
            store.append(&session.id, reading(&session, "RPM", i * 100, i as f64)).unwrap();
        }

        let start = session.timestamp_at(Duration::from_millis(200)).wall;
        let end = session.timestamp_at(Duration::from_millis(500)).wall;
        let result = store.query(&session.id, start, end).unwrap();
        let values: Vec<f64> = result.iter().map(|r| r.converted_value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0, 5.0]);

        assert!(matches!(
            store.query(&session.id, end, start),
            Err(StoreError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_unknown_and_closed_sessions() {
        let store = SessionStore::default();
        let session = store.open_session(SessionKind::Live, vec![]).unwrap();
        let other = Session::start(SessionKind::Live, vec![]);
        assert!(matches!(
            store.query_all(&other.id),
            Err(StoreError::UnknownSession(_))
        ));
        assert!(matches!(
            store.append(&session.id, reading(&other, "RPM", 0, 1.0)),
            Err(StoreError::SessionMismatch { .. })
        ));

        let closed = store.close_session(&session.id).unwrap();
        assert!(closed.ended_at.is_some());
        assert!(matches!(
            store.append(&session.id, reading(&session, "RPM", 0, 1.0)),
            Err(StoreError::SessionClosed(_))
        ));
    }

    #[test]
    fn test_window_applies_to_live_sessions_only() {
        let store = SessionStore::new(StoreConfig {
            window_seconds: 2,
            max_readings: 1000,
        });
        let live = store.open_session(SessionKind::Live, vec![]).unwrap();
        for i in 0..50u64 {
            store.append(&live.id, reading(&live, "RPM", i * 100, i as f64)).unwrap();
        }
        // Newest at 4.9s, nothing older than 2.9s survives
        let all = store.query_all(&live.id).unwrap();
        assert_eq!(all.first().unwrap().timestamp.elapsed, Duration::from_millis(2900));
        assert_eq!(all.len(), 21);

        let replay = store
            .open_session(SessionKind::Replay { source: live.id }, vec![])
            .unwrap();
        for i in 0..50u64 {
            store.append(&replay.id, reading(&replay, "RPM", i * 100, i as f64)).unwrap();
        }
        assert_eq!(store.reading_count(&replay.id).unwrap(), 50);
    }

    #[test]
    fn test_closed_session_exempt_from_evict() {
        let store = SessionStore::new(StoreConfig {
            window_seconds: 1,
            max_readings: 5,
        });
        let live = store.open_session(SessionKind::Live, vec![]).unwrap();
        for i in 0..5u64 {
            store.append(&live.id, reading(&live, "RPM", i * 100, i as f64)).unwrap();
        }
        store.close_session(&live.id).unwrap();
        assert_eq!(store.evict().unwrap(), 0);
        assert_eq!(store.reading_count(&live.id).unwrap(), 5);
    }

    #[test]
    fn test_count_backstop() {
        let store = SessionStore::new(StoreConfig {
            window_seconds: 3600,
            max_readings: 10,
        });
        let live = store.open_session(SessionKind::Live, vec![]).unwrap();
        for i in 0..25u64 {
            store.append(&live.id, reading(&live, "RPM", i, i as f64)).unwrap();
        }
        let all = store.query_all(&live.id).unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(all[0].converted_value, 15.0);
        assert_eq!(store.list_sessions().unwrap()[0].evicted_count, 15);
    }

    #[test]
    fn test_list_most_recent_first() {
        let store = SessionStore::default();
        let first = store.open_session(SessionKind::Live, vec![]).unwrap();
        let second = store.open_session(SessionKind::Live, vec![]).unwrap();
        let third = store.open_session(SessionKind::Live, vec![]).unwrap();
        let ids: Vec<_> = store
            .list_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.session.id)
            .collect();
        assert_eq!(ids, vec![third.id, second.id, first.id]);

        store.delete_session(&second.id).unwrap();
        assert_eq!(store.list_sessions().unwrap().len(), 2);
        assert!(store.delete_session(&second.id).is_err());
    }

    #[test]
    fn test_concurrent_append_and_query() {
        let store = Arc::new(SessionStore::default());
        let session = store.open_session(SessionKind::Live, vec![]).unwrap();

        let writer = {
            let store = Arc::clone(&store);
            let session = session.clone();
            std::thread::spawn(move || {
                for i in 0..2000u64 {
                    store.append(&session.id, reading(&session, "RPM", i, i as f64)).unwrap();
                }
            })
        };

        for _ in 0..50 {
            let snapshot = store.query_all(&session.id).unwrap();
            for (i, r) in snapshot.iter().enumerate() {
                assert_eq!(r.converted_value, i as f64);
                assert_eq!(r.channel_id, "RPM");
            }
        }
        writer.join().unwrap();
        assert_eq!(store.reading_count(&session.id).unwrap(), 2000);
    }

    proptest! {
        #[test]
        fn prop_query_is_ordered_and_bounded(
            mut offsets in proptest::collection::vec(0u64..10_000, 1..200),
            a in 0u64..10_000,
            b in 0u64..10_000,
        ) {
            offsets.sort_unstable();
            let store = SessionStore::new(StoreConfig { window_seconds: 3600, max_readings: 10_000 });
            let session = store.open_session(SessionKind::Live, vec![]).unwrap();
            for (i, ms) in offsets.iter().enumerate() {
                let channel = if i % 2 == 0 { "RPM" } else { "BOOST" };
                store.append(&session.id, reading(&session, channel, *ms, i as f64)).unwrap();
            }

            let (lo, hi) = (a.min(b), a.max(b));
            let start = session.timestamp_at(Duration::from_millis(lo)).wall;
            let end = session.timestamp_at(Duration::from_millis(hi)).wall;
            let result = store.query(&session.id, start, end).unwrap();

            prop_assert!(result.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
            prop_assert!(result.iter().all(|r| r.timestamp.wall >= start && r.timestamp.wall <= end));
            let expected = offsets.iter().filter(|ms| **ms >= lo && **ms <= hi).count();
            prop_assert_eq!(result.len(), expected);
        }
    }
}
