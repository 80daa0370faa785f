//! Per-Session Reading Buffer

use crate::StoreError;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use telemetry_core::{Reading, Session};

/// Time-ordered readings of one session
pub(crate) struct SessionBuffer {
    pub(crate) session: Session,
    /// Creation order, breaks ties in listings
    pub(crate) seq: u64,
    readings: VecDeque<Reading>,
    total_written: u64,
    evicted: u64,
}

impl SessionBuffer {
    pub(crate) fn new(session: Session, seq: u64) -> Self {
        Self {
            session,
            seq,
            readings: VecDeque::with_capacity(1024),
            total_written: 0,
            evicted: 0,
        }
    }

    /// Append at the tail; timestamps must not go backwards
    pub(crate) fn push(&mut self, reading: Reading) -> Result<(), StoreError> {
        if let Some(last) = self.readings.back() {
            if reading.timestamp < last.timestamp {
                return Err(StoreError::OutOfOrder {
                    session: self.session.id,
                    last: last.timestamp.elapsed,
                    got: reading.timestamp.elapsed,
                });
            }
        }
        self.readings.push_back(reading);
        self.total_written += 1;
        Ok(())
    }

    /// Drop readings older than `window` before the newest one, then enforce
    /// the count backstop. Returns the number removed.
    pub(crate) fn evict(&mut self, window: Duration, max_readings: usize) -> usize {
        let before = self.readings.len();
        if let Some(newest) = self.readings.back().map(|r| r.timestamp.elapsed) {
            let cutoff = newest.saturating_sub(window);
            while self
                .readings
                .front()
                .map_or(false, |r| r.timestamp.elapsed < cutoff)
            {
                self.readings.pop_front();
            }
        }
        while self.readings.len() > max_readings {
            self.readings.pop_front();
        }
        let removed = before - self.readings.len();
        self.evicted += removed as u64;
        removed
    }

    /// Readings with wall time in `[start, end]`, oldest first
    pub(crate) fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Reading> {
        let from = self.readings.partition_point(|r| r.timestamp.wall < start);
        let to = self.readings.partition_point(|r| r.timestamp.wall <= end);
        self.readings.range(from..to.max(from)).cloned().collect()
    }

    /// Readings within `duration` of the newest one, oldest first
    pub(crate) fn read_window(&self, duration: Duration) -> Vec<Reading> {
        let Some(newest) = self.readings.back().map(|r| r.timestamp.elapsed) else {
            return Vec::new();
        };
        let cutoff = newest.saturating_sub(duration);
        let from = self.readings.partition_point(|r| r.timestamp.elapsed < cutoff);
        self.readings.range(from..).cloned().collect()
    }

    pub(crate) fn all(&self) -> Vec<Reading> {
        self.readings.iter().cloned().collect()
    }

    pub(crate) fn oldest(&self) -> Option<&Reading> {
        self.readings.front()
    }

    pub(crate) fn len(&self) -> usize {
        self.readings.len()
    }

    pub(crate) fn total_written(&self) -> u64 {
        self.total_written
    }

    pub(crate) fn evicted(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_core::{Channel, SessionKind};

    fn reading(session: &Session, ms: u64) -> Reading {
        let channel = Channel::new("RPM", "RPM", 0.0, 8000.0);
        Reading::from_engineering(
            session.id,
            &channel,
            ms as f64,
            session.timestamp_at(Duration::from_millis(ms)),
        )
    }

    #[test]
    fn test_push_and_window() {
        let session = Session::start(SessionKind::Live, vec![]);
        let mut buffer = SessionBuffer::new(session.clone(), 0);
        for ms in (0..10_000).step_by(1000) {
            buffer.push(reading(&session, ms)).unwrap();
        }
        assert_eq!(buffer.len(), 10);

        let last = buffer.read_window(Duration::from_secs(3));
        assert_eq!(last.len(), 4);
        assert_eq!(last[0].converted_value, 6000.0);
    }

    #[test]
    fn test_rejects_out_of_order() {
        let session = Session::start(SessionKind::Live, vec![]);
        let mut buffer = SessionBuffer::new(session.clone(), 0);
        buffer.push(reading(&session, 500)).unwrap();
        buffer.push(reading(&session, 500)).unwrap();
        assert!(matches!(
            buffer.push(reading(&session, 100)),
            Err(StoreError::OutOfOrder { .. })
        ));
        assert_eq!(buffer.total_written(), 2);
    }

    #[test]
    fn test_evict_by_age_and_count() {
        let session = Session::start(SessionKind::Live, vec![]);
        let mut buffer = SessionBuffer::new(session.clone(), 0);
        for ms in (0..10_000).step_by(1000) {
            buffer.push(reading(&session, ms)).unwrap();
        }
        // Newest is 9s; window of 5s keeps 4s..9s
        assert_eq!(buffer.evict(Duration::from_secs(5), 100), 4);
        assert_eq!(buffer.oldest().unwrap().converted_value, 4000.0);

        // Count backstop wins even inside the window
        assert_eq!(buffer.evict(Duration::from_secs(60), 3), 3);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.evicted(), 7);
    }
}
