//! Readings

use crate::channel::Channel;
use crate::session::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reading timestamp: monotonic offset into the session plus the wall clock.
///
/// Ordering is by `elapsed` first, which is what the store and replay rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Time since the session started
    pub elapsed: Duration,
    /// Wall-clock time (UTC)
    pub wall: DateTime<Utc>,
}

/// One value of one channel at one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub session_id: SessionId,
    pub channel_id: String,
    pub unit: String,
    /// Value in adapter units
    pub raw_value: f64,
    /// Value in engineering units
    pub converted_value: f64,
    pub timestamp: Timestamp,
    /// Converted value is outside the channel's safe band
    pub warning: bool,
}

impl Reading {
    /// Build a reading from a raw value, applying the channel's conversion
    pub fn from_raw(session_id: SessionId, channel: &Channel, raw: f64, timestamp: Timestamp) -> Self {
        let converted = channel.conversion.to_engineering(raw);
        Self {
            session_id,
            channel_id: channel.id.clone(),
            unit: channel.unit.clone(),
            raw_value: raw,
            converted_value: converted,
            timestamp,
            warning: channel.is_warning(converted),
        }
    }

    /// Build a reading from an engineering value, deriving the raw value
    pub fn from_engineering(
        session_id: SessionId,
        channel: &Channel,
        value: f64,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            session_id,
            channel_id: channel.id.clone(),
            unit: channel.unit.clone(),
            raw_value: channel.conversion.to_raw(value),
            converted_value: value,
            timestamp,
            warning: channel.is_warning(value),
        }
    }

    /// Copy of this reading re-homed into another session
    pub fn rehome(&self, session_id: SessionId) -> Self {
        Self {
            session_id,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Conversion, SafeBand};
    use crate::session::{Session, SessionKind};

    #[test]
    fn test_boost_from_raw() {
        let boost = Channel::new("BOOST", "PSI", -14.7, 22.0)
            .with_conversion(Conversion::Linear {
                scale: 0.0145,
                offset: -14.7,
            })
            .with_safe_band(SafeBand::at_most(20.0));
        let session = Session::start(SessionKind::Live, vec!["BOOST".into()]);
        let ts = session.timestamp_at(Duration::ZERO);

        // 2400 raw => 20.1 psi, over the warning line
        let reading = Reading::from_raw(session.id, &boost, 2400.0, ts);
        assert!((reading.converted_value - 20.1).abs() < 1e-9);
        assert!(reading.warning);
        assert_eq!(reading.unit, "PSI");

        let reading = Reading::from_engineering(session.id, &boost, 5.0, ts);
        assert!(!reading.warning);
        assert!((reading.raw_value - (5.0 + 14.7) / 0.0145).abs() < 1e-9);
    }

    #[test]
    fn test_timestamp_ordering() {
        let session = Session::start(SessionKind::Live, vec![]);
        let early = session.timestamp_at(Duration::from_secs(1));
        let late = session.timestamp_at(Duration::from_secs(2));
        assert!(early < late);
    }
}
