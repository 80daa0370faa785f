//! Channel Definitions
//!
//! A channel is one named sensor stream (a "PID"). Its definition is fixed at
//! startup and shared read-only by every stage of the pipeline.

use crate::error::ChannelError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Conversion from raw adapter units to engineering units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conversion {
    /// Raw value is already in engineering units
    Identity,
    /// `raw * scale + offset`
    Linear { scale: f64, offset: f64 },
}

impl Conversion {
    /// Convert a raw value to engineering units
    pub fn to_engineering(&self, raw: f64) -> f64 {
        match *self {
            Conversion::Identity => raw,
            Conversion::Linear { scale, offset } => raw * scale + offset,
        }
    }

    /// Convert an engineering value back to raw units
    pub fn to_raw(&self, value: f64) -> f64 {
        match *self {
            Conversion::Identity => value,
            Conversion::Linear { scale, offset } => (value - offset) / scale,
        }
    }
}

impl Default for Conversion {
    fn default() -> Self {
        Conversion::Identity
    }
}

/// Range of converted values considered safe; outside it the warning flag is set
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SafeBand {
    /// Lower safe bound (inclusive), unbounded if absent
    pub min: Option<f64>,
    /// Upper safe bound (inclusive), unbounded if absent
    pub max: Option<f64>,
}

impl SafeBand {
    /// Band bounded on both sides
    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Band with only an upper bound
    pub fn at_most(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    /// Whether a converted value lies inside the band
    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// A sensor channel definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel identifier, e.g. "RPM" or "BOOST"
    pub id: String,
    /// Engineering unit label
    pub unit: String,
    /// Lowest valid engineering value
    pub min: f64,
    /// Highest valid engineering value
    pub max: f64,
    /// Raw to engineering conversion
    #[serde(default)]
    pub conversion: Conversion,
    /// Safe operating band for the warning flag
    #[serde(default)]
    pub safe_band: Option<SafeBand>,
}

impl Channel {
    /// Create an identity-converted channel with no safe band
    pub fn new(id: impl Into<String>, unit: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            id: id.into(),
            unit: unit.into(),
            min,
            max,
            conversion: Conversion::Identity,
            safe_band: None,
        }
    }

    /// Set the conversion
    pub fn with_conversion(mut self, conversion: Conversion) -> Self {
        self.conversion = conversion;
        self
    }

    /// Set the safe band
    pub fn with_safe_band(mut self, band: SafeBand) -> Self {
        self.safe_band = Some(band);
        self
    }

    /// Midpoint of the valid range
    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    /// Clamp an engineering value into the valid range
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Whether a converted value should raise the warning flag
    pub fn is_warning(&self, value: f64) -> bool {
        self.safe_band.map_or(false, |band| !band.contains(value))
    }

    /// Check the definition is internally consistent
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.id.trim().is_empty() {
            return Err(ChannelError::EmptyId);
        }
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(ChannelError::InvalidRange {
                id: self.id.clone(),
                min: self.min,
                max: self.max,
            });
        }
        if let Conversion::Linear { scale, offset } = self.conversion {
            if scale == 0.0 || !scale.is_finite() || !offset.is_finite() {
                return Err(ChannelError::InvalidConversion {
                    id: self.id.clone(),
                    scale,
                });
            }
        }
        if let Some(SafeBand {
            min: Some(lo),
            max: Some(hi),
        }) = self.safe_band
        {
            if lo > hi {
                return Err(ChannelError::InvalidSafeBand { id: self.id.clone() });
            }
        }
        Ok(())
    }
}

/// Validate a full channel set: every definition plus id uniqueness
pub fn validate_channels(channels: &[Channel]) -> Result<(), ChannelError> {
    let mut seen = HashSet::with_capacity(channels.len());
    for channel in channels {
        channel.validate()?;
        if !seen.insert(channel.id.as_str()) {
            return Err(ChannelError::Duplicate(channel.id.clone()));
        }
    }
    Ok(())
}
