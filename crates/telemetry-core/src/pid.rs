//! Default PID Catalogue
//!
//! Channel definitions for the simulated Focus ST, with ranges in engineering
//! units and the adapter conversions the gateway uses.

use crate::channel::{Channel, Conversion, SafeBand};
use serde::{Deserialize, Serialize};

/// Well-known PIDs of the default catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Pid {
    Rpm,
    Speed,
    Throttle,
    EngineLoad,
    CoolantTemp,
    IntakeTemp,
    Maf,
    IntakePressure,
    TimingAdvance,
    FuelPressure,
    Boost,
    OilTemp,
    TurboSpeed,
    Afr,
    Oar,
    FuelLevel,
    BatteryVoltage,
}

impl Pid {
    /// Every PID in catalogue order
    pub const ALL: [Pid; 17] = [
        Pid::Rpm,
        Pid::Speed,
        Pid::Throttle,
        Pid::EngineLoad,
        Pid::CoolantTemp,
        Pid::IntakeTemp,
        Pid::Maf,
        Pid::IntakePressure,
        Pid::TimingAdvance,
        Pid::FuelPressure,
        Pid::Boost,
        Pid::OilTemp,
        Pid::TurboSpeed,
        Pid::Afr,
        Pid::Oar,
        Pid::FuelLevel,
        Pid::BatteryVoltage,
    ];

    /// Channel identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Pid::Rpm => "RPM",
            Pid::Speed => "SPEED",
            Pid::Throttle => "THROTTLE",
            Pid::EngineLoad => "ENGINE_LOAD",
            Pid::CoolantTemp => "COOLANT_TEMP",
            Pid::IntakeTemp => "INTAKE_TEMP",
            Pid::Maf => "MAF",
            Pid::IntakePressure => "INTAKE_PRESSURE",
            Pid::TimingAdvance => "TIMING_ADVANCE",
            Pid::FuelPressure => "FUEL_PRESSURE",
            Pid::Boost => "BOOST",
            Pid::OilTemp => "OIL_TEMP",
            Pid::TurboSpeed => "TURBO_SPEED",
            Pid::Afr => "AFR",
            Pid::Oar => "OAR",
            Pid::FuelLevel => "FUEL_LEVEL",
            Pid::BatteryVoltage => "BATTERY_VOLTAGE",
        }
    }

    /// Look up a PID by channel identifier
    pub fn from_id(id: &str) -> Option<Pid> {
        Pid::ALL.iter().copied().find(|pid| pid.as_str() == id)
    }

    /// Channel definition for this PID
    pub fn channel(&self) -> Channel {
        let id = self.as_str();
        match self {
            Pid::Rpm => Channel::new(id, "RPM", 800.0, 6500.0),
            Pid::Speed => Channel::new(id, "MPH", 0.0, 155.0),
            Pid::Throttle => Channel::new(id, "%", 0.0, 100.0),
            Pid::EngineLoad => Channel::new(id, "%", 0.0, 100.0),
            Pid::CoolantTemp => Channel::new(id, "°F", 80.0, 220.0),
            Pid::IntakeTemp => Channel::new(id, "°F", 60.0, 180.0),
            Pid::Maf => Channel::new(id, "g/s", 2.0, 250.0),
            Pid::IntakePressure => Channel::new(id, "PSI", 10.0, 25.0),
            Pid::TimingAdvance => Channel::new(id, "°", -10.0, 30.0),
            Pid::FuelPressure => Channel::new(id, "PSI", 40.0, 65.0),
            // ECU reports boost in counts: psi = raw * 0.0145 - 14.7
            Pid::Boost => Channel::new(id, "PSI", -5.0, 22.0)
                .with_conversion(Conversion::Linear {
                    scale: 0.0145,
                    offset: -14.7,
                })
                .with_safe_band(SafeBand::at_most(20.0)),
            Pid::OilTemp => Channel::new(id, "°F", 80.0, 280.0)
                .with_safe_band(SafeBand::between(160.0, 240.0)),
            Pid::TurboSpeed => Channel::new(id, "RPM", 0.0, 240_000.0),
            Pid::Afr => Channel::new(id, "ratio", 10.0, 16.0),
            // Oxygen/air ratio should sit near -1.0
            Pid::Oar => Channel::new(id, "ratio", -2.0, 0.0)
                .with_safe_band(SafeBand::between(-1.3, -0.7)),
            Pid::FuelLevel => Channel::new(id, "%", 0.0, 100.0),
            Pid::BatteryVoltage => Channel::new(id, "V", 12.0, 14.8),
        }
    }

    /// Typical tick-to-tick noise amplitude in engineering units
    pub fn noise_amplitude(&self) -> f64 {
        match self {
            Pid::Rpm => 100.0,
            Pid::Speed => 5.0,
            Pid::Throttle => 10.0,
            Pid::EngineLoad => 5.0,
            Pid::CoolantTemp | Pid::OilTemp | Pid::TimingAdvance => 2.0,
            Pid::IntakeTemp => 3.0,
            Pid::Maf => 10.0,
            Pid::IntakePressure => 2.0,
            Pid::FuelPressure | Pid::Boost => 1.0,
            Pid::TurboSpeed => 5000.0,
            Pid::Afr => 0.5,
            Pid::Oar => 0.05,
            Pid::FuelLevel => 0.0,
            Pid::BatteryVoltage => 0.2,
        }
    }
}

/// The default channel catalogue
pub fn default_channels() -> Vec<Channel> {
    Pid::ALL.iter().map(Pid::channel).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::validate_channels;

    #[test]
    fn test_catalogue_is_valid() {
        let channels = default_channels();
        assert_eq!(channels.len(), Pid::ALL.len());
        assert!(validate_channels(&channels).is_ok());
    }

    #[test]
    fn test_lookup() {
        assert_eq!(Pid::from_id("BOOST"), Some(Pid::Boost));
        assert_eq!(Pid::from_id("boost"), None);
        for pid in Pid::ALL {
            assert_eq!(Pid::from_id(pid.as_str()), Some(pid));
        }
    }

    #[test]
    fn test_boost_warning_line() {
        let boost = Pid::Boost.channel();
        assert!(boost.is_warning(20.5));
        assert!(!boost.is_warning(19.9));
    }
}
