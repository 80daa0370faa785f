//! Driving Scenarios
//!
//! A small state machine over driving scenarios. The active scenario decides
//! each channel's baseline; scenario changes ramp the baseline over a
//! transition period instead of stepping.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use telemetry_core::Channel;
use tracing::{debug, info};

/// Driving scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    #[default]
    Idle,
    Cruising,
    Acceleration,
    HardDriving,
}

impl Scenario {
    /// All scenarios
    pub const ALL: [Scenario; 4] = [
        Scenario::Idle,
        Scenario::Cruising,
        Scenario::Acceleration,
        Scenario::HardDriving,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Idle => "idle",
            Scenario::Cruising => "cruising",
            Scenario::Acceleration => "acceleration",
            Scenario::HardDriving => "hard_driving",
        }
    }

    /// Scenario-specific target for a channel, if the scenario defines one
    pub fn target(&self, channel_id: &str) -> Option<f64> {
        let value = match (self, channel_id) {
            (Scenario::Idle, "RPM") => 850.0,
            (Scenario::Idle, "SPEED") => 0.0,
            (Scenario::Idle, "THROTTLE") => 0.0,
            (Scenario::Idle, "ENGINE_LOAD") => 15.0,
            (Scenario::Idle, "BOOST") => -3.0,
            (Scenario::Idle, "TURBO_SPEED") => 0.0,

            (Scenario::Cruising, "RPM") => 2500.0,
            (Scenario::Cruising, "SPEED") => 60.0,
            (Scenario::Cruising, "THROTTLE") => 25.0,
            (Scenario::Cruising, "ENGINE_LOAD") => 30.0,
            (Scenario::Cruising, "BOOST") => 0.0,
            (Scenario::Cruising, "TURBO_SPEED") => 80_000.0,

            (Scenario::Acceleration, "RPM") => 4500.0,
            (Scenario::Acceleration, "SPEED") => 80.0,
            (Scenario::Acceleration, "THROTTLE") => 75.0,
            (Scenario::Acceleration, "ENGINE_LOAD") => 80.0,
            (Scenario::Acceleration, "BOOST") => 18.0,
            (Scenario::Acceleration, "TURBO_SPEED") => 200_000.0,

            (Scenario::HardDriving, "RPM") => 5500.0,
            (Scenario::HardDriving, "SPEED") => 100.0,
            (Scenario::HardDriving, "THROTTLE") => 95.0,
            (Scenario::HardDriving, "ENGINE_LOAD") => 95.0,
            (Scenario::HardDriving, "BOOST") => 21.0,
            (Scenario::HardDriving, "TURBO_SPEED") => 230_000.0,
            (Scenario::HardDriving, "OIL_TEMP") => 240.0,

            _ => return None,
        };
        Some(value)
    }

    /// Baseline for a channel: the scenario target, else the channel midpoint
    pub fn baseline(&self, channel: &Channel) -> f64 {
        self.target(&channel.id).unwrap_or_else(|| channel.midpoint())
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised scenario name
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unknown scenario: {0}")]
pub struct UnknownScenario(pub String);

impl FromStr for Scenario {
    type Err = UnknownScenario;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(Scenario::Idle),
            "cruise" | "cruising" => Ok(Scenario::Cruising),
            "acceleration" | "accelerating" => Ok(Scenario::Acceleration),
            "hard_driving" | "hard-driving" => Ok(Scenario::HardDriving),
            other => Err(UnknownScenario(other.to_string())),
        }
    }
}

/// One step of a timed schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStep {
    pub scenario: Scenario,
    pub duration_secs: f64,
}

/// Longest accepted timed step (one year)
pub const MAX_STEP_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// How the scenario changes over time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScenarioSchedule {
    /// Stay in one scenario until commanded otherwise
    Fixed { scenario: Scenario },
    /// Cycle through the steps in order
    Timed { steps: Vec<ScheduleStep> },
    /// Each tick switches to a random scenario with this probability
    Random { switch_probability: f64 },
}

impl Default for ScenarioSchedule {
    fn default() -> Self {
        ScenarioSchedule::Random {
            switch_probability: 0.01,
        }
    }
}

impl ScenarioSchedule {
    fn initial(&self) -> Scenario {
        match self {
            ScenarioSchedule::Fixed { scenario } => *scenario,
            ScenarioSchedule::Timed { steps } => steps.first().map(|s| s.scenario).unwrap_or_default(),
            ScenarioSchedule::Random { .. } => Scenario::Idle,
        }
    }

    /// Check the schedule is usable
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ScenarioSchedule::Fixed { .. } => Ok(()),
            ScenarioSchedule::Timed { steps } => {
                if steps.is_empty() {
                    return Err("timed schedule has no steps".to_string());
                }
                if steps
                    .iter()
                    .any(|s| !(s.duration_secs > 0.0 && s.duration_secs <= MAX_STEP_SECS))
                {
                    return Err(format!(
                        "timed schedule step durations must be in (0, {}] seconds",
                        MAX_STEP_SECS
                    ));
                }
                Ok(())
            }
            ScenarioSchedule::Random { switch_probability } => {
                if (0.0..=1.0).contains(switch_probability) {
                    Ok(())
                } else {
                    Err(format!("switch probability {} outside [0, 1]", switch_probability))
                }
            }
        }
    }
}

/// Scenario state machine
#[derive(Debug, Clone)]
pub struct ScenarioMachine {
    schedule: ScenarioSchedule,
    current: Scenario,
    previous: Scenario,
    /// When `current` was entered
    entered_at: Duration,
    /// Index and start time of the active timed step
    step_index: usize,
    step_started: Duration,
    transition: Duration,
}

impl ScenarioMachine {
    /// Create a machine at time zero
    pub fn new(schedule: ScenarioSchedule, transition: Duration) -> Self {
        let initial = schedule.initial();
        Self {
            schedule,
            current: initial,
            previous: initial,
            entered_at: Duration::ZERO,
            step_index: 0,
            step_started: Duration::ZERO,
            transition,
        }
    }

    /// Active scenario
    pub fn current(&self) -> Scenario {
        self.current
    }

    /// Advance to `elapsed`, returning the new scenario if it changed
    pub fn advance(&mut self, elapsed: Duration, rng: &mut StdRng) -> Option<Scenario> {
        let next = match &self.schedule {
            ScenarioSchedule::Fixed { .. } => None,
            ScenarioSchedule::Timed { steps } if !steps.is_empty() => {
                let mut index = self.step_index;
                let mut started = self.step_started;
                let mut moved = false;
                loop {
                    let step = Duration::from_secs_f64(steps[index].duration_secs);
                    if elapsed < started + step {
                        break;
                    }
                    started += step;
                    index = (index + 1) % steps.len();
                    moved = true;
                }
                self.step_index = index;
                self.step_started = started;
                moved.then(|| steps[index].scenario)
            }
            ScenarioSchedule::Timed { .. } => None,
            ScenarioSchedule::Random { switch_probability } => {
                if *switch_probability > 0.0 && rng.gen_bool(*switch_probability) {
                    Some(Scenario::ALL[rng.gen_range(0..Scenario::ALL.len())])
                } else {
                    None
                }
            }
        };

        match next {
            Some(scenario) if scenario != self.current => {
                debug!("Scenario {} -> {} at {:?}", self.current, scenario, elapsed);
                self.enter(scenario, elapsed);
                Some(scenario)
            }
            _ => None,
        }
    }

    /// Switch scenario on external command.
    ///
    /// On a timed schedule the override lasts until the next step boundary.
    pub fn command(&mut self, scenario: Scenario, elapsed: Duration) {
        if scenario != self.current {
            info!("Scenario commanded: {} -> {}", self.current, scenario);
            self.enter(scenario, elapsed);
        }
    }

    fn enter(&mut self, scenario: Scenario, elapsed: Duration) {
        self.previous = self.current;
        self.current = scenario;
        self.entered_at = elapsed;
    }

    /// Baseline for a channel at `elapsed`, blended across the last transition
    pub fn baseline(&self, channel: &Channel, elapsed: Duration) -> f64 {
        let target = self.current.baseline(channel);
        let since = elapsed.saturating_sub(self.entered_at);
        if self.transition.is_zero() || since >= self.transition {
            return target;
        }
        let from = self.previous.baseline(channel);
        let t = since.as_secs_f64() / self.transition.as_secs_f64();
        from + (target - from) * t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use telemetry_core::Pid;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_parse_scenarios() {
        assert_eq!("cruise".parse::<Scenario>().unwrap(), Scenario::Cruising);
        assert_eq!("Hard_Driving".parse::<Scenario>().unwrap(), Scenario::HardDriving);
        assert!("drifting".parse::<Scenario>().is_err());
    }

    #[test]
    fn test_baseline_fallback_to_midpoint() {
        let coolant = Pid::CoolantTemp.channel();
        assert_eq!(Scenario::Idle.baseline(&coolant), coolant.midpoint());
        assert_eq!(Scenario::HardDriving.baseline(&Pid::Rpm.channel()), 5500.0);
    }

    #[test]
    fn test_timed_schedule_cycles() {
        let schedule = ScenarioSchedule::Timed {
            steps: vec![
                ScheduleStep { scenario: Scenario::Idle, duration_secs: 2.0 },
                ScheduleStep { scenario: Scenario::Acceleration, duration_secs: 1.0 },
            ],
        };
        let mut machine = ScenarioMachine::new(schedule, Duration::ZERO);
        let mut rng = rng();
        assert_eq!(machine.current(), Scenario::Idle);
        assert_eq!(machine.advance(Duration::from_millis(1900), &mut rng), None);
        assert_eq!(
            machine.advance(Duration::from_secs(2), &mut rng),
            Some(Scenario::Acceleration)
        );
        assert_eq!(machine.advance(Duration::from_secs(3), &mut rng), Some(Scenario::Idle));
        // A long gap skips whole cycles
        machine.advance(Duration::from_millis(8500), &mut rng);
        assert_eq!(machine.current(), Scenario::Acceleration);
    }

    #[test]
    fn test_command_overrides_until_step_boundary() {
        let schedule = ScenarioSchedule::Timed {
            steps: vec![
                ScheduleStep { scenario: Scenario::Idle, duration_secs: 10.0 },
                ScheduleStep { scenario: Scenario::Cruising, duration_secs: 10.0 },
            ],
        };
        let mut machine = ScenarioMachine::new(schedule, Duration::ZERO);
        let mut rng = rng();
        machine.command(Scenario::HardDriving, Duration::from_secs(1));
        assert_eq!(machine.advance(Duration::from_secs(5), &mut rng), None);
        assert_eq!(machine.current(), Scenario::HardDriving);
        machine.advance(Duration::from_secs(10), &mut rng);
        assert_eq!(machine.current(), Scenario::Cruising);
    }

    #[test]
    fn test_baseline_blends_during_transition() {
        let rpm = Pid::Rpm.channel();
        let mut machine = ScenarioMachine::new(
            ScenarioSchedule::Fixed { scenario: Scenario::Idle },
            Duration::from_secs(2),
        );
        machine.command(Scenario::Cruising, Duration::from_secs(10));
        let halfway = machine.baseline(&rpm, Duration::from_secs(11));
        assert!((halfway - (850.0 + 2500.0) / 2.0).abs() < 1e-9);
        assert_eq!(machine.baseline(&rpm, Duration::from_secs(12)), 2500.0);
    }

    #[test]
    fn test_schedule_validation() {
        assert!(ScenarioSchedule::Timed { steps: vec![] }.validate().is_err());
        assert!(ScenarioSchedule::Random { switch_probability: 1.5 }.validate().is_err());
        assert!(ScenarioSchedule::default().validate().is_ok());
    }
}
