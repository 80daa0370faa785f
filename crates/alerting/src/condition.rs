//! Threshold Conditions

use crate::AlertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison applied as `value <op> threshold`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
}

impl Condition {
    pub const ALL: [Condition; 6] = [
        Condition::Gt,
        Condition::Gte,
        Condition::Lt,
        Condition::Lte,
        Condition::Eq,
        Condition::Neq,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Gt => "gt",
            Condition::Gte => "gte",
            Condition::Lt => "lt",
            Condition::Lte => "lte",
            Condition::Eq => "eq",
            Condition::Neq => "neq",
        }
    }

    /// Whether `value` satisfies the condition against `threshold`.
    ///
    /// `Eq` and `Neq` compare exactly; a converted value rarely hits a
    /// threshold bit for bit, so `eq` alerts are mostly useful on integer
    /// channels.
    #[allow(clippy::float_cmp)]
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Condition::Gt => value > threshold,
            Condition::Gte => value >= threshold,
            Condition::Lt => value < threshold,
            Condition::Lte => value <= threshold,
            Condition::Eq => value == threshold,
            Condition::Neq => value != threshold,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gt" => Ok(Condition::Gt),
            "gte" => Ok(Condition::Gte),
            "lt" => Ok(Condition::Lt),
            "lte" => Ok(Condition::Lte),
            "eq" => Ok(Condition::Eq),
            "neq" => Ok(Condition::Neq),
            _ => Err(AlertError::InvalidCondition(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("GT".parse::<Condition>().unwrap(), Condition::Gt);
        assert_eq!(" Lte ".parse::<Condition>().unwrap(), Condition::Lte);
        assert!(matches!(
            ">".parse::<Condition>(),
            Err(AlertError::InvalidCondition(_))
        ));
        for condition in Condition::ALL {
            assert_eq!(condition.as_str().parse::<Condition>().unwrap(), condition);
        }
    }

    #[test]
    fn test_holds() {
        assert!(Condition::Gt.holds(21.0, 20.0));
        assert!(!Condition::Gt.holds(20.0, 20.0));
        assert!(Condition::Gte.holds(20.0, 20.0));
        assert!(Condition::Lt.holds(-1.0, 0.0));
        assert!(Condition::Lte.holds(0.0, 0.0));
        assert!(Condition::Eq.holds(3.0, 3.0));
        assert!(!Condition::Eq.holds(0.1 + 0.2, 0.3));
        assert!(Condition::Neq.holds(0.1 + 0.2, 0.3));
    }
}
