// Priority tiers

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::DomainError;

/// Priority tier of a queued job.
///
/// Deserialization is lenient: anything that is not one of the four tier
/// names becomes `Normal`. Use [`Priority::from_str`] where invalid input
/// must be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    /// Tiers in dispatch order
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Position of the tier in dispatch order (0 = dispatched first)
    pub fn index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    /// Normalize arbitrary input to a tier; unknown values map to `Normal`
    pub fn normalize(raw: &str) -> Self {
        raw.parse().unwrap_or(Priority::Normal)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl FromStr for Priority {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            _ => Err(DomainError::InvalidPriority(s.to_string())),
        }
    }
}

impl From<String> for Priority {
    fn from(raw: String) -> Self {
        Priority::normalize(&raw)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

/// Base score of each tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierWeights {
    #[serde(default = "default_critical_weight")]
    pub critical: i64,
    #[serde(default = "default_high_weight")]
    pub high: i64,
    #[serde(default = "default_normal_weight")]
    pub normal: i64,
    #[serde(default = "default_low_weight")]
    pub low: i64,
}

fn default_critical_weight() -> i64 {
    1000
}

fn default_high_weight() -> i64 {
    100
}

fn default_normal_weight() -> i64 {
    10
}

fn default_low_weight() -> i64 {
    1
}

impl TierWeights {
    pub fn weight(&self, priority: Priority) -> i64 {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }
}

impl Default for TierWeights {
    fn default() -> Self {
        Self {
            critical: default_critical_weight(),
            high: default_high_weight(),
            normal: default_normal_weight(),
            low: default_low_weight(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_parse_rejects_unknown() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_normalize_unknown_to_normal() {
        assert_eq!(Priority::normalize("urgent"), Priority::Normal);
        assert_eq!(Priority::normalize(" low "), Priority::Low);
    }

    #[test]
    fn test_lenient_deserialization() {
        let p: Priority = serde_json::from_str("\"bogus\"").unwrap();
        assert_eq!(p, Priority::Normal);

        let p: Priority = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(p, Priority::Critical);
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"critical\"");
    }

    #[test]
    fn test_default_weights() {
        let weights = TierWeights::default();
        assert_eq!(weights.weight(Priority::Critical), 1000);
        assert_eq!(weights.weight(Priority::Low), 1);
    }
}
