// Scheduler Configuration

use serde::{Deserialize, Serialize};

use super::priority::TierWeights;

/// Score bonus earned per elapsed boost interval
pub const AGE_BONUS_STEP: i64 = 5;

/// Age bonus accrual
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_boost_interval_ms")]
    pub boost_interval_ms: u64,
    #[serde(default = "default_max_boost")]
    pub max_boost: i64,
}

/// One-time emergency boost for jobs waiting too long
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarvationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_emergency_boost")]
    pub emergency_boost: i64,
}

/// Priority scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub weights: TierWeights,
    #[serde(default)]
    pub aging: AgingConfig,
    #[serde(default)]
    pub starvation: StarvationConfig,
    /// Jobs executed in parallel by the executor pool (used for ETA)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// ETA basis until processing times have been observed
    #[serde(default = "default_average_processing_ms")]
    pub average_processing_ms: u64,
    /// Period of the aging-progress tick
    #[serde(default = "default_aging_tick_ms")]
    pub aging_tick_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_boost_interval_ms() -> u64 {
    60_000
}

fn default_max_boost() -> i64 {
    50
}

fn default_max_wait_ms() -> u64 {
    5 * 60_000
}

fn default_emergency_boost() -> i64 {
    500
}

fn default_concurrency() -> usize {
    2
}

fn default_average_processing_ms() -> u64 {
    30_000
}

fn default_aging_tick_ms() -> u64 {
    30_000
}

impl Default for AgingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            boost_interval_ms: default_boost_interval_ms(),
            max_boost: default_max_boost(),
        }
    }
}

impl Default for StarvationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_wait_ms: default_max_wait_ms(),
            emergency_boost: default_emergency_boost(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            weights: TierWeights::default(),
            aging: AgingConfig::default(),
            starvation: StarvationConfig::default(),
            concurrency: default_concurrency(),
            average_processing_ms: default_average_processing_ms(),
            aging_tick_ms: default_aging_tick_ms(),
        }
    }
}

impl AgingConfig {
    /// `min(floor(age / interval) * 5, max_boost)`; zero when disabled
    pub fn age_bonus(&self, age_ms: i64) -> i64 {
        if !self.enabled || self.boost_interval_ms == 0 || age_ms <= 0 {
            return 0;
        }
        let intervals = age_ms / self.boost_interval_ms as i64;
        intervals
            .saturating_mul(AGE_BONUS_STEP)
            .min(self.max_boost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_bonus_steps_and_caps() {
        let aging = AgingConfig {
            enabled: true,
            boost_interval_ms: 1000,
            max_boost: 20,
        };
        assert_eq!(aging.age_bonus(999), 0);
        assert_eq!(aging.age_bonus(1000), 5);
        assert_eq!(aging.age_bonus(3500), 15);
        assert_eq!(aging.age_bonus(1_000_000), 20);
    }

    #[test]
    fn test_age_bonus_disabled() {
        let aging = AgingConfig {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(aging.age_bonus(10_000_000), 0);
    }
}
