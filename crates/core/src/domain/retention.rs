//! Retention policy configuration.
//!
//! Process-wide and hot-reloadable: the cleanup service deep-merges partial
//! JSON documents into the live value (see [`RetentionConfig::merged`]).
//!
//! # Example
//!
//! ```toml
//! [retention.rules]
//! max_age_ms = 2592000000          # 30 days
//! max_count = 1000
//! status_retention_ms = { error = 604800000, cancelled = 86400000 }
//!
//! [retention.strategy]
//! default = "soft_delete"
//! by_status = { error = "hard_delete" }
//!
//! [retention.schedule]
//! enabled = true
//! expression = "0 2 * * *"
//! timezone = "Europe/Berlin"
//!
//! [retention.safety]
//! dry_run = false
//! protected_jobs = ["job-42"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::cleanup::{CleanupStrategy, FileAction};
use super::error::{DomainError, Result};
use super::job::{FileKind, JobId, JobStatus};

pub const DAY_MS: u64 = 24 * 60 * 60 * 1000;
pub const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    #[serde(default)]
    pub rules: RetentionRules,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub file_actions: FileActions,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Conditions that turn a job into a cleanup candidate.
/// `None` disables the corresponding limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionRules {
    /// Global maximum age since creation
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: Option<u64>,

    /// Per-status replacement for `max_age_ms`
    #[serde(default)]
    pub max_age_by_status_ms: HashMap<JobStatus, u64>,

    /// Time since last update after which error/cancelled jobs are reclaimed
    #[serde(default = "default_status_retention_ms")]
    pub status_retention_ms: HashMap<JobStatus, u64>,

    /// Number of newest jobs to keep
    #[serde(default = "default_max_count")]
    pub max_count: Option<usize>,

    /// Upper bound on the summed `file_size` of all jobs
    #[serde(default = "default_max_total_size_bytes")]
    pub max_total_size_bytes: Option<u64>,
}

fn default_max_age_ms() -> Option<u64> {
    Some(30 * DAY_MS)
}

fn default_status_retention_ms() -> HashMap<JobStatus, u64> {
    HashMap::from([
        (JobStatus::Error, 7 * DAY_MS),
        (JobStatus::Cancelled, DAY_MS),
    ])
}

fn default_max_count() -> Option<usize> {
    Some(1000)
}

fn default_max_total_size_bytes() -> Option<u64> {
    Some(10 * GIB)
}

impl Default for RetentionRules {
    fn default() -> Self {
        Self {
            max_age_ms: default_max_age_ms(),
            max_age_by_status_ms: HashMap::new(),
            status_retention_ms: default_status_retention_ms(),
            max_count: default_max_count(),
            max_total_size_bytes: default_max_total_size_bytes(),
        }
    }
}

impl RetentionRules {
    /// Effective age limit for a job in `status`
    pub fn max_age_for(&self, status: JobStatus) -> Option<u64> {
        self.max_age_by_status_ms
            .get(&status)
            .copied()
            .or(self.max_age_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    #[serde(default = "default_strategy")]
    pub default: CleanupStrategy,
    #[serde(default)]
    pub by_status: HashMap<JobStatus, CleanupStrategy>,
}

fn default_strategy() -> CleanupStrategy {
    CleanupStrategy::SoftDelete
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            default: default_strategy(),
            by_status: HashMap::new(),
        }
    }
}

impl StrategyConfig {
    pub fn for_status(&self, status: JobStatus) -> CleanupStrategy {
        self.by_status.get(&status).copied().unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileActions {
    #[serde(default = "keep")]
    pub input: FileAction,
    #[serde(default = "keep")]
    pub output: FileAction,
    #[serde(default = "delete")]
    pub temp: FileAction,
    #[serde(default = "delete")]
    pub logs: FileAction,
}

fn keep() -> FileAction {
    FileAction::Keep
}

fn delete() -> FileAction {
    FileAction::Delete
}

impl Default for FileActions {
    fn default() -> Self {
        Self {
            input: keep(),
            output: keep(),
            temp: delete(),
            logs: delete(),
        }
    }
}

impl FileActions {
    pub fn for_kind(&self, kind: FileKind) -> FileAction {
        match kind {
            FileKind::Input => self.input,
            FileKind::Output => self.output,
            FileKind::Temp => self.temp,
            FileKind::Logs => self.logs,
        }
    }

    pub fn uses(&self, action: FileAction) -> bool {
        [self.input, self.output, self.temp, self.logs].contains(&action)
    }
}

/// Recurring trigger for automatic cleanups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Cron expression; five fields (minute first) or six (seconds first)
    #[serde(default = "default_expression")]
    pub expression: String,
    /// IANA timezone name
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_expression() -> String {
    "0 2 * * *".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            expression: default_expression(),
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerformanceConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between consecutive batches
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,
}

fn default_batch_size() -> usize {
    50
}

fn default_batch_pause_ms() -> u64 {
    100
}

fn default_max_concurrent_operations() -> usize {
    5
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            max_concurrent_operations: default_max_concurrent_operations(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SafetyConfig {
    #[serde(default)]
    pub dry_run: bool,
    /// Jobs that are never selected, whatever the rules say
    #[serde(default)]
    pub protected_jobs: HashSet<JobId>,
    #[serde(default = "default_true")]
    pub backup_before_cleanup: bool,
    /// Free space floor for the archive volume; dropping below it is reported
    #[serde(default = "default_min_free_space_bytes")]
    pub min_free_space_bytes: u64,
}

fn default_true() -> bool {
    true
}

fn default_min_free_space_bytes() -> u64 {
    GIB
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            protected_jobs: HashSet::new(),
            backup_before_cleanup: true,
            min_free_space_bytes: default_min_free_space_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
}

fn default_archive_dir() -> String {
    "archive".to_string()
}

fn default_backup_dir() -> String {
    "backups".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            archive_dir: default_archive_dir(),
            backup_dir: default_backup_dir(),
        }
    }
}

impl RetentionConfig {
    /// Deep-merge a partial JSON document into a copy of this config.
    ///
    /// Objects merge key by key; every other value (arrays included) replaces
    /// the current one. The merged result is validated.
    pub fn merged(&self, partial: &serde_json::Value) -> Result<Self> {
        let mut base = serde_json::to_value(self)
            .map_err(|e| DomainError::ValidationError(e.to_string()))?;
        merge_json(&mut base, partial);
        let merged: RetentionConfig = serde_json::from_value(base)
            .map_err(|e| DomainError::ValidationError(format!("invalid retention config: {}", e)))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn validate(&self) -> Result<()> {
        if self.performance.batch_size == 0 {
            return Err(DomainError::ValidationError(
                "performance.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.performance.max_concurrent_operations == 0 {
            return Err(DomainError::ValidationError(
                "performance.max_concurrent_operations must be greater than zero".to_string(),
            ));
        }
        if self.schedule.expression.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "schedule.expression must not be empty".to_string(),
            ));
        }
        if self.storage.archive_dir.trim().is_empty() || self.storage.backup_dir.trim().is_empty()
        {
            return Err(DomainError::ValidationError(
                "storage directories must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = RetentionConfig::default();
        assert_eq!(config.rules.max_age_ms, Some(30 * DAY_MS));
        assert_eq!(config.rules.status_retention_ms[&JobStatus::Error], 7 * DAY_MS);
        assert_eq!(config.strategy.default, CleanupStrategy::SoftDelete);
        assert_eq!(config.file_actions.temp, FileAction::Delete);
        assert_eq!(config.performance.batch_size, 50);
        assert!(config.safety.backup_before_cleanup);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: RetentionConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, RetentionConfig::default());
    }

    #[test]
    fn test_deep_merge_keeps_siblings() {
        let config = RetentionConfig::default();
        let merged = config
            .merged(&json!({
                "rules": { "max_count": 10 },
                "strategy": { "by_status": { "failed": "hard_delete" } }
            }))
            .unwrap();

        assert_eq!(merged.rules.max_count, Some(10));
        assert_eq!(merged.rules.max_age_ms, Some(30 * DAY_MS));
        assert_eq!(
            merged.strategy.for_status(JobStatus::Error),
            CleanupStrategy::HardDelete
        );
        assert_eq!(
            merged.strategy.for_status(JobStatus::Completed),
            CleanupStrategy::SoftDelete
        );
    }

    #[test]
    fn test_merge_null_disables_limit() {
        let merged = RetentionConfig::default()
            .merged(&json!({ "rules": { "max_total_size_bytes": null } }))
            .unwrap();
        assert_eq!(merged.rules.max_total_size_bytes, None);
    }

    #[test]
    fn test_merge_rejects_invalid() {
        let config = RetentionConfig::default();
        assert!(config
            .merged(&json!({ "performance": { "batch_size": 0 } }))
            .is_err());
        assert!(config
            .merged(&json!({ "strategy": { "default": "shred" } }))
            .is_err());
    }

    #[test]
    fn test_merge_rejects_unknown_keys() {
        let config = RetentionConfig::default();

        for partial in [
            json!({ "rules": { "max_cnt": 5 } }),
            json!({ "safty": { "dry_run": true } }),
            json!({ "storage": { "archive": "/elsewhere" } }),
        ] {
            assert!(matches!(
                config.merged(&partial),
                Err(DomainError::ValidationError(_))
            ));
        }
    }

    #[test]
    fn test_max_age_override() {
        let mut rules = RetentionRules::default();
        rules.max_age_by_status_ms.insert(JobStatus::Completed, DAY_MS);
        assert_eq!(rules.max_age_for(JobStatus::Completed), Some(DAY_MS));
        assert_eq!(rules.max_age_for(JobStatus::Error), Some(30 * DAY_MS));
    }
}
