// Cleanup vocabulary and per-run result

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::job::JobId;

/// Why a job became a cleanup candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CleanupReason {
    AgeLimit,
    CountLimit,
    SizeLimit,
    StatusBased,
    Manual,
}

impl CleanupReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CleanupReason::AgeLimit => "AGE_LIMIT",
            CleanupReason::CountLimit => "COUNT_LIMIT",
            CleanupReason::SizeLimit => "SIZE_LIMIT",
            CleanupReason::StatusBased => "STATUS_BASED",
            CleanupReason::Manual => "MANUAL",
        }
    }
}

impl std::fmt::Display for CleanupReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to a matched job's record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStrategy {
    SoftDelete,
    HardDelete,
    Archive,
    Compress,
}

impl CleanupStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            CleanupStrategy::SoftDelete => "soft_delete",
            CleanupStrategy::HardDelete => "hard_delete",
            CleanupStrategy::Archive => "archive",
            CleanupStrategy::Compress => "compress",
        }
    }
}

impl std::str::FromStr for CleanupStrategy {
    type Err = super::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "soft_delete" => Ok(CleanupStrategy::SoftDelete),
            "hard_delete" => Ok(CleanupStrategy::HardDelete),
            "archive" => Ok(CleanupStrategy::Archive),
            "compress" => Ok(CleanupStrategy::Compress),
            other => Err(super::DomainError::ValidationError(format!(
                "unknown cleanup strategy: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for CleanupStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to one job-referenced file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Keep,
    Delete,
    Archive,
    Compress,
}

/// A job selected for cleanup together with every rule it matched
#[derive(Debug, Clone)]
pub struct CleanupCandidate {
    pub job: super::job::Job,
    pub reasons: Vec<CleanupReason>,
}

impl CleanupCandidate {
    /// Reasons joined for storage in `deletion_reason`
    pub fn reason_label(&self) -> String {
        self.reasons
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Error captured during a run; `job_id` is `None` for run-level failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupError {
    pub job_id: Option<JobId>,
    pub message: String,
}

/// Outcome of processing one candidate
#[derive(Debug, Clone, Default)]
pub struct JobCleanupOutcome {
    pub job_id: JobId,
    pub cleaned: bool,
    pub files_processed: u64,
    pub files_cleaned: u64,
    pub files_archived: u64,
    pub files_compressed: u64,
    pub space_freed: u64,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

/// Result of one cleanup run
///
/// Built up while the run progresses, then frozen by [`CleanupResult::complete`]
/// or [`CleanupResult::fail`]. Mutators are no-ops afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub dry_run: bool,
    pub success: bool,
    pub jobs_processed: u64,
    pub jobs_cleaned: u64,
    pub files_processed: u64,
    pub files_cleaned: u64,
    pub files_archived: u64,
    pub files_compressed: u64,
    pub space_freed: u64,
    pub cleaned_job_ids: Vec<JobId>,
    pub errors: Vec<CleanupError>,
    pub warnings: Vec<String>,
    pub by_reason: BTreeMap<CleanupReason, u64>,
    pub by_strategy: BTreeMap<CleanupStrategy, u64>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub duration_ms: Option<i64>,
}

impl CleanupResult {
    pub fn new(started_at: i64, dry_run: bool) -> Self {
        Self {
            dry_run,
            success: false,
            jobs_processed: 0,
            jobs_cleaned: 0,
            files_processed: 0,
            files_cleaned: 0,
            files_archived: 0,
            files_compressed: 0,
            space_freed: 0,
            cleaned_job_ids: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            by_reason: BTreeMap::new(),
            by_strategy: BTreeMap::new(),
            started_at,
            finished_at: None,
            duration_ms: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        if !self.is_complete() {
            self.warnings.push(warning.into());
        }
    }

    pub fn add_error(&mut self, job_id: Option<JobId>, message: impl Into<String>) {
        if !self.is_complete() {
            self.errors.push(CleanupError {
                job_id,
                message: message.into(),
            });
        }
    }

    /// Fold one candidate's outcome into the run totals
    pub fn record(
        &mut self,
        candidate: &CleanupCandidate,
        strategy: CleanupStrategy,
        outcome: JobCleanupOutcome,
    ) {
        if self.is_complete() {
            return;
        }

        self.jobs_processed += 1;
        self.files_processed += outcome.files_processed;
        self.files_cleaned += outcome.files_cleaned;
        self.files_archived += outcome.files_archived;
        self.files_compressed += outcome.files_compressed;
        self.space_freed += outcome.space_freed;
        self.warnings.extend(outcome.warnings);

        if let Some(message) = outcome.error {
            self.errors.push(CleanupError {
                job_id: Some(outcome.job_id),
                message,
            });
            return;
        }

        if outcome.cleaned {
            self.jobs_cleaned += 1;
            self.cleaned_job_ids.push(outcome.job_id);
            for reason in &candidate.reasons {
                *self.by_reason.entry(*reason).or_insert(0) += 1;
            }
            *self.by_strategy.entry(strategy).or_insert(0) += 1;
        }
    }

    /// Freeze a run that reached the end of the pipeline
    pub fn complete(&mut self, finished_at: i64) {
        if self.is_complete() {
            return;
        }
        self.success = true;
        self.finished_at = Some(finished_at);
        self.duration_ms = Some((finished_at - self.started_at).max(0));
    }

    /// Freeze a run aborted by a run-level failure
    pub fn fail(&mut self, finished_at: i64, message: impl Into<String>) {
        if self.is_complete() {
            return;
        }
        self.errors.push(CleanupError {
            job_id: None,
            message: message.into(),
        });
        self.success = false;
        self.finished_at = Some(finished_at);
        self.duration_ms = Some((finished_at - self.started_at).max(0));
    }
}
