// Job Domain Model

use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};
use super::priority::Priority;

/// Job ID (opaque, unique)
pub type JobId = String;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Converting,
    Paused,
    Completed,
    #[serde(alias = "failed")]
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Converting => "converting",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Finished jobs no longer move through the queue
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "queued" => Ok(JobStatus::Queued),
            "converting" => Ok(JobStatus::Converting),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "error" | "failed" => Ok(JobStatus::Error),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(DomainError::ValidationError(format!(
                "unknown job status: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversion settings (opaque to the scheduler and the cleanup engine)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobSettings(serde_json::Value);

impl JobSettings {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Job Entity
///
/// Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,

    // Scheduling
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub original_priority: Option<Priority>,
    #[serde(default)]
    pub priority_boost: i64,
    #[serde(default)]
    pub emergency_boosted: bool,
    #[serde(default)]
    pub queued_at: Option<i64>,

    // Lifecycle
    pub status: JobStatus,
    pub created_at: i64,
    pub updated_at: i64,

    // Cleanup marks
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<i64>,
    #[serde(default)]
    pub deletion_reason: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub archived_at: Option<i64>,
    #[serde(default)]
    pub archive_path: Option<String>,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub compressed_at: Option<i64>,

    // Files
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub input_file: Option<String>,
    #[serde(default)]
    pub output_file: Option<String>,
    #[serde(default)]
    pub temp_files: Vec<String>,
    #[serde(default)]
    pub log_files: Vec<String>,

    #[serde(default)]
    pub settings: JobSettings,
}

impl Job {
    /// Create a new pending job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    pub fn new(id: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            priority: Priority::Normal,
            original_priority: None,
            priority_boost: 0,
            emergency_boosted: false,
            queued_at: None,
            status: JobStatus::Pending,
            created_at,
            updated_at: created_at,
            deleted: false,
            deleted_at: None,
            deletion_reason: None,
            archived: false,
            archived_at: None,
            archive_path: None,
            compressed: false,
            compressed_at: None,
            file_size: 0,
            input_file: None,
            output_file: None,
            temp_files: Vec::new(),
            log_files: Vec::new(),
            settings: JobSettings::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: JobStatus, updated_at: i64) -> Self {
        self.status = status;
        self.updated_at = updated_at;
        self
    }

    /// Stamp the job for entry into a priority tier
    ///
    /// `emergency_boosted` survives re-queueing.
    pub fn enqueue(&mut self, now_millis: i64) {
        self.queued_at = Some(now_millis);
        self.original_priority = Some(self.priority);
        self.priority_boost = 0;
        self.status = JobStatus::Queued;
        self.updated_at = now_millis;
    }

    /// Apply the one-time starvation boost; returns false if already applied
    pub fn apply_emergency_boost(&mut self, boost: i64) -> bool {
        if self.emergency_boosted {
            return false;
        }
        self.priority_boost += boost.max(0);
        self.emergency_boosted = true;
        true
    }

    /// Time spent waiting in the queue
    pub fn wait_millis(&self, now_millis: i64) -> i64 {
        self.queued_at
            .map(|queued_at| (now_millis - queued_at).max(0))
            .unwrap_or(0)
    }

    /// Transition to Converting with explicit timestamp
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Queued && self.status != JobStatus::Pending {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: JobStatus::Converting.to_string(),
            });
        }
        self.status = JobStatus::Converting;
        self.updated_at = now_millis;
        Ok(())
    }

    /// Transition to Completed with explicit timestamp
    pub fn complete(&mut self, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Converting {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: JobStatus::Completed.to_string(),
            });
        }
        self.status = JobStatus::Completed;
        self.updated_at = now_millis;
        Ok(())
    }

    /// Mark as Error with explicit timestamp
    pub fn fail(&mut self, now_millis: i64) {
        self.status = JobStatus::Error;
        self.updated_at = now_millis;
    }

    /// Every file path the job references, tagged with its kind
    pub fn files(&self) -> Vec<(FileKind, &str)> {
        let mut files = Vec::new();
        if let Some(input) = &self.input_file {
            files.push((FileKind::Input, input.as_str()));
        }
        if let Some(output) = &self.output_file {
            files.push((FileKind::Output, output.as_str()));
        }
        files.extend(self.temp_files.iter().map(|p| (FileKind::Temp, p.as_str())));
        files.extend(self.log_files.iter().map(|p| (FileKind::Logs, p.as_str())));
        files
    }

    /// Record has already been reclaimed by a soft strategy
    pub fn is_reclaimed(&self) -> bool {
        self.deleted || self.archived || self.compressed
    }
}

/// Kind of a job-referenced file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Input,
    Output,
    Temp,
    Logs,
}

/// Partial update applied by the job history store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub priority: Option<Priority>,
    pub soft_delete: Option<SoftDeleteMark>,
    pub archive: Option<ArchiveMark>,
    pub compressed_at: Option<i64>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoftDeleteMark {
    pub at: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveMark {
    pub at: i64,
    pub path: String,
}

impl JobPatch {
    pub fn soft_delete(at: i64, reason: impl Into<String>) -> Self {
        Self {
            soft_delete: Some(SoftDeleteMark {
                at,
                reason: reason.into(),
            }),
            updated_at: Some(at),
            ..Default::default()
        }
    }

    pub fn archived(at: i64, path: impl Into<String>) -> Self {
        Self {
            archive: Some(ArchiveMark {
                at,
                path: path.into(),
            }),
            updated_at: Some(at),
            ..Default::default()
        }
    }

    pub fn compressed(at: i64) -> Self {
        Self {
            compressed_at: Some(at),
            updated_at: Some(at),
            ..Default::default()
        }
    }

    pub fn apply(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(priority) = self.priority {
            job.priority = priority;
        }
        if let Some(mark) = &self.soft_delete {
            job.deleted = true;
            job.deleted_at = Some(mark.at);
            job.deletion_reason = Some(mark.reason.clone());
        }
        if let Some(mark) = &self.archive {
            job.archived = true;
            job.archived_at = Some(mark.at);
            job.archive_path = Some(mark.path.clone());
        }
        if let Some(at) = self.compressed_at {
            job.compressed = true;
            job.compressed_at = Some(at);
        }
        if let Some(at) = self.updated_at {
            job.updated_at = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_resets_boost() {
        let mut job = Job::new("a", 1000).with_priority(Priority::High);
        job.priority_boost = 42;
        job.emergency_boosted = true;

        job.enqueue(5000);

        assert_eq!(job.queued_at, Some(5000));
        assert_eq!(job.original_priority, Some(Priority::High));
        assert_eq!(job.priority_boost, 0);
        // Starvation relief is granted once per job, even across re-queues
        assert!(job.emergency_boosted);
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_emergency_boost_applies_once() {
        let mut job = Job::new("a", 0);
        assert!(job.apply_emergency_boost(500));
        assert!(!job.apply_emergency_boost(500));
        assert_eq!(job.priority_boost, 500);
    }

    #[test]
    fn test_lifecycle() {
        let mut job = Job::new("a", 0);
        job.enqueue(10);
        assert!(job.start(20).is_ok());
        assert!(job.start(30).is_err());
        assert!(job.complete(40).is_ok());
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.updated_at, 40);
    }

    #[test]
    fn test_failed_alias() {
        let status: JobStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(status, JobStatus::Error);
        assert_eq!("failed".parse::<JobStatus>().unwrap(), JobStatus::Error);
    }

    #[test]
    fn test_files_tagged_by_kind() {
        let mut job = Job::new("a", 0);
        job.input_file = Some("/in.docx".into());
        job.temp_files = vec!["/tmp/a".into(), "/tmp/b".into()];
        job.log_files = vec!["/log/a.log".into()];

        let kinds: Vec<FileKind> = job.files().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![FileKind::Input, FileKind::Temp, FileKind::Temp, FileKind::Logs]
        );
    }

    #[test]
    fn test_patch_apply() {
        let mut job = Job::new("a", 0);
        JobPatch::soft_delete(100, "age_limit").apply(&mut job);
        assert!(job.deleted);
        assert_eq!(job.deletion_reason.as_deref(), Some("age_limit"));
        assert_eq!(job.updated_at, 100);

        JobPatch::archived(200, "/archive/jobs/a.json").apply(&mut job);
        assert!(job.archived);
        assert!(job.is_reclaimed());
    }

    #[test]
    fn test_job_serialization() {
        let mut job = Job::new("ser-1", 1000);
        job.settings = JobSettings::new(serde_json::json!({"format": "pdf"}));

        let json = serde_json::to_string(&job).expect("serialize");
        assert!(json.contains("\"createdAt\":1000"));
        let back: Job = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, job);
    }
}
