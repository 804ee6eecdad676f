// Job History Port (Interface)

use crate::domain::{Job, JobPatch};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Current version of the exported history format
pub const HISTORY_SNAPSHOT_VERSION: u32 = 1;

/// Full export of the job history (used for pre-cleanup backups)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnapshot {
    pub version: u32,
    pub exported_at: i64,
    pub jobs: Vec<Job>,
}

impl HistorySnapshot {
    pub fn new(exported_at: i64, jobs: Vec<Job>) -> Self {
        Self {
            version: HISTORY_SNAPSHOT_VERSION,
            exported_at,
            jobs,
        }
    }
}

/// System of record for job data
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobHistory: Send + Sync {
    /// All jobs, soft-deleted ones included
    async fn get_all_jobs(&self) -> Result<Vec<Job>>;

    /// Find job by ID
    async fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// Apply a partial update and return the updated job
    ///
    /// # Errors
    /// - AppError::NotFound if the job does not exist
    async fn update_job(&self, id: &str, patch: JobPatch) -> Result<Job>;

    /// Remove the record entirely; returns false if it did not exist
    async fn remove_job(&self, id: &str) -> Result<bool>;

    /// Export the complete history
    async fn export_history(&self) -> Result<HistorySnapshot>;

    /// Insert or replace a job record
    async fn upsert_job(&self, job: &Job) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::Mutex;

    /// In-memory history preserving insertion order
    #[derive(Default)]
    pub struct InMemoryJobHistory {
        jobs: Mutex<Vec<Job>>,
        exported_at: i64,
    }

    impl InMemoryJobHistory {
        pub fn new(jobs: Vec<Job>) -> Self {
            Self {
                jobs: Mutex::new(jobs),
                exported_at: 0,
            }
        }

        pub fn snapshot(&self) -> Vec<Job> {
            self.jobs.lock().unwrap().clone()
        }

        pub fn len(&self) -> usize {
            self.jobs.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl JobHistory for InMemoryJobHistory {
        async fn get_all_jobs(&self) -> Result<Vec<Job>> {
            Ok(self.snapshot())
        }

        async fn get_job(&self, id: &str) -> Result<Option<Job>> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .find(|job| job.id == id)
                .cloned())
        }

        async fn update_job(&self, id: &str, patch: JobPatch) -> Result<Job> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .iter_mut()
                .find(|job| job.id == id)
                .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
            patch.apply(job);
            Ok(job.clone())
        }

        async fn remove_job(&self, id: &str) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            let before = jobs.len();
            jobs.retain(|job| job.id != id);
            Ok(jobs.len() != before)
        }

        async fn export_history(&self) -> Result<HistorySnapshot> {
            Ok(HistorySnapshot::new(self.exported_at, self.snapshot()))
        }

        async fn upsert_job(&self, job: &Job) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.iter_mut().find(|existing| existing.id == job.id) {
                Some(existing) => *existing = job.clone(),
                None => jobs.push(job.clone()),
            }
            Ok(())
        }
    }
}
