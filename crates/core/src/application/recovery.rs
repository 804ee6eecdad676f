// Startup recovery
// Puts unfinished history jobs back into the priority queue
use crate::application::PriorityScheduler;
use crate::domain::{Job, JobPatch, JobStatus};
use crate::error::Result;
use crate::port::{JobHistory, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

/// Startup recovery service
///
/// The priority queue lives in memory only. On daemon startup every job the
/// history still lists as pending, queued or converting is queued again;
/// converting jobs were interrupted by the previous shutdown.
pub struct RecoveryService {
    history: Arc<dyn JobHistory>,
    scheduler: Arc<PriorityScheduler>,
    time_provider: Arc<dyn TimeProvider>,
}

impl RecoveryService {
    /// # Example
    /// ```ignore
    /// let recovery = RecoveryService::new(history, scheduler, time_provider);
    /// recovery.requeue_unfinished().await?;
    /// ```
    pub fn new(
        history: Arc<dyn JobHistory>,
        scheduler: Arc<PriorityScheduler>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            history,
            scheduler,
            time_provider,
        }
    }

    /// Queue unfinished jobs in their original arrival order
    ///
    /// Queue age is not carried over: re-queued jobs start aging from now.
    ///
    /// # Returns
    /// Number of jobs queued
    pub async fn requeue_unfinished(&self) -> Result<usize> {
        let mut unfinished: Vec<Job> = self
            .history
            .get_all_jobs()
            .await?
            .into_iter()
            .filter(|job| !job.is_reclaimed())
            .filter(|job| {
                matches!(
                    job.status,
                    JobStatus::Pending | JobStatus::Queued | JobStatus::Converting
                )
            })
            .collect();
        unfinished.sort_by_key(|job| job.queued_at.unwrap_or(job.created_at));

        let now = self.time_provider.now_millis();
        let mut requeued = 0;

        for job in unfinished {
            if job.status == JobStatus::Converting {
                warn!(job_id = %job.id, "Conversion interrupted by shutdown, requeueing");
            }
            if job.status != JobStatus::Queued {
                let patch = JobPatch {
                    status: Some(JobStatus::Queued),
                    updated_at: Some(now),
                    ..Default::default()
                };
                self.history.update_job(&job.id, patch).await?;
            }
            if self.scheduler.add_job(job) {
                requeued += 1;
            }
        }

        info!(requeued_jobs = requeued, "Startup recovery complete");
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SchedulerConfig;
    use crate::port::event_notifier::NullNotifier;
    use crate::port::job_history::mocks::InMemoryJobHistory;
    use crate::port::time_provider::mocks::ManualClock;

    #[tokio::test]
    async fn test_requeues_only_unfinished_jobs() {
        let mut reclaimed = Job::new("reclaimed", 40);
        reclaimed.deleted = true;
        let history = Arc::new(InMemoryJobHistory::new(vec![
            Job::new("pending", 30),
            Job::new("interrupted", 10).with_status(JobStatus::Converting, 20),
            Job::new("done", 5).with_status(JobStatus::Completed, 6),
            reclaimed,
        ]));
        let clock = Arc::new(ManualClock::new(1_000));
        let scheduler = Arc::new(PriorityScheduler::new(
            SchedulerConfig::default(),
            clock.clone(),
            Arc::new(NullNotifier),
        ));

        let recovery = RecoveryService::new(history.clone(), scheduler.clone(), clock);
        let count = recovery.requeue_unfinished().await.unwrap();

        assert_eq!(count, 2);
        assert_eq!(scheduler.get_queue_size(), 2);
        // Earlier arrival dispatches first within the same tier
        assert_eq!(scheduler.get_next_job().unwrap().id, "interrupted");

        let interrupted = history.get_job("interrupted").await.unwrap().unwrap();
        assert_eq!(interrupted.status, JobStatus::Queued);
        assert_eq!(interrupted.updated_at, 1_000);
    }

    #[tokio::test]
    async fn test_already_queued_job_is_skipped() {
        let history = Arc::new(InMemoryJobHistory::new(vec![Job::new("a", 1)]));
        let clock = Arc::new(ManualClock::new(1_000));
        let scheduler = Arc::new(PriorityScheduler::new(
            SchedulerConfig::default(),
            clock.clone(),
            Arc::new(NullNotifier),
        ));
        scheduler.add_job(Job::new("a", 1));

        let recovery = RecoveryService::new(history, scheduler.clone(), clock);

        assert_eq!(recovery.requeue_unfinished().await.unwrap(), 0);
        assert_eq!(scheduler.get_queue_size(), 1);
    }

    #[tokio::test]
    async fn test_history_failure_propagates() {
        use crate::error::AppError;
        use crate::port::job_history::MockJobHistory;

        let mut history = MockJobHistory::new();
        history
            .expect_get_all_jobs()
            .returning(|| Err(AppError::Database("disk I/O error".to_string())));
        history.expect_update_job().never();

        let clock = Arc::new(ManualClock::new(1_000));
        let scheduler = Arc::new(PriorityScheduler::new(
            SchedulerConfig::default(),
            clock.clone(),
            Arc::new(NullNotifier),
        ));
        let recovery = RecoveryService::new(Arc::new(history), scheduler.clone(), clock);

        assert!(matches!(
            recovery.requeue_unfinished().await,
            Err(AppError::Database(_))
        ));
        assert_eq!(scheduler.get_queue_size(), 0);
    }
}
