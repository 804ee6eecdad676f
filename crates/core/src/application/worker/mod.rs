// Dispatch Worker - pulls jobs from the priority scheduler and runs conversions

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::priority_scheduler::PriorityScheduler;
use crate::domain::{Job, JobStatus};
use crate::error::Result;
use crate::port::{ConversionExecutor, ExecutionStatus, JobHistory, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Executor-side consumer of the priority queue
///
/// The worker only writes finished records into the history; it never talks
/// to the cleanup service.
pub struct DispatchWorker {
    name: String,
    scheduler: Arc<PriorityScheduler>,
    executor: Arc<dyn ConversionExecutor>,
    history: Arc<dyn JobHistory>,
    time_provider: Arc<dyn TimeProvider>,
}

impl DispatchWorker {
    pub fn new(
        name: impl Into<String>,
        scheduler: Arc<PriorityScheduler>,
        executor: Arc<dyn ConversionExecutor>,
        history: Arc<dyn JobHistory>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            scheduler,
            executor,
            history,
            time_provider,
        }
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(worker = %self.name, "Dispatch worker started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = self.scheduler.notified() => {},
                        _ = sleep(IDLE_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!(worker = %self.name, "Worker interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(worker = %self.name, error = %e, "Worker error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!(worker = %self.name, "Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }
        info!(worker = %self.name, "Dispatch worker stopped");
        Ok(())
    }

    /// Dispatch and run one job (returns true if a job was processed)
    pub async fn process_next_job(&self) -> Result<bool> {
        let Some(mut job) = self.scheduler.get_next_job() else {
            return Ok(false);
        };

        let dispatched = job.clone();
        let started_at = self.time_provider.now_millis();
        if let Err(e) = job.start(started_at) {
            warn!(job_id = %job.id, error = %e, "Dispatched job in unexpected state");
            job.status = JobStatus::Converting;
            job.updated_at = started_at;
        }
        if let Err(e) = self.history.upsert_job(&job).await {
            // Nothing ran yet; hand the job back to the queue
            warn!(job_id = %job.id, error = %e, "Could not record dispatch, requeueing");
            if !self.scheduler.add_job(dispatched) {
                error!(job_id = %job.id, "Requeue after failed dispatch write was rejected");
            }
            return Err(e);
        }

        info!(job_id = %job.id, priority = %job.priority, "Converting job");

        // Panics inside the executor are confined to the spawned task
        let executor = Arc::clone(&self.executor);
        let job_for_exec = job.clone();
        let handle = tokio::task::spawn(async move { executor.convert(&job_for_exec).await });
        let execution = handle.await;

        let finished_at = self.time_provider.now_millis();
        match execution {
            Ok(Ok(outcome)) if outcome.status == ExecutionStatus::Success => {
                if let Some(output) = outcome.output_file {
                    job.output_file = Some(output);
                }
                if let Some(size) = outcome.output_size {
                    job.file_size = size;
                }
                job.complete(finished_at)?;
                info!(job_id = %job.id, duration_ms = outcome.duration_ms, "Job completed");
            }
            Ok(Ok(outcome)) => {
                warn!(job_id = %job.id, status = ?outcome.status, "Conversion did not succeed");
                Self::settle_unsuccessful(&mut job, outcome.status, finished_at);
            }
            Ok(Err(e)) => {
                error!(job_id = %job.id, error = %e, "Conversion failed");
                job.fail(finished_at);
            }
            Err(join_err) => {
                if join_err.is_panic() {
                    error!(job_id = %job.id, "Conversion panicked: {:?}", join_err);
                } else {
                    error!(job_id = %job.id, "Conversion cancelled: {:?}", join_err);
                }
                job.fail(finished_at);
            }
        }

        self.history.upsert_job(&job).await?;
        self.scheduler.record_processing_time(Duration::from_millis(
            (finished_at - started_at).max(0) as u64,
        ));
        Ok(true)
    }

    fn settle_unsuccessful(job: &mut Job, status: ExecutionStatus, now: i64) {
        match status {
            ExecutionStatus::Cancelled => {
                job.status = JobStatus::Cancelled;
                job.updated_at = now;
            }
            _ => job.fail(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, SchedulerConfig};
    use crate::port::conversion_executor::mocks::MockConversionExecutor;
    use crate::port::event_notifier::mocks::RecordingNotifier;
    use crate::port::job_history::mocks::InMemoryJobHistory;
    use crate::port::time_provider::mocks::ManualClock;

    struct Fixture {
        scheduler: Arc<PriorityScheduler>,
        history: Arc<InMemoryJobHistory>,
        executor: Arc<MockConversionExecutor>,
        worker: DispatchWorker,
    }

    fn fixture(executor: MockConversionExecutor) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000));
        let scheduler = Arc::new(PriorityScheduler::new(
            SchedulerConfig::default(),
            clock.clone(),
            Arc::new(RecordingNotifier::new()),
        ));
        let history = Arc::new(InMemoryJobHistory::default());
        let executor = Arc::new(executor);
        let worker = DispatchWorker::new(
            "worker-0",
            scheduler.clone(),
            executor.clone(),
            history.clone(),
            clock,
        );
        Fixture {
            scheduler,
            history,
            executor,
            worker,
        }
    }

    #[tokio::test]
    async fn test_processes_in_priority_order() {
        let f = fixture(MockConversionExecutor::new_success());
        f.scheduler.add_job(Job::new("low", 0).with_priority(Priority::Low));
        f.scheduler.add_job(Job::new("crit", 0).with_priority(Priority::Critical));

        assert!(f.worker.process_next_job().await.unwrap());
        assert!(f.worker.process_next_job().await.unwrap());
        assert!(!f.worker.process_next_job().await.unwrap());

        assert_eq!(f.executor.converted(), vec!["crit", "low"]);
        let stored = f.history.get_job("crit").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.output_file.as_deref(), Some("/out/crit.pdf"));
        assert_eq!(stored.file_size, 2048);
    }

    #[tokio::test]
    async fn test_failed_conversion_recorded_as_error() {
        let f = fixture(MockConversionExecutor::new_fail("bad input"));
        f.scheduler.add_job(Job::new("j1", 0));

        assert!(f.worker.process_next_job().await.unwrap());
        let stored = f.history.get_job("j1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Error);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let f = fixture(MockConversionExecutor::new_panic_inducing("boom"));
        f.scheduler.add_job(Job::new("j1", 0));
        f.scheduler.add_job(Job::new("j2", 0));

        assert!(f.worker.process_next_job().await.unwrap());
        assert!(f.worker.process_next_job().await.unwrap());
        assert_eq!(
            f.history.get_job("j2").await.unwrap().unwrap().status,
            JobStatus::Error
        );
    }

    #[tokio::test]
    async fn test_failed_dispatch_write_requeues_job() {
        use crate::error::AppError;
        use crate::port::job_history::MockJobHistory;

        let clock = Arc::new(ManualClock::new(1_000));
        let scheduler = Arc::new(PriorityScheduler::new(
            SchedulerConfig::default(),
            clock.clone(),
            Arc::new(RecordingNotifier::new()),
        ));
        let mut history = MockJobHistory::new();
        history
            .expect_upsert_job()
            .times(1)
            .returning(|_| Err(AppError::Database("database is locked".to_string())));
        let executor = Arc::new(MockConversionExecutor::new_success());
        let worker = DispatchWorker::new(
            "worker-0",
            scheduler.clone(),
            executor.clone(),
            Arc::new(history),
            clock,
        );
        scheduler.add_job(Job::new("j1", 0).with_priority(Priority::High));

        let result = worker.process_next_job().await;

        assert!(matches!(result, Err(AppError::Database(_))));
        assert!(executor.converted().is_empty());
        assert!(scheduler.contains("j1"));
        assert_eq!(scheduler.get_queue_size(), 1);
        let requeued = scheduler.get_next_job().unwrap();
        assert_eq!(requeued.priority, Priority::High);
        assert_eq!(requeued.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(MockConversionExecutor::new_success());
        let (tx, token) = shutdown_channel();
        let worker = Arc::new(f.worker);
        let handle = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(token).await })
        };

        f.scheduler.add_job(Job::new("j1", 0));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.shutdown();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(f.history.len(), 1);
    }
}
