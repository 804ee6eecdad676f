//! Retention Cleanup Service
//!
//! Reads the job history, selects jobs that violate the retention policy and
//! reclaims their files and records.
//!
//! Run pipeline:
//! 1. free-space check on the archive volume (warning only)
//! 2. history backup, unless dry-run (failure aborts before any mutation)
//! 3. candidate selection (or an explicit id list for forced cleanups)
//! 4. sequential batches, bounded concurrency inside a batch
//!
//! At most one run is in flight at any time; a second caller gets
//! `AppError::Conflict` immediately.

mod file_actions;
mod selection;
mod statistics;

pub use file_actions::{
    archive_segment, archived_file_path, archived_record_path, process_job_files,
};
pub use selection::select_candidates;
pub use statistics::{CleanupStatistics, CleanupStatus};

use crate::domain::{
    CleanupCandidate, CleanupReason, CleanupResult, CleanupStrategy, FileAction, Job,
    JobCleanupOutcome, JobId, JobPatch, RetentionConfig, ScheduleConfig,
};
use crate::error::{AppError, Result};
use crate::port::{
    CleanupEvent, EventNotifier, FileStore, JobHistory, ScheduledTrigger, SystemProbe,
    TimeProvider, TriggerTask,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a run operates on
enum Selection<'a> {
    /// Evaluate the retention rules
    Rules,
    /// Explicit ids, one strategy for all
    Manual {
        job_ids: &'a [JobId],
        strategy: CleanupStrategy,
    },
}

/// Holds the in-progress flag for the lifetime of one run
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AppError::Conflict("A cleanup is already in progress".to_string()))?;
        Ok(Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// `history-backup-<timestamp>.json`
pub fn backup_file_name(now_millis: i64) -> String {
    let stamp = DateTime::<Utc>::from_timestamp_millis(now_millis)
        .map(|t| t.format("%Y%m%d-%H%M%S-%3f").to_string())
        .unwrap_or_else(|| now_millis.to_string());
    format!("history-backup-{}.json", stamp)
}

pub struct RetentionCleanupService {
    history: Arc<dyn JobHistory>,
    files: Arc<dyn FileStore>,
    probe: Arc<dyn SystemProbe>,
    trigger: Arc<dyn ScheduledTrigger>,
    notifier: Arc<dyn EventNotifier>,
    time_provider: Arc<dyn TimeProvider>,
    config: RwLock<RetentionConfig>,
    running: AtomicBool,
    statistics: Mutex<CleanupStatistics>,
    /// Registered by `start_schedule`; kept while disabled so that a later
    /// config update can re-arm the trigger
    schedule_task: Mutex<Option<TriggerTask>>,
}

impl RetentionCleanupService {
    /// # Errors
    /// - AppError::Domain(ValidationError) if `config` is invalid
    pub fn new(
        config: RetentionConfig,
        history: Arc<dyn JobHistory>,
        files: Arc<dyn FileStore>,
        probe: Arc<dyn SystemProbe>,
        trigger: Arc<dyn ScheduledTrigger>,
        notifier: Arc<dyn EventNotifier>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            history,
            files,
            probe,
            trigger,
            notifier,
            time_provider,
            config: RwLock::new(config),
            running: AtomicBool::new(false),
            statistics: Mutex::new(CleanupStatistics::default()),
            schedule_task: Mutex::new(None),
        })
    }

    fn publish(&self, event: CleanupEvent) {
        self.notifier.publish(event.into());
    }

    fn poisoned(what: &str) -> AppError {
        AppError::Internal(format!("{} lock poisoned", what))
    }

    pub fn get_config(&self) -> Result<RetentionConfig> {
        self.config
            .read()
            .map(|config| config.clone())
            .map_err(|_| Self::poisoned("retention config"))
    }

    fn effective_config(&self, overrides: Option<&serde_json::Value>) -> Result<RetentionConfig> {
        let config = self.get_config()?;
        match overrides {
            Some(partial) => Ok(config.merged(partial)?),
            None => Ok(config),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run a cleanup with the live policy, optionally overridden for this run only
    ///
    /// Run-level failures (backup, history read) are reported through
    /// `success = false` on the returned result.
    ///
    /// # Errors
    /// - AppError::Conflict if a cleanup is already in progress
    /// - AppError::Domain(ValidationError) if `overrides` produce an invalid policy
    pub async fn run_cleanup(
        &self,
        overrides: Option<&serde_json::Value>,
    ) -> Result<CleanupResult> {
        let config = self.effective_config(overrides)?;
        let dry_run = config.safety.dry_run;
        self.execute(config, Selection::Rules, dry_run).await
    }

    /// Same pipeline as `run_cleanup` with dry-run forced on
    pub async fn get_cleanup_preview(
        &self,
        overrides: Option<&serde_json::Value>,
    ) -> Result<CleanupResult> {
        let config = self.effective_config(overrides)?;
        self.execute(config, Selection::Rules, true).await
    }

    /// Clean an explicit list of jobs with one strategy, skipping rule evaluation
    ///
    /// Unknown and protected ids become warnings.
    pub async fn force_cleanup(
        &self,
        job_ids: &[JobId],
        strategy: CleanupStrategy,
    ) -> Result<CleanupResult> {
        let config = self.get_config()?;
        let dry_run = config.safety.dry_run;
        self.execute(config, Selection::Manual { job_ids, strategy }, dry_run)
            .await
    }

    async fn execute(
        &self,
        config: RetentionConfig,
        selection: Selection<'_>,
        dry_run: bool,
    ) -> Result<CleanupResult> {
        let _guard = RunGuard::acquire(&self.running)?;
        let manual = matches!(selection, Selection::Manual { .. });

        let mut result = CleanupResult::new(self.time_provider.now_millis(), dry_run);
        info!(dry_run, manual, "Cleanup started");
        self.publish(CleanupEvent::Started { dry_run, manual });

        match self.pipeline(&config, &selection, &mut result).await {
            Ok(()) => {
                result.complete(self.time_provider.now_millis());
                info!(
                    dry_run,
                    jobs_processed = result.jobs_processed,
                    jobs_cleaned = result.jobs_cleaned,
                    space_freed = result.space_freed,
                    errors = result.errors.len(),
                    duration_ms = result.duration_ms.unwrap_or(0),
                    "Cleanup completed"
                );
                self.publish(CleanupEvent::Completed {
                    dry_run,
                    jobs_cleaned: result.jobs_cleaned,
                    space_freed: result.space_freed,
                    errors: result.errors.len(),
                    duration_ms: result.duration_ms.unwrap_or(0),
                    by_reason: result.by_reason.clone(),
                    by_strategy: result.by_strategy.clone(),
                });
            }
            Err(e) => {
                error!(error = %e, dry_run, "Cleanup failed");
                let message = e.to_string();
                result.fail(self.time_provider.now_millis(), message.clone());
                self.publish(CleanupEvent::Failed { message });
            }
        }

        match self.statistics.lock() {
            Ok(mut stats) => stats.record(&result),
            Err(_) => warn!("Cleanup statistics lock poisoned; run not recorded"),
        }

        Ok(result)
    }

    async fn pipeline(
        &self,
        config: &RetentionConfig,
        selection: &Selection<'_>,
        result: &mut CleanupResult,
    ) -> Result<()> {
        let dry_run = result.dry_run;
        let archive_dir = PathBuf::from(&config.storage.archive_dir);

        self.check_free_space(config, &archive_dir, result).await;

        if config.safety.backup_before_cleanup && !dry_run {
            let path = self
                .backup_history(config)
                .await
                .map_err(|e| AppError::InvalidState(format!("History backup failed: {}", e)))?;
            info!(path = %path.display(), "Job history backed up");
        }

        let jobs = self.history.get_all_jobs().await?;
        let now = self.time_provider.now_millis();

        let planned: Vec<(CleanupCandidate, CleanupStrategy)> = match selection {
            Selection::Rules => select_candidates(&jobs, config, now)
                .into_iter()
                .map(|candidate| {
                    let strategy = config.strategy.for_status(candidate.job.status);
                    (candidate, strategy)
                })
                .collect(),
            Selection::Manual { job_ids, strategy } => {
                Self::manual_candidates(&jobs, job_ids, *strategy, config, result)
            }
        };

        let total = planned.len();
        info!(candidates = total, history = jobs.len(), dry_run, "Cleanup candidates selected");
        if total == 0 {
            return Ok(());
        }

        let batch_size = config.performance.batch_size.max(1);
        let concurrency = config.performance.max_concurrent_operations.max(1);
        let pause = Duration::from_millis(config.performance.batch_pause_ms);
        let total_batches = total.div_ceil(batch_size);
        let archive_dir = archive_dir.as_path();

        for (index, batch) in planned.chunks(batch_size).enumerate() {
            // Futures are built up front so the run future stays `Send`
            let pending: Vec<_> = batch
                .iter()
                .enumerate()
                .map(|(i, (candidate, strategy))| async move {
                    let outcome = self
                        .process_candidate(candidate, *strategy, config, archive_dir, dry_run)
                        .await;
                    (i, outcome)
                })
                .collect();
            let mut outcomes: Vec<(usize, JobCleanupOutcome)> = stream::iter(pending)
                .buffer_unordered(concurrency)
                .collect()
                .await;

            // Record in selection order regardless of completion order
            outcomes.sort_by_key(|(i, _)| *i);
            for (i, outcome) in outcomes {
                let (candidate, strategy) = &batch[i];
                result.record(candidate, *strategy, outcome);
            }

            debug!(
                batch = index + 1,
                total_batches,
                processed = result.jobs_processed,
                "Cleanup batch finished"
            );
            self.publish(CleanupEvent::BatchProgress {
                batch: index + 1,
                total_batches,
                processed: result.jobs_processed as usize,
                total,
                cleaned: result.jobs_cleaned,
                space_freed: result.space_freed,
            });

            if index + 1 < total_batches && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        Ok(())
    }

    fn manual_candidates(
        jobs: &[Job],
        job_ids: &[JobId],
        strategy: CleanupStrategy,
        config: &RetentionConfig,
        result: &mut CleanupResult,
    ) -> Vec<(CleanupCandidate, CleanupStrategy)> {
        let mut seen = HashSet::new();
        let mut planned = Vec::new();

        for id in job_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            if config.safety.protected_jobs.contains(id) {
                warn!(job_id = %id, "Protected job skipped by forced cleanup");
                result.add_warning(format!("Job {} is protected; skipped", id));
                continue;
            }
            match jobs.iter().find(|job| &job.id == id) {
                Some(job) => planned.push((
                    CleanupCandidate {
                        job: job.clone(),
                        reasons: vec![CleanupReason::Manual],
                    },
                    strategy,
                )),
                None => result.add_warning(format!("Job {} not found", id)),
            }
        }

        planned
    }

    async fn check_free_space(
        &self,
        config: &RetentionConfig,
        archive_dir: &Path,
        result: &mut CleanupResult,
    ) {
        let required = config.safety.min_free_space_bytes;
        if required == 0 {
            return;
        }

        match self.probe.free_space_bytes(archive_dir).await {
            Some(available) if available < required => {
                warn!(
                    available_bytes = available,
                    required_bytes = required,
                    "Low disk space on archive volume"
                );
                result.add_warning(format!(
                    "Low disk space: {} bytes available, {} required",
                    available, required
                ));
                self.publish(CleanupEvent::LowDiskSpace {
                    available_bytes: available,
                    required_bytes: required,
                });
            }
            Some(_) => {}
            None => debug!(path = %archive_dir.display(), "Free space unknown"),
        }
    }

    async fn backup_history(&self, config: &RetentionConfig) -> Result<PathBuf> {
        let dir = PathBuf::from(&config.storage.backup_dir);
        self.files.create_dir_all(&dir).await?;

        let snapshot = self.history.export_history().await?;
        let path = dir.join(backup_file_name(self.time_provider.now_millis()));
        let data = serde_json::to_vec_pretty(&snapshot)?;
        self.files.write(&path, &data).await?;
        Ok(path)
    }

    async fn process_candidate(
        &self,
        candidate: &CleanupCandidate,
        strategy: CleanupStrategy,
        config: &RetentionConfig,
        archive_dir: &Path,
        dry_run: bool,
    ) -> JobCleanupOutcome {
        let job = &candidate.job;
        let mut outcome = JobCleanupOutcome {
            job_id: job.id.clone(),
            ..Default::default()
        };

        let archives = strategy == CleanupStrategy::Archive
            || config.file_actions.uses(FileAction::Archive);
        if archives {
            if let Err(e) = archive_segment(&job.id) {
                warn!(job_id = %job.id, error = %e, "Job cannot be archived");
                outcome.error = Some(e.to_string());
                return outcome;
            }
        }

        if let Err(e) = process_job_files(
            self.files.as_ref(),
            job,
            &config.file_actions,
            archive_dir,
            dry_run,
            &mut outcome,
        )
        .await
        {
            warn!(job_id = %job.id, error = %e, "File cleanup failed");
            outcome.error = Some(format!("File cleanup failed: {}", e));
            return outcome;
        }

        if !dry_run {
            if let Err(e) = self
                .apply_strategy(candidate, strategy, archive_dir, &mut outcome)
                .await
            {
                warn!(job_id = %job.id, strategy = %strategy, error = %e, "Record cleanup failed");
                outcome.error = Some(format!("{} failed: {}", strategy, e));
                return outcome;
            }
        }

        outcome.cleaned = true;
        debug!(
            job_id = %job.id,
            strategy = %strategy,
            reasons = %candidate.reason_label(),
            space_freed = outcome.space_freed,
            dry_run,
            "Job cleaned"
        );
        outcome
    }

    async fn apply_strategy(
        &self,
        candidate: &CleanupCandidate,
        strategy: CleanupStrategy,
        archive_dir: &Path,
        outcome: &mut JobCleanupOutcome,
    ) -> Result<()> {
        let job = &candidate.job;
        let now = self.time_provider.now_millis();

        match strategy {
            CleanupStrategy::SoftDelete => {
                self.history
                    .update_job(&job.id, JobPatch::soft_delete(now, candidate.reason_label()))
                    .await?;
            }
            CleanupStrategy::HardDelete => {
                if !self.history.remove_job(&job.id).await? {
                    outcome
                        .warnings
                        .push(format!("Job {} was already removed", job.id));
                }
            }
            CleanupStrategy::Archive => {
                let path = archived_record_path(archive_dir, &job.id)?;
                if let Some(parent) = path.parent() {
                    self.files.create_dir_all(parent).await?;
                }
                let data = serde_json::to_vec_pretty(job)?;
                self.files.write(&path, &data).await?;
                self.history
                    .update_job(&job.id, JobPatch::archived(now, path.to_string_lossy()))
                    .await?;
            }
            CleanupStrategy::Compress => {
                self.history
                    .update_job(&job.id, JobPatch::compressed(now))
                    .await?;
            }
        }
        Ok(())
    }

    /// Deep-merge `partial` into the live policy and swap it in
    ///
    /// A changed schedule re-arms a registered trigger; if the new schedule
    /// cannot be started, the previous policy stays in effect.
    ///
    /// # Errors
    /// - AppError::Domain(ValidationError) if the merged policy is invalid
    /// - AppError::Config if the new schedule cannot be started
    pub fn update_config(&self, partial: &serde_json::Value) -> Result<RetentionConfig> {
        let (updated, schedule_changed) = {
            let mut current = self
                .config
                .write()
                .map_err(|_| Self::poisoned("retention config"))?;
            let updated = current.merged(partial)?;
            let schedule_changed = updated.schedule != current.schedule;
            if schedule_changed {
                self.reschedule(&current.schedule, &updated.schedule)?;
            }
            *current = updated.clone();
            (updated, schedule_changed)
        };

        info!(schedule_changed, "Retention policy updated");
        if schedule_changed {
            self.publish(CleanupEvent::ScheduleUpdated {
                expression: updated.schedule.expression.clone(),
                timezone: updated.schedule.timezone.clone(),
                enabled: updated.schedule.enabled,
            });
        }
        self.publish(CleanupEvent::PolicyUpdated);

        Ok(updated)
    }

    fn reschedule(&self, previous: &ScheduleConfig, next: &ScheduleConfig) -> Result<()> {
        let task = self
            .schedule_task
            .lock()
            .map_err(|_| Self::poisoned("schedule task"))?
            .clone();
        let Some(task) = task else {
            return Ok(());
        };

        if next.enabled {
            // Validate before tearing down the running trigger
            self.trigger
                .next_fire_time(next, self.time_provider.now_millis())?;
        }

        self.trigger.stop();
        if !next.enabled {
            info!("Cleanup schedule disabled");
            return Ok(());
        }

        if let Err(e) = self.trigger.start(next, task.clone()) {
            if previous.enabled {
                if let Err(restore_err) = self.trigger.start(previous, task) {
                    error!(error = %restore_err, "Failed to restore previous cleanup schedule");
                }
            }
            return Err(e);
        }

        info!(
            expression = %next.expression,
            timezone = %next.timezone,
            "Cleanup schedule restarted"
        );
        Ok(())
    }

    /// Register the recurring cleanup with the trigger
    ///
    /// Returns false when the schedule is disabled in the policy; the
    /// registration is kept so that enabling it later starts the trigger.
    ///
    /// # Errors
    /// - AppError::Config if the expression or timezone is invalid
    pub fn start_schedule(self: &Arc<Self>) -> Result<bool> {
        let schedule = self.get_config()?.schedule;
        self.trigger
            .next_fire_time(&schedule, self.time_provider.now_millis())?;

        let weak = Arc::downgrade(self);
        let task: TriggerTask = Arc::new(move || {
            let weak = weak.clone();
            async move {
                if let Some(service) = weak.upgrade() {
                    service.run_scheduled().await;
                }
            }
            .boxed()
        });

        *self
            .schedule_task
            .lock()
            .map_err(|_| Self::poisoned("schedule task"))? = Some(task.clone());

        if !schedule.enabled {
            info!("Cleanup schedule is disabled");
            return Ok(false);
        }

        if let Err(e) = self.trigger.start(&schedule, task) {
            if let Ok(mut slot) = self.schedule_task.lock() {
                *slot = None;
            }
            return Err(e);
        }

        info!(
            expression = %schedule.expression,
            timezone = %schedule.timezone,
            "Cleanup schedule started"
        );
        Ok(true)
    }

    /// Suppress future scheduled runs; a run in flight is not interrupted
    pub fn stop_schedule(&self) {
        self.trigger.stop();
        if let Ok(mut slot) = self.schedule_task.lock() {
            if slot.take().is_some() {
                info!("Cleanup schedule stopped");
            }
        }
    }

    async fn run_scheduled(&self) {
        match self.run_cleanup(None).await {
            Ok(result) => info!(
                success = result.success,
                jobs_cleaned = result.jobs_cleaned,
                space_freed = result.space_freed,
                "Scheduled cleanup finished"
            ),
            Err(AppError::Conflict(_)) => {
                warn!("Scheduled cleanup skipped: a cleanup is already running")
            }
            Err(e) => error!(error = %e, "Scheduled cleanup failed"),
        }
    }

    pub fn get_statistics(&self) -> Result<CleanupStatus> {
        let statistics = self
            .statistics
            .lock()
            .map_err(|_| Self::poisoned("cleanup statistics"))?
            .clone();
        let schedule_active = self.trigger.is_active();
        let next_run_at = if schedule_active {
            let schedule = self.get_config()?.schedule;
            self.trigger
                .next_fire_time(&schedule, self.time_provider.now_millis())
                .ok()
                .flatten()
        } else {
            None
        };

        Ok(CleanupStatus {
            statistics,
            is_running: self.is_running(),
            schedule_active,
            next_run_at,
        })
    }
}
