//! Priority Scheduler - four-tier job queue with aging and starvation relief
//!
//! Dispatch order:
//! - tiers are drained strictly CRITICAL → HIGH → NORMAL → LOW
//! - inside a tier, aging picks the highest `weight + age bonus + boost`
//!   (earliest insertion wins ties); without aging the tier is FIFO
//! - a job waiting longer than `max_wait_ms` receives one emergency boost
//!
//! All tier mutations happen under a single mutex. Events are published after
//! the lock is released.

use crate::application::worker::{shutdown_channel, ShutdownSender};
use crate::domain::{
    DomainError, Job, JobId, Priority, SchedulerConfig, TierWeights,
};
use crate::error::{AppError, Result};
use crate::port::{EventNotifier, SchedulerEvent, TimeProvider};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Current version of [`SchedulerSnapshot`]
pub const SCHEDULER_SNAPSHOT_VERSION: u32 = 1;

/// Dispatch score of a queued job at `now_millis`
pub fn score(config: &SchedulerConfig, job: &Job, now_millis: i64) -> i64 {
    config.weights.weight(job.priority)
        + config.aging.age_bonus(job.wait_millis(now_millis))
        + job.priority_boost
}

/// `ceil((position - 1) / concurrency) * average`
pub fn estimate_wait_ms(position: usize, concurrency: usize, average_ms: u64) -> u64 {
    if position <= 1 {
        return 0;
    }
    let ahead = (position - 1) as u64;
    let slots = concurrency.max(1) as u64;
    ahead.div_ceil(slots) * average_ms
}

/// Mutable scheduler state, guarded by one mutex
struct QueueState {
    config: SchedulerConfig,
    tiers: [VecDeque<Job>; 4],
    total_added: u64,
    total_dispatched: u64,
    observed_average_ms: Option<f64>,
    processed_samples: u64,
}

impl QueueState {
    fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            tiers: Default::default(),
            total_added: 0,
            total_dispatched: 0,
            observed_average_ms: None,
            processed_samples: 0,
        }
    }

    fn queued(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    fn locate(&self, job_id: &str) -> Option<(usize, usize)> {
        self.tiers.iter().enumerate().find_map(|(tier, jobs)| {
            jobs.iter()
                .position(|job| job.id == job_id)
                .map(|pos| (tier, pos))
        })
    }

    /// 1-based rank by tier order then insertion order
    fn position(&self, job_id: &str) -> Option<usize> {
        let mut ahead = 0;
        for jobs in &self.tiers {
            if let Some(pos) = jobs.iter().position(|job| job.id == job_id) {
                return Some(ahead + pos + 1);
            }
            ahead += jobs.len();
        }
        None
    }

    fn average_processing_ms(&self) -> u64 {
        self.observed_average_ms
            .map(|avg| avg.round() as u64)
            .unwrap_or(self.config.average_processing_ms)
    }

    fn estimate(&self, position: usize) -> u64 {
        estimate_wait_ms(
            position,
            self.config.concurrency,
            self.average_processing_ms(),
        )
    }
}

/// Per-tier introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub queued: usize,
    pub weight: i64,
    pub oldest_wait_ms: i64,
    pub emergency_boosted: usize,
}

/// Queue-wide introspection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityStats {
    pub tiers: BTreeMap<Priority, TierStats>,
    pub queued: usize,
    pub total_added: u64,
    pub total_dispatched: u64,
    pub average_processing_ms: u64,
    pub aging_enabled: bool,
    pub starvation_prevention_enabled: bool,
}

/// Versioned full-state export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSnapshot {
    pub version: u32,
    pub taken_at: i64,
    pub config: SchedulerConfig,
    pub tiers: BTreeMap<Priority, Vec<Job>>,
    pub total_added: u64,
    pub total_dispatched: u64,
    pub observed_average_ms: Option<f64>,
    pub processed_samples: u64,
}

/// Multi-tier priority queue
pub struct PriorityScheduler {
    state: Mutex<QueueState>,
    time_provider: Arc<dyn TimeProvider>,
    notifier: Arc<dyn EventNotifier>,
    aging_tick: Mutex<Option<ShutdownSender>>,
    available: Notify,
}

impl PriorityScheduler {
    pub fn new(
        config: SchedulerConfig,
        time_provider: Arc<dyn TimeProvider>,
        notifier: Arc<dyn EventNotifier>,
    ) -> Self {
        Self {
            state: Mutex::new(QueueState::new(config)),
            time_provider,
            notifier,
            aging_tick: Mutex::new(None),
            available: Notify::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("scheduler state lock poisoned".to_string()))
    }

    fn publish(&self, event: SchedulerEvent) {
        self.notifier.publish(event.into());
    }

    fn report_error(&self, operation: &str, err: &AppError) {
        error!(operation = operation, error = %err, "Scheduler operation failed");
        self.publish(SchedulerEvent::Error {
            operation: operation.to_string(),
            message: err.to_string(),
        });
    }

    pub fn config(&self) -> Result<SchedulerConfig> {
        Ok(self.lock()?.config)
    }

    /// Queue a job at the tail of its tier
    ///
    /// Never fails to the caller: errors are published as
    /// `SchedulerEvent::Error` and reported as `false`.
    pub fn add_job(&self, job: Job) -> bool {
        match self.try_add_job(job) {
            Ok(event) => {
                self.publish(event);
                self.available.notify_one();
                true
            }
            Err(e) => {
                self.report_error("add_job", &e);
                false
            }
        }
    }

    fn try_add_job(&self, mut job: Job) -> Result<SchedulerEvent> {
        let now = self.time_provider.now_millis();
        let mut state = self.lock()?;

        if state.locate(&job.id).is_some() {
            return Err(AppError::Conflict(format!("Job {} is already queued", job.id)));
        }

        job.enqueue(now);
        let job_id = job.id.clone();
        let priority = job.priority;
        state.tiers[priority.index()].push_back(job);
        state.total_added += 1;

        let position = state
            .position(&job_id)
            .ok_or_else(|| AppError::Internal(format!("Job {} vanished after insert", job_id)))?;
        let estimated_wait_ms = state.estimate(position);

        debug!(
            job_id = %job_id,
            priority = %priority,
            position = position,
            estimated_wait_ms = estimated_wait_ms,
            "Job queued"
        );

        Ok(SchedulerEvent::JobAdded {
            job_id,
            priority,
            position,
            estimated_wait_ms,
        })
    }

    /// Resolves once a job has been added since the last wake-up
    pub fn notified(&self) -> Notified<'_> {
        self.available.notified()
    }

    /// Remove and return the job to run next; never blocks
    pub fn get_next_job(&self) -> Option<Job> {
        let now = self.time_provider.now_millis();
        let mut events = Vec::new();

        let dispatched = match self.lock() {
            Ok(mut state) => Self::select_next(&mut state, now, &mut events),
            Err(e) => {
                self.report_error("get_next_job", &e);
                return None;
            }
        };

        for event in events {
            self.publish(event);
        }

        if let Some(job) = &dispatched {
            info!(
                job_id = %job.id,
                priority = %job.priority,
                waited_ms = job.wait_millis(now),
                "Job dispatched"
            );
        }

        dispatched
    }

    fn select_next(
        state: &mut QueueState,
        now: i64,
        events: &mut Vec<SchedulerEvent>,
    ) -> Option<Job> {
        let config = state.config;

        if config.starvation.enabled {
            let max_wait = config.starvation.max_wait_ms as i64;
            for job in state.tiers.iter_mut().flat_map(|tier| tier.iter_mut()) {
                let waited = job.wait_millis(now);
                if waited > max_wait && job.apply_emergency_boost(config.starvation.emergency_boost)
                {
                    warn!(
                        job_id = %job.id,
                        waited_ms = waited,
                        boost = config.starvation.emergency_boost,
                        "Emergency boost applied to starving job"
                    );
                    events.push(SchedulerEvent::EmergencyBoost {
                        job_id: job.id.clone(),
                        waited_ms: waited,
                        boost: config.starvation.emergency_boost,
                    });
                }
            }
        }

        let tier = state.tiers.iter_mut().find(|tier| !tier.is_empty())?;

        let index = if config.aging.enabled {
            let mut best: Option<(usize, i64)> = None;
            for (i, job) in tier.iter().enumerate() {
                let s = score(&config, job, now);
                // Strictly greater keeps the earliest job on ties
                if best.map_or(true, |(_, best_score)| s > best_score) {
                    best = Some((i, s));
                }
            }
            best.map(|(i, _)| i).unwrap_or(0)
        } else {
            0
        };

        let job = tier.remove(index)?;
        state.total_dispatched += 1;

        events.push(SchedulerEvent::JobDispatched {
            job_id: job.id.clone(),
            priority: job.priority,
            score: score(&config, &job, now),
            waited_ms: job.wait_millis(now),
        });

        Some(job)
    }

    /// Move a queued job to the tail of another tier, keeping its accrued age
    ///
    /// # Errors
    /// - AppError::Domain(InvalidPriority) if `new_priority` is not a tier name
    /// - AppError::NotFound if the job is not queued
    pub fn change_job_priority(&self, job_id: &str, new_priority: &str) -> Result<bool> {
        let target: Priority = new_priority.parse()?;

        let from = {
            let mut state = self.lock()?;
            let (tier, pos) = state
                .locate(job_id)
                .ok_or_else(|| AppError::NotFound(format!("Job {} is not queued", job_id)))?;

            let mut job = state.tiers[tier]
                .remove(pos)
                .ok_or_else(|| AppError::Internal(format!("Job {} vanished", job_id)))?;
            let from = job.priority;
            job.priority = target;
            state.tiers[target.index()].push_back(job);
            from
        };

        info!(job_id = %job_id, from = %from, to = %target, "Job priority changed");
        self.publish(SchedulerEvent::PriorityChanged {
            job_id: job_id.to_string(),
            from,
            to: target,
        });

        Ok(true)
    }

    /// 1-based queue position by tier then insertion order
    ///
    /// Does not account for aging or boosts, so it can disagree with the
    /// order `get_next_job` actually dispatches in.
    pub fn get_job_position(&self, job_id: &str) -> Option<usize> {
        self.lock().ok()?.position(job_id)
    }

    /// Estimated wait for a job at `position`, using the observed average
    /// processing time when available
    pub fn estimate_wait_time(&self, position: usize) -> Duration {
        let ms = self
            .lock()
            .map(|state| state.estimate(position))
            .unwrap_or(0);
        Duration::from_millis(ms)
    }

    /// Estimated wait for a job at `position` with a caller-supplied average
    pub fn estimate_wait_time_with(&self, position: usize, average: Duration) -> Duration {
        let concurrency = self
            .lock()
            .map(|state| state.config.concurrency)
            .unwrap_or(1);
        Duration::from_millis(estimate_wait_ms(
            position,
            concurrency,
            average.as_millis() as u64,
        ))
    }

    /// Feed an observed processing time into the ETA average
    pub fn record_processing_time(&self, duration: Duration) {
        if let Ok(mut state) = self.lock() {
            let sample = duration.as_millis() as f64;
            state.processed_samples += 1;
            let n = state.processed_samples as f64;
            state.observed_average_ms = Some(match state.observed_average_ms {
                Some(avg) => avg + (sample - avg) / n,
                None => sample,
            });
        }
    }

    /// Current dispatch score of a queued job
    pub fn job_score(&self, job_id: &str) -> Option<i64> {
        let now = self.time_provider.now_millis();
        let state = self.lock().ok()?;
        let (tier, pos) = state.locate(job_id)?;
        state.tiers[tier].get(pos).map(|job| score(&state.config, job, now))
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock()
            .map(|state| state.locate(job_id).is_some())
            .unwrap_or(false)
    }

    pub fn get_queue_size(&self) -> usize {
        self.lock().map(|state| state.queued()).unwrap_or(0)
    }

    pub fn get_priority_stats(&self) -> Result<PriorityStats> {
        let now = self.time_provider.now_millis();
        let state = self.lock()?;

        let tiers = Priority::ALL
            .iter()
            .map(|&priority| {
                let jobs = &state.tiers[priority.index()];
                let stats = TierStats {
                    queued: jobs.len(),
                    weight: state.config.weights.weight(priority),
                    oldest_wait_ms: jobs.iter().map(|j| j.wait_millis(now)).max().unwrap_or(0),
                    emergency_boosted: jobs.iter().filter(|j| j.emergency_boosted).count(),
                };
                (priority, stats)
            })
            .collect();

        Ok(PriorityStats {
            tiers,
            queued: state.queued(),
            total_added: state.total_added,
            total_dispatched: state.total_dispatched,
            average_processing_ms: state.average_processing_ms(),
            aging_enabled: state.config.aging.enabled,
            starvation_prevention_enabled: state.config.starvation.enabled,
        })
    }

    /// Drop every queued job and reset the counters
    pub fn clear(&self) -> usize {
        let removed = match self.lock() {
            Ok(mut state) => {
                let removed = state.queued();
                let config = state.config;
                *state = QueueState::new(config);
                removed
            }
            Err(e) => {
                self.report_error("clear", &e);
                return 0;
            }
        };

        info!(removed = removed, "Queue cleared");
        self.publish(SchedulerEvent::QueueCleared { removed });
        removed
    }

    /// Start the periodic aging-progress tick
    ///
    /// Purely observational: scores are always computed on demand.
    /// Must be called inside a tokio runtime.
    pub fn start_aging_tick(self: &Arc<Self>) {
        let period = match self.config() {
            Ok(config) => Duration::from_millis(config.aging_tick_ms.max(1)),
            Err(e) => {
                self.report_error("start_aging_tick", &e);
                return;
            }
        };

        let (tx, mut token) = shutdown_channel();
        if let Ok(mut slot) = self.aging_tick.lock() {
            if let Some(previous) = slot.replace(tx) {
                previous.shutdown();
            }
        }

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            // The first tick completes immediately
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        match weak.upgrade() {
                            Some(scheduler) => scheduler.emit_aging_progress(),
                            None => break,
                        }
                    }
                    _ = token.wait() => break,
                }
            }
            debug!("Aging tick stopped");
        });
    }

    fn emit_aging_progress(&self) {
        let now = self.time_provider.now_millis();
        let event = match self.lock() {
            Ok(state) => {
                let queued = Priority::ALL
                    .iter()
                    .map(|&p| (p, state.tiers[p.index()].len()))
                    .collect();
                let jobs: Vec<&Job> = state.tiers.iter().flatten().collect();
                SchedulerEvent::AgingProgress {
                    queued,
                    aging_jobs: jobs
                        .iter()
                        .filter(|job| state.config.aging.age_bonus(job.wait_millis(now)) > 0)
                        .count(),
                    emergency_boosted: jobs.iter().filter(|job| job.emergency_boosted).count(),
                }
            }
            Err(e) => {
                self.report_error("aging_tick", &e);
                return;
            }
        };
        self.publish(event);
    }

    /// Tear down background activity
    pub fn stop(&self) {
        if let Ok(mut slot) = self.aging_tick.lock() {
            if let Some(tx) = slot.take() {
                tx.shutdown();
                info!("Priority scheduler stopped");
            }
        }
    }

    /// Export the complete queue state
    pub fn snapshot(&self) -> Result<SchedulerSnapshot> {
        let taken_at = self.time_provider.now_millis();
        let state = self.lock()?;
        Ok(SchedulerSnapshot {
            version: SCHEDULER_SNAPSHOT_VERSION,
            taken_at,
            config: state.config,
            tiers: Priority::ALL
                .iter()
                .map(|&p| (p, state.tiers[p.index()].iter().cloned().collect()))
                .collect(),
            total_added: state.total_added,
            total_dispatched: state.total_dispatched,
            observed_average_ms: state.observed_average_ms,
            processed_samples: state.processed_samples,
        })
    }

    /// Replace the complete queue state with a snapshot
    ///
    /// # Errors
    /// - DomainError::UnsupportedSnapshotVersion for unknown versions
    /// - AppError::Validation if a job id appears more than once
    pub fn restore(&self, snapshot: SchedulerSnapshot) -> Result<()> {
        if snapshot.version != SCHEDULER_SNAPSHOT_VERSION {
            return Err(DomainError::UnsupportedSnapshotVersion(snapshot.version).into());
        }

        let mut restored = QueueState::new(snapshot.config);
        let mut seen: HashSet<JobId> = HashSet::new();
        for (priority, jobs) in snapshot.tiers {
            for mut job in jobs {
                if !seen.insert(job.id.clone()) {
                    return Err(AppError::Validation(format!(
                        "Job {} appears more than once in snapshot",
                        job.id
                    )));
                }
                // Tier membership is authoritative
                job.priority = priority;
                restored.tiers[priority.index()].push_back(job);
            }
        }
        restored.total_added = snapshot.total_added;
        restored.total_dispatched = snapshot.total_dispatched;
        restored.observed_average_ms = snapshot.observed_average_ms;
        restored.processed_samples = snapshot.processed_samples;

        let queued = restored.queued();
        *self.lock()? = restored;
        info!(queued = queued, "Scheduler state restored from snapshot");
        Ok(())
    }

    /// Weights currently in effect
    pub fn weights(&self) -> TierWeights {
        self.lock()
            .map(|state| state.config.weights)
            .unwrap_or_default()
    }
}

impl Drop for PriorityScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
