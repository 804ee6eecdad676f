// Event bus logging
// Every engine event ends up in the structured log

use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use convoy_core::application::ShutdownToken;
use convoy_core::port::{CleanupEvent, EngineEvent, SchedulerEvent};

pub fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::Scheduler(event) => log_scheduler_event(event),
        EngineEvent::Cleanup(event) => log_cleanup_event(event),
    }
}

fn log_scheduler_event(event: &SchedulerEvent) {
    match event {
        SchedulerEvent::JobAdded {
            job_id,
            priority,
            position,
            estimated_wait_ms,
        } => info!(
            job_id = %job_id,
            priority = %priority,
            position,
            estimated_wait_ms,
            "Job queued"
        ),
        SchedulerEvent::JobDispatched {
            job_id,
            priority,
            score,
            waited_ms,
        } => info!(job_id = %job_id, priority = %priority, score, waited_ms, "Job dispatched"),
        SchedulerEvent::PriorityChanged { job_id, from, to } => {
            info!(job_id = %job_id, from = %from, to = %to, "Job priority changed")
        }
        SchedulerEvent::EmergencyBoost {
            job_id,
            waited_ms,
            boost,
        } => warn!(job_id = %job_id, waited_ms, boost, "Starving job boosted"),
        SchedulerEvent::AgingProgress {
            queued,
            aging_jobs,
            emergency_boosted,
        } => debug!(queued = ?queued, aging_jobs, emergency_boosted, "Aging progress"),
        SchedulerEvent::QueueCleared { removed } => info!(removed, "Queue cleared"),
        SchedulerEvent::Error { operation, message } => {
            error!(operation = %operation, error = %message, "Scheduler error")
        }
    }
}

fn log_cleanup_event(event: &CleanupEvent) {
    match event {
        CleanupEvent::Started { dry_run, manual } => info!(dry_run, manual, "Cleanup started"),
        CleanupEvent::BatchProgress {
            batch,
            total_batches,
            processed,
            total,
            cleaned,
            space_freed,
        } => debug!(
            batch,
            total_batches,
            processed,
            total,
            cleaned,
            space_freed,
            "Cleanup batch done"
        ),
        CleanupEvent::Completed {
            dry_run,
            jobs_cleaned,
            space_freed,
            errors,
            duration_ms,
            by_reason,
            by_strategy,
        } => info!(
            dry_run,
            jobs_cleaned,
            space_freed,
            errors,
            duration_ms,
            by_reason = ?by_reason,
            by_strategy = ?by_strategy,
            "Cleanup completed"
        ),
        CleanupEvent::Failed { message } => error!(error = %message, "Cleanup failed"),
        CleanupEvent::LowDiskSpace {
            available_bytes,
            required_bytes,
        } => warn!(available_bytes, required_bytes, "Low disk space"),
        CleanupEvent::ScheduleUpdated {
            expression,
            timezone,
            enabled,
        } => info!(
            expression = %expression,
            timezone = %timezone,
            enabled,
            "Cleanup schedule updated"
        ),
        CleanupEvent::PolicyUpdated => info!("Retention policy updated"),
    }
}

/// Drain `rx` into the log until shutdown or until every publisher is gone
pub fn spawn_event_logger(
    mut rx: Receiver<EngineEvent>,
    mut shutdown: ShutdownToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event logger fell behind");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.wait() => break,
            }
        }
        debug!("Event logger stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::application::shutdown_channel;
    use convoy_core::port::{BroadcastNotifier, EventNotifier};
    use std::time::Duration;

    #[tokio::test]
    async fn test_logger_stops_on_shutdown() {
        let notifier = BroadcastNotifier::new(8);
        let (shutdown_tx, token) = shutdown_channel();
        let handle = spawn_event_logger(notifier.subscribe(), token);

        notifier.publish(CleanupEvent::PolicyUpdated.into());
        notifier.publish(SchedulerEvent::QueueCleared { removed: 3 }.into());
        shutdown_tx.shutdown();

        let stopped = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(stopped, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_logger_stops_when_publishers_gone() {
        let notifier = BroadcastNotifier::new(8);
        let (_shutdown_tx, token) = shutdown_channel();
        let handle = spawn_event_logger(notifier.subscribe(), token);

        drop(notifier);

        let stopped = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(stopped, Ok(Ok(()))));
    }
}
