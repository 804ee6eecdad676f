// Event Notifier Port
// Typed publish channel for queue/ETA pushes and cleanup lifecycle events

use crate::domain::{CleanupReason, CleanupStrategy, JobId, Priority};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

/// Events emitted by the priority scheduler
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    JobAdded {
        job_id: JobId,
        priority: Priority,
        position: usize,
        estimated_wait_ms: u64,
    },
    JobDispatched {
        job_id: JobId,
        priority: Priority,
        score: i64,
        waited_ms: i64,
    },
    PriorityChanged {
        job_id: JobId,
        from: Priority,
        to: Priority,
    },
    EmergencyBoost {
        job_id: JobId,
        waited_ms: i64,
        boost: i64,
    },
    AgingProgress {
        queued: BTreeMap<Priority, usize>,
        aging_jobs: usize,
        emergency_boosted: usize,
    },
    QueueCleared {
        removed: usize,
    },
    Error {
        operation: String,
        message: String,
    },
}

/// Events emitted by the retention cleanup service
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CleanupEvent {
    Started {
        dry_run: bool,
        manual: bool,
    },
    BatchProgress {
        batch: usize,
        total_batches: usize,
        processed: usize,
        total: usize,
        cleaned: u64,
        space_freed: u64,
    },
    Completed {
        dry_run: bool,
        jobs_cleaned: u64,
        space_freed: u64,
        errors: usize,
        duration_ms: i64,
        by_reason: BTreeMap<CleanupReason, u64>,
        by_strategy: BTreeMap<CleanupStrategy, u64>,
    },
    Failed {
        message: String,
    },
    LowDiskSpace {
        available_bytes: u64,
        required_bytes: u64,
    },
    ScheduleUpdated {
        expression: String,
        timezone: String,
        enabled: bool,
    },
    PolicyUpdated,
}

/// Everything the engine publishes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", content = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Scheduler(SchedulerEvent),
    Cleanup(CleanupEvent),
}

impl From<SchedulerEvent> for EngineEvent {
    fn from(event: SchedulerEvent) -> Self {
        EngineEvent::Scheduler(event)
    }
}

impl From<CleanupEvent> for EngineEvent {
    fn from(event: CleanupEvent) -> Self {
        EngineEvent::Cleanup(event)
    }
}

/// Publish side of the event channel
pub trait EventNotifier: Send + Sync {
    fn publish(&self, event: EngineEvent);
}

/// Fan-out notifier over a tokio broadcast channel
///
/// Publishing never blocks; slow subscribers observe `RecvError::Lagged`.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<EngineEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventNotifier for BroadcastNotifier {
    fn publish(&self, event: EngineEvent) {
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }
}

/// Discards every event
pub struct NullNotifier;

impl EventNotifier for NullNotifier {
    fn publish(&self, _event: EngineEvent) {}
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Records every published event
    #[derive(Default)]
    pub struct RecordingNotifier {
        events: Mutex<Vec<EngineEvent>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<EngineEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn scheduler_events(&self) -> Vec<SchedulerEvent> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    EngineEvent::Scheduler(e) => Some(e),
                    _ => None,
                })
                .collect()
        }

        pub fn cleanup_events(&self) -> Vec<CleanupEvent> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    EngineEvent::Cleanup(e) => Some(e),
                    _ => None,
                })
                .collect()
        }
    }

    impl EventNotifier for RecordingNotifier {
        fn publish(&self, event: EngineEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
