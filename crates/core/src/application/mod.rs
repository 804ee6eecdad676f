// Application Layer - Use Cases and Business Logic

pub mod cleanup;
pub mod priority_scheduler;
pub mod recovery;
pub mod worker;

// Re-exports
pub use cleanup::{CleanupStatistics, CleanupStatus, RetentionCleanupService};
pub use priority_scheduler::{
    PriorityScheduler, PriorityStats, SchedulerSnapshot, TierStats, SCHEDULER_SNAPSHOT_VERSION,
};
pub use recovery::RecoveryService;
pub use worker::{shutdown_channel, DispatchWorker, ShutdownSender, ShutdownToken};
