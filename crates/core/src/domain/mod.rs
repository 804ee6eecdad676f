// Domain Layer - Pure business logic and entities

pub mod cleanup;
pub mod error;
pub mod job;
pub mod priority;
pub mod queue;
pub mod retention;

// Re-exports
pub use cleanup::{
    CleanupCandidate, CleanupError, CleanupReason, CleanupResult, CleanupStrategy, FileAction,
    JobCleanupOutcome,
};
pub use error::DomainError;
pub use job::{FileKind, Job, JobId, JobPatch, JobSettings, JobStatus};
pub use priority::{Priority, TierWeights};
pub use queue::{AgingConfig, SchedulerConfig, StarvationConfig};
pub use retention::{
    FileActions, PerformanceConfig, RetentionConfig, RetentionRules, SafetyConfig, ScheduleConfig,
    StorageConfig, StrategyConfig,
};
