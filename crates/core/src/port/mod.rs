// Port Layer - Interfaces for external dependencies

pub mod conversion_executor;
pub mod event_notifier;
pub mod file_store;
pub mod job_history;
pub mod scheduled_trigger;
pub mod system_probe;
pub mod time_provider;

// Re-exports
pub use conversion_executor::{
    ConversionExecutor, ConversionOutcome, ExecutionError, ExecutionStatus,
};
pub use event_notifier::{
    BroadcastNotifier, CleanupEvent, EngineEvent, EventNotifier, NullNotifier, SchedulerEvent,
};
pub use file_store::FileStore;
pub use job_history::{HistorySnapshot, JobHistory};
pub use scheduled_trigger::{ScheduledTrigger, TriggerTask};
pub use system_probe::SystemProbe;
pub use time_provider::TimeProvider;
