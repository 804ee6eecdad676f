// Convoy Infrastructure - System Adapters
// Implements: SystemProbe, FileStore, ScheduledTrigger, ConversionExecutor

pub mod command_executor;
pub mod cron_trigger;
pub mod file_store;
pub mod system_probe_impl;

pub use command_executor::{CommandExecutor, CommandExecutorConfig};
pub use cron_trigger::CronTrigger;
pub use file_store::TokioFileStore;
pub use system_probe_impl::SystemProbeImpl;
