// Scheduled Trigger Port
// Recurring invocation of a task on a cron-style cadence

use crate::domain::retention::ScheduleConfig;
use crate::error::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Task invoked on every fire
pub type TriggerTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Recurring trigger
///
/// Implementations:
/// - CronTrigger (infra-system): cron expression + timezone on the tokio runtime
/// - ManualTrigger: tests fire it explicitly
pub trait ScheduledTrigger: Send + Sync {
    /// Start firing `task` per `schedule`, replacing any previous registration
    ///
    /// # Errors
    /// - AppError::Config if the expression or timezone is invalid
    fn start(&self, schedule: &ScheduleConfig, task: TriggerTask) -> Result<()>;

    /// Stop firing; a task already running is not interrupted
    fn stop(&self);

    fn is_active(&self) -> bool;

    /// Next fire time (epoch ms) strictly after `after_millis`
    fn next_fire_time(&self, schedule: &ScheduleConfig, after_millis: i64) -> Result<Option<i64>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Trigger that only fires when told to
    #[derive(Default)]
    pub struct ManualTrigger {
        state: Mutex<ManualTriggerState>,
    }

    #[derive(Default)]
    struct ManualTriggerState {
        task: Option<TriggerTask>,
        schedule: Option<ScheduleConfig>,
        starts: usize,
        stops: usize,
    }

    impl ManualTrigger {
        pub fn new() -> Self {
            Self::default()
        }

        /// Run the registered task once (no-op when stopped)
        pub async fn fire(&self) {
            let task = self.state.lock().unwrap().task.clone();
            if let Some(task) = task {
                task().await;
            }
        }

        pub fn starts(&self) -> usize {
            self.state.lock().unwrap().starts
        }

        pub fn stops(&self) -> usize {
            self.state.lock().unwrap().stops
        }

        pub fn schedule(&self) -> Option<ScheduleConfig> {
            self.state.lock().unwrap().schedule.clone()
        }
    }

    impl ScheduledTrigger for ManualTrigger {
        fn start(&self, schedule: &ScheduleConfig, task: TriggerTask) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.task = Some(task);
            state.schedule = Some(schedule.clone());
            state.starts += 1;
            Ok(())
        }

        fn stop(&self) {
            let mut state = self.state.lock().unwrap();
            if state.task.take().is_some() {
                state.stops += 1;
            }
        }

        fn is_active(&self) -> bool {
            self.state.lock().unwrap().task.is_some()
        }

        fn next_fire_time(
            &self,
            _schedule: &ScheduleConfig,
            _after_millis: i64,
        ) -> Result<Option<i64>> {
            Ok(None)
        }
    }
}
