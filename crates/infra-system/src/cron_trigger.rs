// Cron trigger implementation
// reason: cron for expression parsing, chrono-tz for wall-clock evaluation in a named zone
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use convoy_core::application::worker::{shutdown_channel, ShutdownSender, ShutdownToken};
use convoy_core::domain::ScheduleConfig;
use convoy_core::port::{ScheduledTrigger, TriggerTask};
use convoy_core::{AppError, Result};

/// Recurring trigger driven by a cron expression on the tokio runtime
///
/// Fires are sequential: a fire that comes due while the previous task is
/// still running is taken after it finishes, never concurrently.
#[derive(Default)]
pub struct CronTrigger {
    armed: Mutex<Option<Armed>>,
}

struct Armed {
    shutdown: ShutdownSender,
    handle: JoinHandle<()>,
}

impl CronTrigger {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Five-field crontab lines get a leading seconds field
fn normalize_expression(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

fn parse(schedule: &ScheduleConfig) -> Result<(Schedule, Tz)> {
    let cron = Schedule::from_str(&normalize_expression(&schedule.expression)).map_err(|e| {
        AppError::Config(format!(
            "invalid cron expression '{}': {}",
            schedule.expression, e
        ))
    })?;
    let tz = Tz::from_str(&schedule.timezone).map_err(|e| {
        AppError::Config(format!("unknown timezone '{}': {}", schedule.timezone, e))
    })?;
    Ok((cron, tz))
}

fn next_after(cron: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron.after(&after.with_timezone(&tz))
        .next()
        .map(|at| at.with_timezone(&Utc))
}

async fn fire_loop(cron: Schedule, tz: Tz, task: TriggerTask, mut token: ShutdownToken) {
    loop {
        let now = Utc::now();
        let Some(next) = next_after(&cron, tz, now) else {
            info!("Cron schedule has no further fire times");
            return;
        };
        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = token.wait() => {
                debug!("Cron trigger stopped");
                return;
            }
        }
        if token.is_shutdown() {
            return;
        }

        debug!(fire_at = %next, "Cron trigger fired");
        task().await;
    }
}

impl ScheduledTrigger for CronTrigger {
    fn start(&self, schedule: &ScheduleConfig, task: TriggerTask) -> Result<()> {
        let (cron, tz) = parse(schedule)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::InvalidState(format!("no tokio runtime: {}", e)))?;

        self.stop();

        let (shutdown, token) = shutdown_channel();
        let handle = runtime.spawn(fire_loop(cron, tz, task, token));

        *self.armed.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Armed { shutdown, handle });

        info!(
            expression = %schedule.expression,
            timezone = %schedule.timezone,
            "Cron trigger started"
        );
        Ok(())
    }

    fn stop(&self) {
        let armed = self
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(armed) = armed {
            armed.shutdown.shutdown();
        }
    }

    fn is_active(&self) -> bool {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|armed| !armed.handle.is_finished())
    }

    fn next_fire_time(&self, schedule: &ScheduleConfig, after_millis: i64) -> Result<Option<i64>> {
        let (cron, tz) = parse(schedule)?;
        let after = DateTime::<Utc>::from_timestamp_millis(after_millis).ok_or_else(|| {
            AppError::Validation(format!("timestamp out of range: {}", after_millis))
        })?;
        Ok(next_after(&cron, tz, after).map(|at| at.timestamp_millis()))
    }
}

impl Drop for CronTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}
