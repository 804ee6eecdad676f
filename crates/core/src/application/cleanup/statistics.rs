// Cumulative cleanup statistics

use crate::domain::CleanupResult;
use serde::Serialize;

/// Totals across all non-dry-run cleanups since startup
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStatistics {
    pub total_cleanups: u64,
    pub total_jobs_cleaned: u64,
    pub total_space_freed: u64,
    pub average_duration_ms: f64,
    pub last_run_at: Option<i64>,
    pub last_run_success: Option<bool>,
}

impl CleanupStatistics {
    /// Fold a finished run in; totals only move for successful runs
    pub fn record(&mut self, result: &CleanupResult) {
        if result.dry_run {
            return;
        }
        self.last_run_at = result.finished_at.or(Some(result.started_at));
        self.last_run_success = Some(result.success);
        if !result.success {
            return;
        }

        let duration = result.duration_ms.unwrap_or(0) as f64;
        self.average_duration_ms = if self.total_cleanups == 0 {
            duration
        } else {
            (self.average_duration_ms + duration) / 2.0
        };
        self.total_cleanups += 1;
        self.total_jobs_cleaned += result.jobs_cleaned;
        self.total_space_freed += result.space_freed;
    }
}

/// Statistics plus live service state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStatus {
    #[serde(flatten)]
    pub statistics: CleanupStatistics,
    pub is_running: bool,
    pub schedule_active: bool,
    pub next_run_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(duration: i64, cleaned: u64, dry_run: bool) -> CleanupResult {
        let mut result = CleanupResult::new(1_000, dry_run);
        result.jobs_cleaned = cleaned;
        result.space_freed = cleaned * 10;
        result.complete(1_000 + duration);
        result
    }

    #[test]
    fn test_running_average() {
        let mut stats = CleanupStatistics::default();
        stats.record(&finished(100, 1, false));
        assert_eq!(stats.average_duration_ms, 100.0);
        stats.record(&finished(300, 2, false));
        assert_eq!(stats.average_duration_ms, 200.0);
        stats.record(&finished(400, 0, false));
        assert_eq!(stats.average_duration_ms, 300.0);

        assert_eq!(stats.total_cleanups, 3);
        assert_eq!(stats.total_jobs_cleaned, 3);
        assert_eq!(stats.total_space_freed, 30);
        assert_eq!(stats.last_run_at, Some(1_400));
    }

    #[test]
    fn test_dry_run_and_failures_do_not_count() {
        let mut stats = CleanupStatistics::default();
        stats.record(&finished(100, 5, true));
        assert_eq!(stats, CleanupStatistics::default());

        let mut failed = CleanupResult::new(1_000, false);
        failed.fail(1_050, "backup failed");
        stats.record(&failed);
        assert_eq!(stats.total_cleanups, 0);
        assert_eq!(stats.last_run_success, Some(false));
    }
}
