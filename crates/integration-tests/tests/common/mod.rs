//! Shared fixtures: SQLite history, real filesystem under a temp dir, manual clock
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use convoy_core::application::RetentionCleanupService;
use convoy_core::domain::retention::DAY_MS;
use convoy_core::domain::{Job, RetentionConfig};
use convoy_core::port::event_notifier::mocks::RecordingNotifier;
use convoy_core::port::scheduled_trigger::mocks::ManualTrigger;
use convoy_core::port::system_probe::mocks::MockSystemProbe;
use convoy_core::port::time_provider::mocks::ManualClock;
use convoy_core::port::{JobHistory, TimeProvider};
use convoy_infra_sqlite::{create_pool, run_migrations, SqliteJobHistory};
use convoy_infra_system::TokioFileStore;

pub const DAY: i64 = DAY_MS as i64;
pub const NOW: i64 = 400 * DAY;

pub fn days_ago(days: i64) -> i64 {
    NOW - days * DAY
}

pub async fn open_history(url: &str, clock: Arc<ManualClock>) -> Arc<SqliteJobHistory> {
    let pool = create_pool(url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(SqliteJobHistory::new(pool, clock))
}

/// Every rule off; storage inside `root`
pub fn quiet_policy(root: &Path) -> RetentionConfig {
    let mut config = RetentionConfig::default();
    config.rules.max_age_ms = None;
    config.rules.max_count = None;
    config.rules.max_total_size_bytes = None;
    config.rules.status_retention_ms.clear();
    config.safety.min_free_space_bytes = 0;
    config.performance.batch_pause_ms = 0;
    config.storage.archive_dir = root.join("archive").to_string_lossy().into_owned();
    config.storage.backup_dir = root.join("backups").to_string_lossy().into_owned();
    config
}

pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub history: Arc<SqliteJobHistory>,
    pub notifier: Arc<RecordingNotifier>,
    pub service: Arc<RetentionCleanupService>,
}

impl Harness {
    pub async fn new(configure: impl FnOnce(&mut RetentionConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(NOW));
        let history = open_history("sqlite::memory:", clock.clone()).await;
        let notifier = Arc::new(RecordingNotifier::new());

        let mut config = quiet_policy(dir.path());
        configure(&mut config);

        let service = Arc::new(
            RetentionCleanupService::new(
                config,
                history.clone(),
                Arc::new(TokioFileStore::new()),
                Arc::new(MockSystemProbe::unlimited()),
                Arc::new(ManualTrigger::new()),
                notifier.clone(),
                clock.clone(),
            )
            .unwrap(),
        );

        Self {
            dir,
            clock,
            history,
            notifier,
            service,
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Create a file of `size` bytes and return its path as stored on a job
    pub fn touch(&self, relative: &str, size: usize) -> String {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, vec![b'x'; size]).unwrap();
        path.to_string_lossy().into_owned()
    }

    pub async fn seed(&self, jobs: &[Job]) {
        for job in jobs {
            self.history.upsert_job(job).await.unwrap();
        }
    }

    pub async fn job(&self, id: &str) -> Option<Job> {
        self.history.get_job(id).await.unwrap()
    }
}

pub fn exists(path: &str) -> bool {
    Path::new(path).exists()
}
