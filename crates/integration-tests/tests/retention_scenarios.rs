//! Retention cleanup against SQLite and the real filesystem

mod common;

use std::collections::{BTreeMap, HashMap};

use common::{days_ago, exists, Harness, DAY};
use convoy_core::application::cleanup::{backup_file_name, select_candidates};
use convoy_core::domain::{CleanupReason, CleanupStrategy, FileAction, Job, JobStatus};
use convoy_core::port::{CleanupEvent, HistorySnapshot, JobHistory};

fn failed_job(id: &str, created_days_ago: i64, updated_days_ago: i64) -> Job {
    Job::new(id, days_ago(created_days_ago))
        .with_status(JobStatus::Error, days_ago(updated_days_ago))
}

#[tokio::test]
async fn test_status_retention_beats_age_for_recent_failure() {
    let h = Harness::new(|config| {
        config.rules.max_age_ms = Some(7 * DAY as u64);
        config.rules.status_retention_ms = HashMap::from([(JobStatus::Error, 3 * DAY as u64)]);
    })
    .await;
    h.seed(&[failed_job("failed-1", 2, 4)]).await;

    let jobs = h.history.get_all_jobs().await.unwrap();
    let candidates = select_candidates(&jobs, &h.service.get_config().unwrap(), h.now());
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].reasons, vec![CleanupReason::StatusBased]);

    let preview = h.service.get_cleanup_preview(None).await.unwrap();
    assert_eq!(
        preview.by_reason,
        BTreeMap::from([(CleanupReason::StatusBased, 1)])
    );
}

#[tokio::test]
async fn test_count_limit_flags_only_the_oldest() {
    let h = Harness::new(|config| config.rules.max_count = Some(10)).await;
    let jobs: Vec<Job> = (0..11)
        .map(|i| Job::new(format!("job-{:02}", i), days_ago(20 - i)))
        .collect();
    h.seed(&jobs).await;

    let history = h.history.get_all_jobs().await.unwrap();
    let candidates = select_candidates(&history, &h.service.get_config().unwrap(), h.now());

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].job.id, "job-00");
    assert_eq!(candidates[0].reasons, vec![CleanupReason::CountLimit]);
}

#[tokio::test]
async fn test_soft_delete_run_on_disk() {
    let h = Harness::new(|config| config.rules.max_age_ms = Some(30 * DAY as u64)).await;

    let mut old = Job::new("old", days_ago(45)).with_status(JobStatus::Completed, days_ago(44));
    old.input_file = Some(h.touch("data/old.docx", 300));
    old.output_file = Some(h.touch("data/old.pdf", 200));
    old.temp_files = vec![h.touch("tmp/old/page-1.png", 100)];
    old.log_files = vec![h.touch("logs/old.log", 50)];
    let young = Job::new("young", days_ago(3));
    h.seed(&[old.clone(), young]).await;

    let result = h.service.run_cleanup(None).await.unwrap();

    assert!(result.success);
    assert_eq!(result.cleaned_job_ids, vec!["old".to_string()]);
    assert_eq!(result.space_freed, 150);
    assert_eq!(result.by_strategy, BTreeMap::from([(CleanupStrategy::SoftDelete, 1)]));

    // temp and logs go, input and output stay
    assert!(!exists(&old.temp_files[0]));
    assert!(!exists(&old.log_files[0]));
    assert!(exists(old.input_file.as_deref().unwrap()));
    assert!(exists(old.output_file.as_deref().unwrap()));

    let record = h.job("old").await.unwrap();
    assert!(record.deleted);
    assert_eq!(record.deleted_at, Some(h.now()));
    assert_eq!(record.deletion_reason.as_deref(), Some("AGE_LIMIT"));
    assert!(!h.job("young").await.unwrap().deleted);

    // backup taken before anything changed
    let backup = h.path("backups").join(backup_file_name(h.now()));
    let snapshot: HistorySnapshot =
        serde_json::from_slice(&std::fs::read(backup).unwrap()).unwrap();
    assert_eq!(snapshot.jobs.len(), 2);
    assert!(snapshot.jobs.iter().all(|job| !job.deleted));

    // already reclaimed: nothing left to do
    h.clock.advance(1_000);
    let second = h.service.run_cleanup(None).await.unwrap();
    assert_eq!(second.jobs_cleaned, 0);
}

#[tokio::test]
async fn test_archive_strategy_moves_files_and_record() {
    let h = Harness::new(|config| {
        config.rules.max_age_ms = Some(DAY as u64);
        config.strategy.default = CleanupStrategy::Archive;
        config.file_actions.input = FileAction::Archive;
        config.safety.backup_before_cleanup = false;
    })
    .await;

    let mut job = Job::new("arch", days_ago(10));
    job.input_file = Some(h.touch("in/contract.docx", 64));
    h.seed(&[job.clone()]).await;

    let result = h.service.run_cleanup(None).await.unwrap();

    assert_eq!(result.files_archived, 1);
    assert_eq!(result.space_freed, 0);
    assert!(!exists(job.input_file.as_deref().unwrap()));
    assert!(h.path("archive/files/arch/contract.docx").exists());

    let record_path = h.path("archive/jobs/arch.json");
    let archived: Job = serde_json::from_slice(&std::fs::read(&record_path).unwrap()).unwrap();
    assert_eq!(archived.id, "arch");

    let record = h.job("arch").await.unwrap();
    assert!(record.archived);
    assert_eq!(
        record.archive_path.as_deref(),
        Some(record_path.to_string_lossy().as_ref())
    );
    assert!(!h.path("backups").exists());
}

#[tokio::test]
async fn test_hard_delete_removes_record() {
    let h = Harness::new(|config| {
        config.rules.status_retention_ms = HashMap::from([(JobStatus::Cancelled, DAY as u64)]);
        config
            .strategy
            .by_status
            .insert(JobStatus::Cancelled, CleanupStrategy::HardDelete);
    })
    .await;
    let cancelled =
        Job::new("cancelled", days_ago(5)).with_status(JobStatus::Cancelled, days_ago(2));
    h.seed(&[cancelled, Job::new("kept", days_ago(5))]).await;

    let result = h.service.run_cleanup(None).await.unwrap();

    assert_eq!(result.jobs_cleaned, 1);
    assert!(h.job("cancelled").await.is_none());
    assert_eq!(h.history.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_protected_jobs_are_never_touched() {
    let h = Harness::new(|config| {
        config.rules.max_age_ms = Some(DAY as u64);
        config.safety.protected_jobs.insert("vip".to_string());
    })
    .await;
    let mut vip = Job::new("vip", days_ago(90));
    vip.temp_files = vec![h.touch("tmp/vip.png", 10)];
    h.seed(&[vip.clone(), Job::new("other", days_ago(90))]).await;

    let result = h.service.run_cleanup(None).await.unwrap();
    assert_eq!(result.cleaned_job_ids, vec!["other".to_string()]);

    let forced = h
        .service
        .force_cleanup(&["vip".to_string()], CleanupStrategy::HardDelete)
        .await
        .unwrap();
    assert_eq!(forced.jobs_cleaned, 0);
    assert_eq!(forced.warnings.len(), 1);

    assert!(exists(&vip.temp_files[0]));
    assert!(!h.job("vip").await.unwrap().deleted);
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let h = Harness::new(|config| {
        config.rules.max_age_ms = Some(DAY as u64);
        config.safety.dry_run = true;
    })
    .await;
    let mut job = Job::new("stale", days_ago(9));
    job.temp_files = vec![h.touch("tmp/stale.bin", 400)];
    h.seed(&[job.clone()]).await;
    let before = h.history.get_all_jobs().await.unwrap();

    let result = h.service.run_cleanup(None).await.unwrap();

    assert!(result.dry_run);
    assert_eq!(result.jobs_cleaned, 1);
    assert_eq!(result.space_freed, 400);
    assert!(exists(&job.temp_files[0]));
    assert_eq!(h.history.get_all_jobs().await.unwrap(), before);
    assert!(!h.path("backups").exists());

    // dry runs stay out of the statistics
    let status = h.service.get_statistics().unwrap();
    assert_eq!(status.statistics.total_cleanups, 0);
}

#[tokio::test]
async fn test_missing_files_are_warnings_not_errors() {
    let h = Harness::new(|config| config.rules.max_age_ms = Some(DAY as u64)).await;
    let mut job = Job::new("ghost", days_ago(3));
    job.temp_files = vec![h.path("tmp/never-written").to_string_lossy().into_owned()];
    h.seed(&[job]).await;

    let result = h.service.run_cleanup(None).await.unwrap();

    assert!(result.success);
    assert_eq!(result.jobs_cleaned, 1);
    assert!(result.errors.is_empty());
    assert_eq!(result.warnings.len(), 1);
    assert!(h.job("ghost").await.unwrap().deleted);
}

#[tokio::test]
async fn test_events_bracket_the_run() {
    let h = Harness::new(|config| {
        config.rules.max_age_ms = Some(DAY as u64);
        config.performance.batch_size = 2;
    })
    .await;
    let jobs: Vec<Job> = (0..3)
        .map(|i| Job::new(format!("e{}", i), days_ago(5)))
        .collect();
    h.seed(&jobs).await;

    h.service.run_cleanup(None).await.unwrap();

    let events = h.notifier.cleanup_events();
    assert!(matches!(
        events.first(),
        Some(CleanupEvent::Started {
            dry_run: false,
            manual: false
        })
    ));
    let batches = events
        .iter()
        .filter(|e| matches!(e, CleanupEvent::BatchProgress { .. }))
        .count();
    assert_eq!(batches, 2);
    assert!(matches!(
        events.last(),
        Some(CleanupEvent::Completed { jobs_cleaned: 3, .. })
    ));
}
