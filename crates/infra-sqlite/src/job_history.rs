// SQLite JobHistory Implementation

use crate::map_sqlx_error;
use async_trait::async_trait;
use convoy_core::domain::{Job, JobPatch, JobSettings, JobStatus, Priority};
use convoy_core::error::{AppError, Result};
use convoy_core::port::{HistorySnapshot, JobHistory, TimeProvider};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::sync::Arc;

const SELECT_JOBS: &str = "SELECT * FROM jobs";

pub struct SqliteJobHistory {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobHistory {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    /// Number of stored records, soft-deleted ones included
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn find_in(tx: &mut Transaction<'_, Sqlite>, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("{} WHERE id = ?", SELECT_JOBS))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        row.map(JobRow::into_job).transpose()
    }
}

/// Insert or replace one record; insertion order (rowid) survives updates
async fn write_job<'e, E>(executor: E, job: &Job) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let temp_files = serde_json::to_string(&job.temp_files)?;
    let log_files = serde_json::to_string(&job.log_files)?;
    let settings = serde_json::to_string(job.settings.as_value())?;

    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, priority, original_priority, priority_boost, emergency_boosted, queued_at,
            status, created_at, updated_at,
            deleted, deleted_at, deletion_reason,
            archived, archived_at, archive_path,
            compressed, compressed_at,
            file_size, input_file, output_file, temp_files, log_files, settings
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            priority = excluded.priority,
            original_priority = excluded.original_priority,
            priority_boost = excluded.priority_boost,
            emergency_boosted = excluded.emergency_boosted,
            queued_at = excluded.queued_at,
            status = excluded.status,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            deleted = excluded.deleted,
            deleted_at = excluded.deleted_at,
            deletion_reason = excluded.deletion_reason,
            archived = excluded.archived,
            archived_at = excluded.archived_at,
            archive_path = excluded.archive_path,
            compressed = excluded.compressed,
            compressed_at = excluded.compressed_at,
            file_size = excluded.file_size,
            input_file = excluded.input_file,
            output_file = excluded.output_file,
            temp_files = excluded.temp_files,
            log_files = excluded.log_files,
            settings = excluded.settings
        "#,
    )
    .bind(&job.id)
    .bind(job.priority.as_str())
    .bind(job.original_priority.map(Priority::as_str))
    .bind(job.priority_boost)
    .bind(job.emergency_boosted)
    .bind(job.queued_at)
    .bind(job.status.as_str())
    .bind(job.created_at)
    .bind(job.updated_at)
    // Cleanup marks
    .bind(job.deleted)
    .bind(job.deleted_at)
    .bind(&job.deletion_reason)
    .bind(job.archived)
    .bind(job.archived_at)
    .bind(&job.archive_path)
    .bind(job.compressed)
    .bind(job.compressed_at)
    // Files
    .bind(i64::try_from(job.file_size).unwrap_or(i64::MAX))
    .bind(&job.input_file)
    .bind(&job.output_file)
    .bind(temp_files)
    .bind(log_files)
    .bind(settings)
    .execute(executor)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

#[async_trait]
impl JobHistory for SqliteJobHistory {
    async fn get_all_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!("{} ORDER BY rowid ASC", SELECT_JOBS))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("{} WHERE id = ?", SELECT_JOBS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn update_job(&self, id: &str, patch: JobPatch) -> Result<Job> {
        // Read-modify-write inside one transaction
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut job = Self::find_in(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
        patch.apply(&mut job);
        write_job(&mut *tx, &job).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(job)
    }

    async fn remove_job(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn export_history(&self) -> Result<HistorySnapshot> {
        let jobs = self.get_all_jobs().await?;
        Ok(HistorySnapshot::new(self.time_provider.now_millis(), jobs))
    }

    async fn upsert_job(&self, job: &Job) -> Result<()> {
        write_job(&self.pool, job).await
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    priority: String,
    original_priority: Option<String>,
    priority_boost: i64,
    emergency_boosted: bool,
    queued_at: Option<i64>,
    status: String,
    created_at: i64,
    updated_at: i64,

    deleted: bool,
    deleted_at: Option<i64>,
    deletion_reason: Option<String>,
    archived: bool,
    archived_at: Option<i64>,
    archive_path: Option<String>,
    compressed: bool,
    compressed_at: Option<i64>,

    file_size: i64,
    input_file: Option<String>,
    output_file: Option<String>,
    temp_files: String,
    log_files: String,
    settings: String,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let status: JobStatus = self.status.parse().map_err(|_| {
            AppError::Database(format!("Job {} has unknown status {}", self.id, self.status))
        })?;
        let settings: serde_json::Value =
            serde_json::from_str(&self.settings).unwrap_or(serde_json::Value::Null);

        Ok(Job {
            priority: Priority::normalize(&self.priority),
            original_priority: self.original_priority.as_deref().map(Priority::normalize),
            priority_boost: self.priority_boost,
            emergency_boosted: self.emergency_boosted,
            queued_at: self.queued_at,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,

            deleted: self.deleted,
            deleted_at: self.deleted_at,
            deletion_reason: self.deletion_reason,
            archived: self.archived,
            archived_at: self.archived_at,
            archive_path: self.archive_path,
            compressed: self.compressed,
            compressed_at: self.compressed_at,

            file_size: self.file_size.max(0) as u64,
            input_file: self.input_file,
            output_file: self.output_file,
            temp_files: serde_json::from_str(&self.temp_files)?,
            log_files: serde_json::from_str(&self.log_files)?,
            settings: JobSettings::new(settings),
            id: self.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use convoy_core::port::time_provider::mocks::ManualClock;

    async fn setup_test_db() -> SqliteJobHistory {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobHistory::new(pool, Arc::new(ManualClock::new(5_000)))
    }

    fn full_job(id: &str) -> Job {
        let mut job = Job::new(id, 1_000).with_priority(Priority::High);
        job.enqueue(1_500);
        job.apply_emergency_boost(500);
        job.status = JobStatus::Completed;
        job.file_size = 4096;
        job.input_file = Some("/in/a.docx".to_string());
        job.output_file = Some("/out/a.pdf".to_string());
        job.temp_files = vec!["/tmp/a1".to_string(), "/tmp/a2".to_string()];
        job.log_files = vec!["/logs/a.log".to_string()];
        job.settings = JobSettings::new(serde_json::json!({ "dpi": 300 }));
        job
    }

    #[tokio::test]
    async fn test_upsert_and_get_roundtrip() {
        let history = setup_test_db().await;
        let job = full_job("a");

        history.upsert_job(&job).await.unwrap();

        let found = history.get_job("a").await.unwrap().unwrap();
        assert_eq!(found, job);
        assert!(history.get_job("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_all_preserves_insertion_order() {
        let history = setup_test_db().await;
        for id in ["c", "a", "b"] {
            history.upsert_job(&Job::new(id, 0)).await.unwrap();
        }
        // Updating an existing record keeps its slot
        let updated = Job::new("c", 0).with_status(JobStatus::Error, 10);
        history.upsert_job(&updated).await.unwrap();

        let ids: Vec<String> = history
            .get_all_jobs()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(history.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_update_job_applies_patch() {
        let history = setup_test_db().await;
        history.upsert_job(&full_job("a")).await.unwrap();

        let updated = history
            .update_job("a", JobPatch::soft_delete(9_000, "AGE_LIMIT"))
            .await
            .unwrap();
        assert!(updated.deleted);

        let stored = history.get_job("a").await.unwrap().unwrap();
        assert_eq!(stored.deleted_at, Some(9_000));
        assert_eq!(stored.deletion_reason.as_deref(), Some("AGE_LIMIT"));
        assert_eq!(stored.updated_at, 9_000);
        assert_eq!(stored.temp_files.len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_job() {
        let history = setup_test_db().await;
        let err = history
            .update_job("ghost", JobPatch::compressed(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_and_export() {
        let history = setup_test_db().await;
        history.upsert_job(&full_job("a")).await.unwrap();
        history.upsert_job(&full_job("b")).await.unwrap();

        assert!(history.remove_job("a").await.unwrap());
        assert!(!history.remove_job("a").await.unwrap());

        let snapshot = history.export_history().await.unwrap();
        assert_eq!(snapshot.exported_at, 5_000);
        assert_eq!(snapshot.jobs.len(), 1);
        assert_eq!(snapshot.jobs[0].id, "b");
    }

    #[tokio::test]
    async fn test_failed_alias_in_storage() {
        let history = setup_test_db().await;
        sqlx::query(
            "INSERT INTO jobs (id, status, created_at, updated_at, priority) \
             VALUES ('legacy', 'failed', 0, 0, 'URGENT')",
        )
        .execute(&history.pool)
        .await
        .unwrap();

        let job = history.get_job("legacy").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.priority, Priority::Normal);
    }
}
