// Per-file cleanup actions

use crate::domain::{FileAction, FileActions, Job, JobCleanupOutcome};
use crate::error::{AppError, Result};
use crate::port::FileStore;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Share of a file's size credited by the compression stub
pub const COMPRESSION_CREDIT_NUMERATOR: u64 = 3;
pub const COMPRESSION_CREDIT_DENOMINATOR: u64 = 10;

/// Job ids are used as a single path segment under the archive dir
pub fn archive_segment(job_id: &str) -> Result<&str> {
    let mut components = Path::new(job_id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(segment)), None) if segment == job_id => Ok(job_id),
        _ => Err(AppError::Validation(format!(
            "Job id {:?} cannot be used as an archive path",
            job_id
        ))),
    }
}

/// `<archive_dir>/files/<job_id>/<file_name>`
pub fn archived_file_path(archive_dir: &Path, job_id: &str, source: &Path) -> Result<PathBuf> {
    let segment = archive_segment(job_id)?;
    let file_name = source.file_name().ok_or_else(|| {
        AppError::Validation(format!("{} has no file name", source.display()))
    })?;
    Ok(archive_dir.join("files").join(segment).join(file_name))
}

/// `<archive_dir>/jobs/<job_id>.json`
pub fn archived_record_path(archive_dir: &Path, job_id: &str) -> Result<PathBuf> {
    let segment = archive_segment(job_id)?;
    Ok(archive_dir.join("jobs").join(format!("{}.json", segment)))
}

/// Apply the configured action to every file the job references
///
/// Missing files become warnings on `outcome`. The first I/O failure is
/// returned and leaves the remaining files untouched. In dry-run mode files
/// are only stat'ed and the same credits are reported.
pub async fn process_job_files(
    files: &dyn FileStore,
    job: &Job,
    actions: &FileActions,
    archive_dir: &Path,
    dry_run: bool,
    outcome: &mut JobCleanupOutcome,
) -> Result<()> {
    for (kind, raw_path) in job.files() {
        let action = actions.for_kind(kind);
        if action == FileAction::Keep {
            continue;
        }

        let path = Path::new(raw_path);
        outcome.files_processed += 1;

        let Some(size) = files.stat(path).await? else {
            outcome
                .warnings
                .push(format!("Job {}: file not found: {}", job.id, raw_path));
            continue;
        };

        match action {
            FileAction::Keep => {}
            FileAction::Delete => {
                if !dry_run {
                    files.remove(path).await?;
                }
                outcome.files_cleaned += 1;
                outcome.space_freed += size;
            }
            FileAction::Archive => {
                let target = archived_file_path(archive_dir, &job.id, path)?;
                if !dry_run {
                    if let Some(parent) = target.parent() {
                        files.create_dir_all(parent).await?;
                    }
                    files.rename(path, &target).await?;
                }
                outcome.files_archived += 1;
            }
            FileAction::Compress => {
                // No artifact is produced; only the estimated saving is credited
                outcome.files_compressed += 1;
                outcome.space_freed +=
                    size * COMPRESSION_CREDIT_NUMERATOR / COMPRESSION_CREDIT_DENOMINATOR;
            }
        }

        debug!(job_id = %job.id, path = raw_path, action = ?action, dry_run, "File processed");
    }
    Ok(())
}
