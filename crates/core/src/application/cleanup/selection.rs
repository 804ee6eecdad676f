// Candidate selection
// Pure rule evaluation over a history snapshot

use crate::domain::{
    CleanupCandidate, CleanupReason, CleanupStrategy, Job, JobStatus, RetentionConfig,
};
use std::cmp::Reverse;
use std::collections::HashSet;

/// Evaluate every retention rule against `jobs`
///
/// Candidates keep the order of `jobs`. A job can match several reasons.
/// Count and size ranks are computed over the whole history so that already
/// reclaimed records keep occupying their slot.
pub fn select_candidates(
    jobs: &[Job],
    config: &RetentionConfig,
    now_millis: i64,
) -> Vec<CleanupCandidate> {
    let rules = &config.rules;
    let over_count = beyond_count_limit(jobs, rules.max_count);
    let over_size = beyond_size_limit(jobs, rules.max_total_size_bytes);

    jobs.iter()
        .filter(|job| !config.safety.protected_jobs.contains(&job.id))
        .filter(|job| {
            !job.is_reclaimed()
                || config.strategy.for_status(job.status) == CleanupStrategy::HardDelete
        })
        .filter_map(|job| {
            let mut reasons = Vec::new();

            if let Some(max_age) = rules.max_age_for(job.status) {
                if elapsed_beyond(now_millis, job.created_at, max_age) {
                    reasons.push(CleanupReason::AgeLimit);
                }
            }

            if matches!(job.status, JobStatus::Error | JobStatus::Cancelled) {
                if let Some(retention) = rules.status_retention_ms.get(&job.status) {
                    if elapsed_beyond(now_millis, job.updated_at, *retention) {
                        reasons.push(CleanupReason::StatusBased);
                    }
                }
            }

            if over_count.contains(job.id.as_str()) {
                reasons.push(CleanupReason::CountLimit);
            }
            if over_size.contains(job.id.as_str()) {
                reasons.push(CleanupReason::SizeLimit);
            }

            (!reasons.is_empty()).then(|| CleanupCandidate {
                job: job.clone(),
                reasons,
            })
        })
        .collect()
}

/// `now - since > limit`; limits past `i64::MAX` never expire
fn elapsed_beyond(now_millis: i64, since: i64, limit_ms: u64) -> bool {
    let limit = i64::try_from(limit_ms).unwrap_or(i64::MAX);
    now_millis.saturating_sub(since) > limit
}

/// Ids ranked beyond the `max_count` newest by creation time
fn beyond_count_limit(jobs: &[Job], max_count: Option<usize>) -> HashSet<&str> {
    let Some(max_count) = max_count else {
        return HashSet::new();
    };
    let mut ranked: Vec<&Job> = jobs.iter().collect();
    // Newest first; equal timestamps fall back to id for a stable rank
    ranked.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
        .into_iter()
        .skip(max_count)
        .map(|job| job.id.as_str())
        .collect()
}

/// Ids at which the running size total (largest first) exceeds the limit
fn beyond_size_limit(jobs: &[Job], max_total: Option<u64>) -> HashSet<&str> {
    let Some(max_total) = max_total else {
        return HashSet::new();
    };
    let mut ranked: Vec<&Job> = jobs.iter().collect();
    ranked.sort_by_key(|job| (Reverse(job.file_size), job.created_at));

    let mut running: u64 = 0;
    let mut over = HashSet::new();
    for job in ranked {
        running = running.saturating_add(job.file_size);
        if running > max_total {
            over.insert(job.id.as_str());
        }
    }
    over
}
