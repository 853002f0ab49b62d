//! Job lifecycle helpers and completion detection
//!
//! A job completes when its queue drains: nothing pending, nothing in
//! flight. Every terminal item transition funnels through a completion
//! check; the job-row CAS keeps the transition single-shot even when checks
//! race.

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::models::{new_record_id, CrawlJob, JobConfig, JobLogEntry, JobStatus};
use crate::storage::repository::{JobRepository, QueueRepository};

/// Build a fresh job record for the given configuration
pub fn new_job(config: JobConfig) -> CrawlJob {
    CrawlJob {
        id: new_record_id(),
        status: JobStatus::Pending,
        config,
        progress: Default::default(),
        error_message: None,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
    }
}

/// Complete the job if its queue has drained. Returns true when this call
/// performed the transition.
pub async fn check_job_completion(
    jobs: &dyn JobRepository,
    queue: &dyn QueueRepository,
    job_id: &str,
) -> Result<bool> {
    let counts = queue.count_by_state(job_id).await?;
    if !counts.is_drained() {
        return Ok(false);
    }

    let Some(job) = jobs.get(job_id).await? else {
        return Ok(false);
    };
    if job.status != JobStatus::Running {
        return Ok(false);
    }

    if !jobs.mark_completed(job_id).await? {
        // Lost the race to a concurrent check
        return Ok(false);
    }

    info!(
        job_id = %job_id,
        completed = counts.completed,
        failed = counts.failed,
        "Crawl job completed"
    );
    jobs.append_log(
        job_id,
        JobLogEntry::now(
            "info",
            format!(
                "Crawl completed: {} URLs processed, {} failed",
                counts.completed, counts.failed
            ),
        ),
    )
    .await?;

    Ok(true)
}
