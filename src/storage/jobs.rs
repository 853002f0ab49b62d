//! PostgreSQL crawl job store
//!
//! Progress counters and the operator log ring live as JSONB on the job row.
//! Both are mutated read-modify-write under a point-row lock; the lock never
//! spans an await outside the transaction helpers here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use serde_json::Value;
use tokio_postgres::Row;
use tracing::warn;

use crate::models::{Counter, CrawlJob, JobLogEntry, JobStatus};
use crate::storage::repository::JobRepository;

/// Operator log entries kept per job; older entries are trimmed
const MAX_JOB_LOGS: usize = 200;

const JOB_COLUMNS: &str =
    "id, status, config, progress, error_message, created_at, started_at, completed_at";

/// PostgreSQL-backed job repository
pub struct PostgresJobStore {
    pool: Pool,
}

impl PostgresJobStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &Row) -> Result<CrawlJob> {
        let status_raw: String = row.get("status");
        let config: Value = row.get("config");
        let progress: Value = row.get("progress");

        Ok(CrawlJob {
            id: row.get("id"),
            status: JobStatus::parse(&status_raw)
                .with_context(|| format!("unknown status in job row: {status_raw}"))?,
            config: serde_json::from_value(config).context("job config column")?,
            progress: serde_json::from_value(progress).unwrap_or_default(),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl JobRepository for PostgresJobStore {
    async fn create(&self, job: &CrawlJob) -> Result<()> {
        let client = self.pool.get().await.context("job create: pool")?;
        let config = serde_json::to_value(&job.config).context("job create: config")?;
        let progress = serde_json::to_value(&job.progress).context("job create: progress")?;

        client
            .execute(
                "INSERT INTO crawl_jobs (id, status, config, progress, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &job.id,
                    &job.status.as_str(),
                    &config,
                    &progress,
                    &job.created_at,
                ],
            )
            .await
            .context("job create: insert")?;
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<CrawlJob>> {
        let client = self.pool.get().await.context("job get: pool")?;
        let row = client
            .query_opt(
                &format!("SELECT {JOB_COLUMNS} FROM crawl_jobs WHERE id = $1"),
                &[&job_id],
            )
            .await
            .context("job get: select")?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn list(&self, limit: i64) -> Result<Vec<CrawlJob>> {
        let client = self.pool.get().await.context("job list: pool")?;
        let rows = client
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM crawl_jobs ORDER BY created_at DESC LIMIT $1"
                ),
                &[&limit],
            )
            .await
            .context("job list: select")?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn mark_running(&self, job_id: &str) -> Result<bool> {
        let client = self.pool.get().await.context("job running: pool")?;
        let updated = client
            .execute(
                "UPDATE crawl_jobs SET status = 'running', started_at = now()
                 WHERE id = $1 AND status = 'pending'",
                &[&job_id],
            )
            .await
            .context("job running: update")?;
        Ok(updated > 0)
    }

    async fn mark_completed(&self, job_id: &str) -> Result<bool> {
        let client = self.pool.get().await.context("job complete: pool")?;
        let updated = client
            .execute(
                "UPDATE crawl_jobs SET status = 'completed', completed_at = now()
                 WHERE id = $1 AND status = 'running'",
                &[&job_id],
            )
            .await
            .context("job complete: update")?;
        Ok(updated > 0)
    }

    async fn mark_failed(&self, job_id: &str, error: &str) -> Result<bool> {
        let client = self.pool.get().await.context("job fail: pool")?;
        let updated = client
            .execute(
                "UPDATE crawl_jobs
                 SET status = 'failed', error_message = $2, completed_at = now()
                 WHERE id = $1 AND status IN ('pending', 'running')",
                &[&job_id, &error],
            )
            .await
            .context("job fail: update")?;
        Ok(updated > 0)
    }

    async fn cancel(&self, job_id: &str) -> Result<bool> {
        let client = self.pool.get().await.context("job cancel: pool")?;
        let updated = client
            .execute(
                "UPDATE crawl_jobs SET status = 'cancelled', completed_at = now()
                 WHERE id = $1 AND status IN ('pending', 'running')",
                &[&job_id],
            )
            .await
            .context("job cancel: update")?;
        Ok(updated > 0)
    }

    async fn bump_progress(&self, job_id: &str, updates: &[(Counter, i64)]) -> Result<()> {
        let mut client = self.pool.get().await.context("job progress: pool")?;
        let tx = client.transaction().await.context("job progress: begin")?;

        let row = tx
            .query_opt(
                "SELECT progress FROM crawl_jobs WHERE id = $1 FOR UPDATE",
                &[&job_id],
            )
            .await
            .context("job progress: select")?;

        let Some(row) = row else {
            warn!(job_id = %job_id, "Progress update for unknown job");
            tx.commit().await.ok();
            return Ok(());
        };

        let raw: Value = row.get(0);
        let mut progress: crate::models::JobProgress =
            serde_json::from_value(raw).unwrap_or_default();
        progress.apply(updates);

        let updated = serde_json::to_value(&progress).context("job progress: serialize")?;
        tx.execute(
            "UPDATE crawl_jobs SET progress = $2 WHERE id = $1",
            &[&job_id, &updated],
        )
        .await
        .context("job progress: update")?;

        tx.commit().await.context("job progress: commit")?;
        Ok(())
    }

    async fn append_log(&self, job_id: &str, entry: JobLogEntry) -> Result<()> {
        let mut client = self.pool.get().await.context("job log: pool")?;
        let tx = client.transaction().await.context("job log: begin")?;

        let row = tx
            .query_opt(
                "SELECT logs FROM crawl_jobs WHERE id = $1 FOR UPDATE",
                &[&job_id],
            )
            .await
            .context("job log: select")?;

        let Some(row) = row else {
            tx.commit().await.ok();
            return Ok(());
        };

        let raw: Value = row.get(0);
        let mut logs: Vec<JobLogEntry> = serde_json::from_value(raw).unwrap_or_default();
        logs.push(entry);
        if logs.len() > MAX_JOB_LOGS {
            let excess = logs.len() - MAX_JOB_LOGS;
            logs.drain(..excess);
        }

        let updated = serde_json::to_value(&logs).context("job log: serialize")?;
        tx.execute(
            "UPDATE crawl_jobs SET logs = $2 WHERE id = $1",
            &[&job_id, &updated],
        )
        .await
        .context("job log: update")?;

        tx.commit().await.context("job log: commit")?;
        Ok(())
    }

    async fn logs_since(&self, job_id: &str, since: usize) -> Result<Vec<JobLogEntry>> {
        let client = self.pool.get().await.context("job logs: pool")?;
        let row = client
            .query_opt("SELECT logs FROM crawl_jobs WHERE id = $1", &[&job_id])
            .await
            .context("job logs: select")?;

        let Some(row) = row else {
            return Ok(Vec::new());
        };

        let raw: Value = row.get(0);
        let logs: Vec<JobLogEntry> = serde_json::from_value(raw).unwrap_or_default();
        Ok(logs.into_iter().skip(since).collect())
    }
}
