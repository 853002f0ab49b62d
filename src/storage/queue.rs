//! PostgreSQL crawl queue store
//!
//! The queue is the single contended resource in the system. Claiming uses
//! `FOR UPDATE SKIP LOCKED` and flips the row to `submitted` inside the same
//! transaction, so concurrent schedulers can never hand out the same item and
//! no row lock is held across any await point outside this module.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;

use crate::models::{new_record_id, QueueCounts, QueueItem, QueueItemStatus, UrlKind};
use crate::storage::repository::{EnqueueOutcome, QueueRepository};

const ITEM_COLUMNS: &str = "id, job_id, url, url_type, keyword, priority, status, retry_count, \
     next_attempt_at, created_at, submitted_at, completed_at, error_message";

/// PostgreSQL-backed queue repository
pub struct PostgresQueueStore {
    pool: Pool,
}

impl PostgresQueueStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn row_to_item(row: &Row) -> Result<QueueItem> {
        let kind_raw: String = row.get("url_type");
        let status_raw: String = row.get("status");

        Ok(QueueItem {
            id: row.get("id"),
            job_id: row.get("job_id"),
            url: row.get("url"),
            kind: UrlKind::parse(&kind_raw)
                .with_context(|| format!("unknown url_type in queue row: {kind_raw}"))?,
            keyword: row.get("keyword"),
            priority: row.get("priority"),
            status: QueueItemStatus::parse(&status_raw)
                .with_context(|| format!("unknown status in queue row: {status_raw}"))?,
            retry_count: row.get("retry_count"),
            next_attempt_at: row.get("next_attempt_at"),
            created_at: row.get("created_at"),
            submitted_at: row.get("submitted_at"),
            completed_at: row.get("completed_at"),
            error_message: row.get("error_message"),
        })
    }
}

#[async_trait]
impl QueueRepository for PostgresQueueStore {
    async fn enqueue(
        &self,
        job_id: &str,
        url: &str,
        kind: UrlKind,
        keyword: Option<&str>,
        priority: i32,
    ) -> Result<EnqueueOutcome> {
        let client = self.pool.get().await.context("queue enqueue: pool")?;
        let id = new_record_id();

        let inserted = client
            .execute(
                "INSERT INTO crawl_queue (id, job_id, url, url_type, keyword, priority, status)
                 VALUES ($1, $2, $3, $4, $5, $6, 'pending')
                 ON CONFLICT (job_id, url) DO NOTHING",
                &[&id, &job_id, &url, &kind.as_str(), &keyword, &priority],
            )
            .await
            .context("queue enqueue: insert")?;

        if inserted == 0 {
            Ok(EnqueueOutcome::Duplicate)
        } else {
            Ok(EnqueueOutcome::Queued(id))
        }
    }

    async fn claim_next_ready(
        &self,
        job_id: &str,
        max_priority: Option<i32>,
    ) -> Result<Option<QueueItem>> {
        let mut client = self.pool.get().await.context("queue claim: pool")?;
        let tx = client.transaction().await.context("queue claim: begin")?;

        let row = match max_priority {
            Some(cap) => {
                tx.query_opt(
                    &format!(
                        "SELECT {ITEM_COLUMNS} FROM crawl_queue
                         WHERE job_id = $1 AND status = 'pending'
                           AND (next_attempt_at IS NULL OR next_attempt_at <= now())
                           AND priority <= $2
                         ORDER BY priority ASC, random()
                         LIMIT 1
                         FOR UPDATE SKIP LOCKED"
                    ),
                    &[&job_id, &cap],
                )
                .await
            }
            None => {
                tx.query_opt(
                    &format!(
                        "SELECT {ITEM_COLUMNS} FROM crawl_queue
                         WHERE job_id = $1 AND status = 'pending'
                           AND (next_attempt_at IS NULL OR next_attempt_at <= now())
                         ORDER BY priority ASC, random()
                         LIMIT 1
                         FOR UPDATE SKIP LOCKED"
                    ),
                    &[&job_id],
                )
                .await
            }
        }
        .context("queue claim: select")?;

        let Some(row) = row else {
            tx.commit().await.context("queue claim: commit empty")?;
            return Ok(None);
        };

        let mut item = Self::row_to_item(&row)?;

        let submitted_at: DateTime<Utc> = Utc::now();
        tx.execute(
            "UPDATE crawl_queue SET status = 'submitted', submitted_at = $2 WHERE id = $1",
            &[&item.id, &submitted_at],
        )
        .await
        .context("queue claim: transition")?;

        tx.commit().await.context("queue claim: commit")?;

        item.status = QueueItemStatus::Submitted;
        item.submitted_at = Some(submitted_at);
        Ok(Some(item))
    }

    async fn get(&self, item_id: &str) -> Result<Option<QueueItem>> {
        let client = self.pool.get().await.context("queue get: pool")?;
        let row = client
            .query_opt(
                &format!("SELECT {ITEM_COLUMNS} FROM crawl_queue WHERE id = $1"),
                &[&item_id],
            )
            .await
            .context("queue get: select")?;

        row.as_ref().map(Self::row_to_item).transpose()
    }

    async fn mark_completed(&self, item_id: &str) -> Result<bool> {
        let client = self.pool.get().await.context("queue complete: pool")?;
        let updated = client
            .execute(
                "UPDATE crawl_queue
                 SET status = 'completed', completed_at = now()
                 WHERE id = $1 AND status = 'submitted'",
                &[&item_id],
            )
            .await
            .context("queue complete: update")?;
        Ok(updated > 0)
    }

    async fn schedule_retry(
        &self,
        item_id: &str,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool> {
        let client = self.pool.get().await.context("queue retry: pool")?;
        let updated = client
            .execute(
                "UPDATE crawl_queue
                 SET status = 'pending',
                     retry_count = retry_count + 1,
                     next_attempt_at = $2,
                     error_message = $3
                 WHERE id = $1 AND status = 'submitted'",
                &[&item_id, &next_attempt_at, &error],
            )
            .await
            .context("queue retry: update")?;
        Ok(updated > 0)
    }

    async fn mark_failed(&self, item_id: &str, error: &str) -> Result<bool> {
        let client = self.pool.get().await.context("queue fail: pool")?;
        let updated = client
            .execute(
                "UPDATE crawl_queue
                 SET status = 'failed',
                     completed_at = now(),
                     error_message = $2
                 WHERE id = $1 AND status = 'submitted'",
                &[&item_id, &error],
            )
            .await
            .context("queue fail: update")?;
        Ok(updated > 0)
    }

    async fn count_by_state(&self, job_id: &str) -> Result<QueueCounts> {
        let client = self.pool.get().await.context("queue counts: pool")?;
        let rows = client
            .query(
                "SELECT status, count(*) FROM crawl_queue WHERE job_id = $1 GROUP BY status",
                &[&job_id],
            )
            .await
            .context("queue counts: select")?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let status: String = row.get(0);
            let count: i64 = row.get(1);
            match QueueItemStatus::parse(&status) {
                Some(QueueItemStatus::Pending) => counts.pending = count,
                Some(QueueItemStatus::Submitted) => counts.submitted = count,
                Some(QueueItemStatus::Completed) => counts.completed = count,
                Some(QueueItemStatus::Failed) => counts.failed = count,
                None => {}
            }
        }
        Ok(counts)
    }

    async fn ready_count(&self, job_id: &str) -> Result<i64> {
        let client = self.pool.get().await.context("queue ready: pool")?;
        let row = client
            .query_one(
                "SELECT count(*) FROM crawl_queue
                 WHERE job_id = $1 AND status = 'pending'
                   AND (next_attempt_at IS NULL OR next_attempt_at <= now())",
                &[&job_id],
            )
            .await
            .context("queue ready: select")?;
        Ok(row.get(0))
    }

    async fn waiting_retry_count(&self, job_id: &str) -> Result<i64> {
        let client = self.pool.get().await.context("queue waiting: pool")?;
        let row = client
            .query_one(
                "SELECT count(*) FROM crawl_queue
                 WHERE job_id = $1 AND status = 'pending' AND next_attempt_at > now()",
                &[&job_id],
            )
            .await
            .context("queue waiting: select")?;
        Ok(row.get(0))
    }

    async fn in_flight_discovery_count(&self, job_id: &str) -> Result<i64> {
        let client = self.pool.get().await.context("queue in-flight: pool")?;
        let row = client
            .query_one(
                "SELECT count(*) FROM crawl_queue
                 WHERE job_id = $1 AND status = 'submitted'
                   AND url_type IN ('search', 'pagination')",
                &[&job_id],
            )
            .await
            .context("queue in-flight: select")?;
        Ok(row.get(0))
    }

    async fn jobs_with_due_retries(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let client = self.pool.get().await.context("queue due: pool")?;
        let rows = client
            .query(
                "SELECT DISTINCT job_id FROM crawl_queue
                 WHERE status = 'pending' AND next_attempt_at IS NOT NULL
                   AND next_attempt_at <= $1",
                &[&now],
            )
            .await
            .context("queue due: select")?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn revive_stale_submissions(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let client = self.pool.get().await.context("queue revive: pool")?;
        let rows = client
            .query(
                "UPDATE crawl_queue
                 SET status = 'pending',
                     retry_count = retry_count + 1,
                     next_attempt_at = NULL,
                     error_message = 'stale submission revived'
                 WHERE status = 'submitted' AND submitted_at < $1
                 RETURNING job_id",
                &[&cutoff],
            )
            .await
            .context("queue revive: update")?;

        let mut jobs: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
        jobs.sort();
        jobs.dedup();
        Ok(jobs)
    }
}
