//! Repository trait abstractions for persistence
//!
//! Trait-based data access keeps the scheduler and webhook layers free of
//! SQL and lets the integration suites run on in-memory implementations.
//!
//! # Repository Traits
//!
//! - [`QueueRepository`] - crawl queue operations and state transitions
//! - [`JobRepository`] - job lifecycle, progress counters, operator logs
//! - [`ExclusionRepository`] - persistent exclusion rules
//! - [`ProductRepository`] - dedup lookups and scored-product hand-off

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::models::{
    new_record_id, Counter, CrawlJob, ExclusionRule, JobLogEntry, JobStatus, ProductRecord,
    QueueCounts, QueueItem, QueueItemStatus, RuleKind, UrlKind,
};

// ============================================================================
// Outcomes
// ============================================================================

/// Result of an enqueue, distinguishing idempotency hits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new queue item was created
    Queued(String),
    /// The (job, url) pair was already enqueued; silently dropped
    Duplicate,
}

impl EnqueueOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, EnqueueOutcome::Queued(_))
    }
}

/// Result of handing a product to the scored-product store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Stored; this is the first record for the product id
    Stored,
    /// A record with this product id already exists; nothing written
    Duplicate,
}

// ============================================================================
// Queue Repository
// ============================================================================

/// Crawl queue operations.
///
/// `claim_next_ready` both selects and transitions the item to `submitted`
/// in a single atomic step, so concurrent schedulers can never claim the same
/// item and no row lock survives past the call.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Enqueue a URL. Idempotent on (job_id, url) within a job.
    async fn enqueue(
        &self,
        job_id: &str,
        url: &str,
        kind: UrlKind,
        keyword: Option<&str>,
        priority: i32,
    ) -> Result<EnqueueOutcome>;

    /// Atomically claim one ready item and transition it to `submitted`.
    ///
    /// Ready means pending with no future `next_attempt_at`. Selection is
    /// lowest priority first, uniform random within the tier. When
    /// `max_priority` is given, only items at that priority or better are
    /// eligible (warm-up gating).
    async fn claim_next_ready(
        &self,
        job_id: &str,
        max_priority: Option<i32>,
    ) -> Result<Option<QueueItem>>;

    /// Fetch one item by id
    async fn get(&self, item_id: &str) -> Result<Option<QueueItem>>;

    /// submitted -> completed. Returns false if the item was not submitted.
    async fn mark_completed(&self, item_id: &str) -> Result<bool>;

    /// submitted -> pending with retry accounting. Returns false if the item
    /// was not submitted.
    async fn schedule_retry(
        &self,
        item_id: &str,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool>;

    /// submitted -> failed (terminal). Returns false if the item was not
    /// submitted.
    async fn mark_failed(&self, item_id: &str, error: &str) -> Result<bool>;

    /// Per-state counts for a job
    async fn count_by_state(&self, job_id: &str) -> Result<QueueCounts>;

    /// Number of items ready to submit right now
    async fn ready_count(&self, job_id: &str) -> Result<i64>;

    /// Number of pending items still waiting out a retry delay
    async fn waiting_retry_count(&self, job_id: &str) -> Result<i64>;

    /// Number of discovery-kind (search/pagination) items currently in flight
    async fn in_flight_discovery_count(&self, job_id: &str) -> Result<i64>;

    /// Jobs owning pending items whose retry delay has elapsed
    async fn jobs_with_due_retries(&self, now: DateTime<Utc>) -> Result<Vec<String>>;

    /// Revive submitted items older than `cutoff` back to pending with an
    /// incremented retry count. Returns the owning job ids.
    async fn revive_stale_submissions(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;
}

// ============================================================================
// Job Repository
// ============================================================================

/// Crawl job lifecycle and accounting
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a new job
    async fn create(&self, job: &CrawlJob) -> Result<()>;

    /// Fetch one job by id
    async fn get(&self, job_id: &str) -> Result<Option<CrawlJob>>;

    /// List jobs, most recent first
    async fn list(&self, limit: i64) -> Result<Vec<CrawlJob>>;

    /// pending -> running, stamping started_at
    async fn mark_running(&self, job_id: &str) -> Result<bool>;

    /// running -> completed, stamping completed_at
    async fn mark_completed(&self, job_id: &str) -> Result<bool>;

    /// any active state -> failed
    async fn mark_failed(&self, job_id: &str, error: &str) -> Result<bool>;

    /// pending/running -> cancelled. Returns false when already terminal,
    /// which makes repeated cancellation a no-op.
    async fn cancel(&self, job_id: &str) -> Result<bool>;

    /// Apply progress counter increments under a point-row lock
    async fn bump_progress(&self, job_id: &str, updates: &[(Counter, i64)]) -> Result<()>;

    /// Append to the job's operator log ring (bounded)
    async fn append_log(&self, job_id: &str, entry: JobLogEntry) -> Result<()>;

    /// Log entries from `since` onward
    async fn logs_since(&self, job_id: &str, since: usize) -> Result<Vec<JobLogEntry>>;
}

// ============================================================================
// Exclusion Repository
// ============================================================================

/// Persistent exclusion rules
#[async_trait]
pub trait ExclusionRepository: Send + Sync {
    /// All rules
    async fn list(&self) -> Result<Vec<ExclusionRule>>;

    /// Add a rule; returns None when (kind, value) already exists
    async fn add(
        &self,
        kind: RuleKind,
        value: &str,
        reason: Option<&str>,
    ) -> Result<Option<ExclusionRule>>;

    /// Remove a rule by id
    async fn remove(&self, id: &str) -> Result<bool>;
}

// ============================================================================
// Product Repository
// ============================================================================

/// Dedup index and scored-product hand-off.
///
/// The unique `source_product_id` constraint downstream guarantees at most
/// one successful record per catalog product; `store` reports a duplicate
/// rather than failing when a race slips past the read-side check.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Which of these product ids are already persisted
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>>;

    /// Hand a normalized record to the scoring store
    async fn store(
        &self,
        job_id: &str,
        record: &ProductRecord,
        source_url: &str,
    ) -> Result<StoreOutcome>;
}

// ============================================================================
// In-Memory Implementations
// ============================================================================

/// In-memory queue repository backed by a locked map
#[derive(Default)]
pub struct MemoryQueueRepository {
    items: RwLock<HashMap<String, QueueItem>>,
}

impl MemoryQueueRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// All items for a job (test inspection)
    pub fn items_for_job(&self, job_id: &str) -> Vec<QueueItem> {
        self.items
            .read()
            .unwrap()
            .values()
            .filter(|i| i.job_id == job_id)
            .cloned()
            .collect()
    }

    fn is_ready(item: &QueueItem, now: DateTime<Utc>) -> bool {
        item.status == QueueItemStatus::Pending
            && item.next_attempt_at.map_or(true, |t| t <= now)
    }
}

#[async_trait]
impl QueueRepository for MemoryQueueRepository {
    async fn enqueue(
        &self,
        job_id: &str,
        url: &str,
        kind: UrlKind,
        keyword: Option<&str>,
        priority: i32,
    ) -> Result<EnqueueOutcome> {
        let mut items = self.items.write().unwrap();

        let duplicate = items
            .values()
            .any(|i| i.job_id == job_id && i.url == url);
        if duplicate {
            return Ok(EnqueueOutcome::Duplicate);
        }

        let id = new_record_id();
        items.insert(
            id.clone(),
            QueueItem {
                id: id.clone(),
                job_id: job_id.to_string(),
                url: url.to_string(),
                kind,
                keyword: keyword.map(String::from),
                priority,
                status: QueueItemStatus::Pending,
                retry_count: 0,
                next_attempt_at: None,
                created_at: Utc::now(),
                submitted_at: None,
                completed_at: None,
                error_message: None,
            },
        );

        Ok(EnqueueOutcome::Queued(id))
    }

    async fn claim_next_ready(
        &self,
        job_id: &str,
        max_priority: Option<i32>,
    ) -> Result<Option<QueueItem>> {
        let now = Utc::now();
        let mut items = self.items.write().unwrap();

        let best_priority = items
            .values()
            .filter(|i| i.job_id == job_id && Self::is_ready(i, now))
            .filter(|i| max_priority.map_or(true, |cap| i.priority <= cap))
            .map(|i| i.priority)
            .min();

        let Some(best_priority) = best_priority else {
            return Ok(None);
        };

        let candidates: Vec<String> = items
            .values()
            .filter(|i| {
                i.job_id == job_id && Self::is_ready(i, now) && i.priority == best_priority
            })
            .map(|i| i.id.clone())
            .collect();

        let chosen = candidates
            .choose(&mut rand::thread_rng())
            .cloned()
            .expect("non-empty candidate set");

        let item = items.get_mut(&chosen).expect("chosen item exists");
        item.status = QueueItemStatus::Submitted;
        item.submitted_at = Some(now);

        Ok(Some(item.clone()))
    }

    async fn get(&self, item_id: &str) -> Result<Option<QueueItem>> {
        Ok(self.items.read().unwrap().get(item_id).cloned())
    }

    async fn mark_completed(&self, item_id: &str) -> Result<bool> {
        let mut items = self.items.write().unwrap();
        match items.get_mut(item_id) {
            Some(item) if item.status == QueueItemStatus::Submitted => {
                item.status = QueueItemStatus::Completed;
                item.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn schedule_retry(
        &self,
        item_id: &str,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool> {
        let mut items = self.items.write().unwrap();
        match items.get_mut(item_id) {
            Some(item) if item.status == QueueItemStatus::Submitted => {
                item.status = QueueItemStatus::Pending;
                item.retry_count += 1;
                item.next_attempt_at = Some(next_attempt_at);
                item.error_message = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, item_id: &str, error: &str) -> Result<bool> {
        let mut items = self.items.write().unwrap();
        match items.get_mut(item_id) {
            Some(item) if item.status == QueueItemStatus::Submitted => {
                item.status = QueueItemStatus::Failed;
                item.completed_at = Some(Utc::now());
                item.error_message = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_by_state(&self, job_id: &str) -> Result<QueueCounts> {
        let items = self.items.read().unwrap();
        let mut counts = QueueCounts::default();
        for item in items.values().filter(|i| i.job_id == job_id) {
            match item.status {
                QueueItemStatus::Pending => counts.pending += 1,
                QueueItemStatus::Submitted => counts.submitted += 1,
                QueueItemStatus::Completed => counts.completed += 1,
                QueueItemStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn ready_count(&self, job_id: &str) -> Result<i64> {
        let now = Utc::now();
        let items = self.items.read().unwrap();
        Ok(items
            .values()
            .filter(|i| i.job_id == job_id && Self::is_ready(i, now))
            .count() as i64)
    }

    async fn waiting_retry_count(&self, job_id: &str) -> Result<i64> {
        let now = Utc::now();
        let items = self.items.read().unwrap();
        Ok(items
            .values()
            .filter(|i| {
                i.job_id == job_id
                    && i.status == QueueItemStatus::Pending
                    && i.next_attempt_at.map_or(false, |t| t > now)
            })
            .count() as i64)
    }

    async fn in_flight_discovery_count(&self, job_id: &str) -> Result<i64> {
        let items = self.items.read().unwrap();
        Ok(items
            .values()
            .filter(|i| {
                i.job_id == job_id
                    && i.status == QueueItemStatus::Submitted
                    && i.kind.is_discovery()
            })
            .count() as i64)
    }

    async fn jobs_with_due_retries(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let items = self.items.read().unwrap();
        let mut jobs: Vec<String> = items
            .values()
            .filter(|i| {
                i.status == QueueItemStatus::Pending
                    && i.next_attempt_at.map_or(false, |t| t <= now)
            })
            .map(|i| i.job_id.clone())
            .collect();
        jobs.sort();
        jobs.dedup();
        Ok(jobs)
    }

    async fn revive_stale_submissions(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let mut items = self.items.write().unwrap();
        let mut jobs = Vec::new();
        for item in items.values_mut() {
            if item.status == QueueItemStatus::Submitted
                && item.submitted_at.map_or(false, |t| t < cutoff)
            {
                item.status = QueueItemStatus::Pending;
                item.retry_count += 1;
                item.next_attempt_at = None;
                item.error_message = Some("stale submission revived".to_string());
                jobs.push(item.job_id.clone());
            }
        }
        jobs.sort();
        jobs.dedup();
        Ok(jobs)
    }
}

/// In-memory job repository
#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: RwLock<HashMap<String, CrawlJob>>,
    logs: RwLock<HashMap<String, Vec<JobLogEntry>>>,
}

/// Operator log entries kept per job
const MAX_JOB_LOGS: usize = 200;

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn create(&self, job: &CrawlJob) -> Result<()> {
        self.jobs
            .write()
            .unwrap()
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<CrawlJob>> {
        Ok(self.jobs.read().unwrap().get(job_id).cloned())
    }

    async fn list(&self, limit: i64) -> Result<Vec<CrawlJob>> {
        let mut jobs: Vec<CrawlJob> = self.jobs.read().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn mark_running(&self, job_id: &str) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_completed(&self, job_id: &str) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Completed;
                job.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, job_id: &str, error: &str) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.get_mut(job_id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Failed;
                job.error_message = Some(error.to_string());
                job.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.get_mut(job_id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn bump_progress(&self, job_id: &str, updates: &[(Counter, i64)]) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(job) = jobs.get_mut(job_id) {
            job.progress.apply(updates);
        }
        Ok(())
    }

    async fn append_log(&self, job_id: &str, entry: JobLogEntry) -> Result<()> {
        let mut logs = self.logs.write().unwrap();
        let entries = logs.entry(job_id.to_string()).or_default();
        entries.push(entry);
        if entries.len() > MAX_JOB_LOGS {
            let excess = entries.len() - MAX_JOB_LOGS;
            entries.drain(..excess);
        }
        Ok(())
    }

    async fn logs_since(&self, job_id: &str, since: usize) -> Result<Vec<JobLogEntry>> {
        let logs = self.logs.read().unwrap();
        Ok(logs
            .get(job_id)
            .map(|entries| entries.iter().skip(since).cloned().collect())
            .unwrap_or_default())
    }
}

/// In-memory exclusion rule repository
#[derive(Default)]
pub struct MemoryExclusionRepository {
    rules: RwLock<Vec<ExclusionRule>>,
}

impl MemoryExclusionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExclusionRepository for MemoryExclusionRepository {
    async fn list(&self) -> Result<Vec<ExclusionRule>> {
        Ok(self.rules.read().unwrap().clone())
    }

    async fn add(
        &self,
        kind: RuleKind,
        value: &str,
        reason: Option<&str>,
    ) -> Result<Option<ExclusionRule>> {
        let mut rules = self.rules.write().unwrap();

        let exists = rules
            .iter()
            .any(|r| r.kind == kind && r.value.eq_ignore_ascii_case(value));
        if exists {
            return Ok(None);
        }

        let rule = ExclusionRule {
            id: new_record_id(),
            kind,
            value: value.to_string(),
            reason: reason.map(String::from),
            created_at: Utc::now(),
        };
        rules.push(rule.clone());
        Ok(Some(rule))
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let mut rules = self.rules.write().unwrap();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        Ok(rules.len() < before)
    }
}

/// In-memory scored-product repository
#[derive(Default)]
pub struct MemoryProductRepository {
    records: RwLock<HashMap<String, ProductRecord>>,
}

impl MemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an already-persisted product id (dedup test setup)
    pub fn seed_existing(&self, product_id: &str) {
        self.records.write().unwrap().insert(
            product_id.to_string(),
            ProductRecord {
                id: product_id.to_string(),
                name: format!("seeded-{product_id}"),
                ..Default::default()
            },
        );
    }

    /// Stored records (test inspection)
    pub fn stored(&self) -> Vec<ProductRecord> {
        self.records.read().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl ProductRepository for MemoryProductRepository {
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let records = self.records.read().unwrap();
        Ok(ids
            .iter()
            .filter(|id| records.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn store(
        &self,
        _job_id: &str,
        record: &ProductRecord,
        _source_url: &str,
    ) -> Result<StoreOutcome> {
        let mut records = self.records.write().unwrap();
        if records.contains_key(&record.id) {
            return Ok(StoreOutcome::Duplicate);
        }
        records.insert(record.id.clone(), record.clone());
        Ok(StoreOutcome::Stored)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobConfig;

    fn job(id: &str) -> CrawlJob {
        CrawlJob {
            id: id.to_string(),
            status: JobStatus::Pending,
            config: JobConfig::default(),
            progress: Default::default(),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_enqueue_idempotent_on_job_url() {
        let repo = MemoryQueueRepository::new();

        let first = repo
            .enqueue("j1", "https://x/search", UrlKind::Search, Some("kw"), 1)
            .await
            .unwrap();
        assert!(first.is_queued());

        let second = repo
            .enqueue("j1", "https://x/search", UrlKind::Search, Some("kw"), 1)
            .await
            .unwrap();
        assert_eq!(second, EnqueueOutcome::Duplicate);

        // Same URL under a different job is new work
        let other_job = repo
            .enqueue("j2", "https://x/search", UrlKind::Search, Some("kw"), 1)
            .await
            .unwrap();
        assert!(other_job.is_queued());
    }

    #[tokio::test]
    async fn test_claim_prefers_lower_priority() {
        let repo = MemoryQueueRepository::new();
        repo.enqueue("j1", "https://x/p1", UrlKind::Product, None, 2)
            .await
            .unwrap();
        repo.enqueue("j1", "https://x/s1", UrlKind::Search, None, 1)
            .await
            .unwrap();

        let claimed = repo.claim_next_ready("j1", None).await.unwrap().unwrap();
        assert_eq!(claimed.priority, 1);
        assert_eq!(claimed.status, QueueItemStatus::Submitted);
        assert!(claimed.submitted_at.is_some());
    }

    #[tokio::test]
    async fn test_claim_respects_priority_cap() {
        let repo = MemoryQueueRepository::new();
        repo.enqueue("j1", "https://x/p1", UrlKind::Product, None, 2)
            .await
            .unwrap();

        assert!(repo.claim_next_ready("j1", Some(1)).await.unwrap().is_none());
        assert!(repo.claim_next_ready("j1", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_claim_skips_future_retries() {
        let repo = MemoryQueueRepository::new();
        repo.enqueue("j1", "https://x/p1", UrlKind::Product, None, 2)
            .await
            .unwrap();

        let claimed = repo.claim_next_ready("j1", None).await.unwrap().unwrap();
        let future = Utc::now() + chrono::Duration::minutes(20);
        assert!(repo
            .schedule_retry(&claimed.id, future, "503")
            .await
            .unwrap());

        // Waiting out its backoff; not claimable
        assert!(repo.claim_next_ready("j1", None).await.unwrap().is_none());
        assert_eq!(repo.waiting_retry_count("j1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_claim_drains_queue_exactly_once() {
        let repo = MemoryQueueRepository::new();
        for i in 0..10 {
            repo.enqueue("j1", &format!("https://x/p{i}"), UrlKind::Product, None, 2)
                .await
                .unwrap();
        }

        let mut seen = HashSet::new();
        while let Some(item) = repo.claim_next_ready("j1", None).await.unwrap() {
            assert!(seen.insert(item.id.clone()), "item claimed twice");
        }
        assert_eq!(seen.len(), 10);
    }

    #[tokio::test]
    async fn test_transition_guards() {
        let repo = MemoryQueueRepository::new();
        repo.enqueue("j1", "https://x/p1", UrlKind::Product, None, 2)
            .await
            .unwrap();
        let item = repo.claim_next_ready("j1", None).await.unwrap().unwrap();

        assert!(repo.mark_completed(&item.id).await.unwrap());
        // Already completed: every submitted-only transition refuses
        assert!(!repo.mark_completed(&item.id).await.unwrap());
        assert!(!repo.mark_failed(&item.id, "late").await.unwrap());
        assert!(!repo
            .schedule_retry(&item.id, Utc::now(), "late")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_counts_by_state() {
        let repo = MemoryQueueRepository::new();
        repo.enqueue("j1", "https://x/a", UrlKind::Product, None, 2)
            .await
            .unwrap();
        repo.enqueue("j1", "https://x/b", UrlKind::Product, None, 2)
            .await
            .unwrap();

        let claimed = repo.claim_next_ready("j1", None).await.unwrap().unwrap();
        repo.mark_failed(&claimed.id, "gone").await.unwrap();

        let counts = repo.count_by_state("j1").await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.submitted, 0);
        assert_eq!(counts.failed, 1);
        assert!(!counts.is_drained());
    }

    #[tokio::test]
    async fn test_revive_stale_submissions() {
        let repo = MemoryQueueRepository::new();
        repo.enqueue("j1", "https://x/a", UrlKind::Product, None, 2)
            .await
            .unwrap();
        let item = repo.claim_next_ready("j1", None).await.unwrap().unwrap();

        // Cutoff in the future makes the fresh submission "stale"
        let jobs = repo
            .revive_stale_submissions(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(jobs, vec!["j1".to_string()]);

        let revived = repo.get(&item.id).await.unwrap().unwrap();
        assert_eq!(revived.status, QueueItemStatus::Pending);
        assert_eq!(revived.retry_count, 1);
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let repo = MemoryJobRepository::new();
        repo.create(&job("j1")).await.unwrap();

        assert!(repo.mark_running("j1").await.unwrap());
        assert!(!repo.mark_running("j1").await.unwrap());

        assert!(repo.mark_completed("j1").await.unwrap());
        let done = repo.get("j1").await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.completed_at.is_some());

        // Terminal; cancellation is a no-op
        assert!(!repo.cancel("j1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_idempotent() {
        let repo = MemoryJobRepository::new();
        repo.create(&job("j1")).await.unwrap();
        repo.mark_running("j1").await.unwrap();

        assert!(repo.cancel("j1").await.unwrap());
        assert!(!repo.cancel("j1").await.unwrap());
        assert_eq!(
            repo.get("j1").await.unwrap().unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_progress_and_logs() {
        let repo = MemoryJobRepository::new();
        repo.create(&job("j1")).await.unwrap();

        repo.bump_progress("j1", &[(Counter::ProductsParsed, 2), (Counter::Errors, 1)])
            .await
            .unwrap();
        let fetched = repo.get("j1").await.unwrap().unwrap();
        assert_eq!(fetched.progress.products_parsed, 2);
        assert_eq!(fetched.progress.errors, 1);

        repo.append_log("j1", JobLogEntry::now("info", "first"))
            .await
            .unwrap();
        repo.append_log("j1", JobLogEntry::now("warn", "second"))
            .await
            .unwrap();

        let all = repo.logs_since("j1", 0).await.unwrap();
        assert_eq!(all.len(), 2);
        let tail = repo.logs_since("j1", 1).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].msg, "second");
    }

    #[tokio::test]
    async fn test_log_ring_bounded() {
        let repo = MemoryJobRepository::new();
        repo.create(&job("j1")).await.unwrap();
        for i in 0..(MAX_JOB_LOGS + 25) {
            repo.append_log("j1", JobLogEntry::now("info", format!("line {i}")))
                .await
                .unwrap();
        }
        let all = repo.logs_since("j1", 0).await.unwrap();
        assert_eq!(all.len(), MAX_JOB_LOGS);
        assert_eq!(all.last().unwrap().msg, format!("line {}", MAX_JOB_LOGS + 24));
    }

    #[tokio::test]
    async fn test_exclusion_unique_on_kind_value() {
        let repo = MemoryExclusionRepository::new();
        let added = repo
            .add(RuleKind::Country, "DE", Some("slow shipping"))
            .await
            .unwrap();
        assert!(added.is_some());

        assert!(repo.add(RuleKind::Country, "DE", None).await.unwrap().is_none());
        // Same value under another kind is distinct
        assert!(repo.add(RuleKind::Keyword, "DE", None).await.unwrap().is_some());

        let id = added.unwrap().id;
        assert!(repo.remove(&id).await.unwrap());
        assert!(!repo.remove(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_product_store_dedup() {
        let repo = MemoryProductRepository::new();
        repo.seed_existing("A");

        let existing = repo
            .existing_ids(&["A".to_string(), "B".to_string()])
            .await
            .unwrap();
        assert!(existing.contains("A"));
        assert!(!existing.contains("B"));

        let record = ProductRecord {
            id: "A".to_string(),
            name: "dup".to_string(),
            ..Default::default()
        };
        assert_eq!(
            repo.store("j1", &record, "https://x/a").await.unwrap(),
            StoreOutcome::Duplicate
        );

        let fresh = ProductRecord {
            id: "B".to_string(),
            name: "new".to_string(),
            ..Default::default()
        };
        assert_eq!(
            repo.store("j1", &fresh, "https://x/b").await.unwrap(),
            StoreOutcome::Stored
        );
    }
}
