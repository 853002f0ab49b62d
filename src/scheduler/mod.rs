//! Pacing scheduler for fetcher submissions
//!
//! The webhook path produces work in bursts; this module reshapes it into a
//! stealthy, paced stream. Within a job, consecutive submissions are spaced
//! by a uniform random delay, discovery pages outrank product pages, and
//! selection inside a tier is random so the submitted URL stream never
//! mirrors insertion order.
//!
//! - [`retry`] - jittered exponential backoff ladder
//! - [`sweeper`] - crash-recovery safety net re-arming due retries
//!
//! The scheduler is edge-triggered through [`Scheduler::kick`]: state changes
//! request a wake-up and concurrent requests for the same job collapse into
//! one pending timer.

pub mod retry;
pub mod sweeper;

pub use retry::{FailureAction, RetryPolicy};

use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::PacingConfig;
use crate::coordinator::progress::check_job_completion;
use crate::fetcher::FetcherClient;
use crate::models::{Counter, CorrelationId, JobLogEntry, JobStatus, QueueItem};
use crate::storage::repository::{JobRepository, QueueRepository};

/// Priority tier of discovery (search/pagination) items
const DISCOVERY_PRIORITY: i32 = 1;

/// Delay before re-checking a queue that only holds items awaiting retry
const RETRY_PROBE_DELAY: Duration = Duration::from_secs(60);

/// What triggered a wake-up; decides whether the warm-up gate applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickSource {
    /// First submission of a freshly created job
    JobStart,
    /// A search or pagination result just expanded the queue
    Discovery,
    /// A product result finished processing
    Product,
    /// Regular pacing continuation
    Pacing,
    /// Probe for retry delays coming due
    Probe,
}

impl KickSource {
    /// Discovery-driven wake-ups skip the warm-up gate so the funnel is
    /// never stalled waiting for its own output
    fn bypasses_warmup(&self) -> bool {
        matches!(self, KickSource::JobStart | KickSource::Discovery)
    }
}

/// Paced, priority-aware submission scheduler
#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<dyn QueueRepository>,
    jobs: Arc<dyn JobRepository>,
    fetcher: Arc<FetcherClient>,
    retry: RetryPolicy,
    pacing: PacingConfig,
    /// Jobs with a wake-up already pending (kick collapsing)
    pending_kicks: Arc<Mutex<HashSet<String>>>,
    /// Jobs whose ready queue has reached the warm-up depth at least once
    warmed: Arc<Mutex<HashSet<String>>>,
}

impl Scheduler {
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        jobs: Arc<dyn JobRepository>,
        fetcher: Arc<FetcherClient>,
        retry: RetryPolicy,
        pacing: PacingConfig,
    ) -> Self {
        Self {
            queue,
            jobs,
            fetcher,
            retry,
            pacing,
            pending_kicks: Arc::new(Mutex::new(HashSet::new())),
            warmed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Draw a pacing delay, uniform over the configured window
    pub fn pacing_delay(&self) -> Duration {
        let min = self.pacing.submit_delay_min_secs;
        let max = self.pacing.submit_delay_max_secs;
        if max <= min {
            return Duration::from_secs_f64(min.max(0.0));
        }
        let secs = rand::thread_rng().gen_range(min..max);
        Duration::from_secs_f64(secs)
    }

    /// Request a wake-up for a job after `delay`.
    ///
    /// Edge-triggered and idempotent: while a wake-up is pending for the job,
    /// further kicks are collapsed into it.
    pub fn kick(&self, job_id: &str, delay: Duration, source: KickSource) {
        {
            let mut pending = self.pending_kicks.lock().expect("kick set lock");
            if !pending.insert(job_id.to_string()) {
                debug!(job_id = %job_id, "Kick collapsed into pending wake-up");
                return;
            }
        }

        let scheduler = self.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            scheduler
                .pending_kicks
                .lock()
                .expect("kick set lock")
                .remove(&job_id);

            if let Err(e) = scheduler.run_pass(&job_id, source).await {
                error!(job_id = %job_id, error = %e, "Submission pass failed");
            }
        });
    }

    /// Whether a wake-up is currently pending for the job (test support)
    pub fn has_pending_kick(&self, job_id: &str) -> bool {
        self.pending_kicks
            .lock()
            .expect("kick set lock")
            .contains(job_id)
    }

    fn is_warmed(&self, job_id: &str) -> bool {
        self.warmed.lock().expect("warm set lock").contains(job_id)
    }

    fn mark_warmed(&self, job_id: &str) {
        self.warmed
            .lock()
            .expect("warm set lock")
            .insert(job_id.to_string());
    }

    /// Priority cap for the next claim, per the warm-up gate.
    ///
    /// Until a job's ready queue has once reached the warm-up depth, wake-ups
    /// that are not discovery-driven only submit discovery-tier items, so
    /// shuffling has entropy to work with once products start flowing.
    async fn gate_cap(&self, job_id: &str, source: KickSource) -> Result<Option<i32>> {
        if self.is_warmed(job_id) {
            return Ok(None);
        }

        let ready = self.queue.ready_count(job_id).await?;
        if ready >= self.pacing.warmup_queue_depth as i64 {
            self.mark_warmed(job_id);
            return Ok(None);
        }

        if source.bypasses_warmup() {
            return Ok(None);
        }

        Ok(Some(DISCOVERY_PRIORITY))
    }

    /// One submission pass: claim a ready item, submit it, keep the chain
    /// alive. Runs at most one fetcher submission per wake-up.
    async fn run_pass(&self, job_id: &str, source: KickSource) -> Result<()> {
        let Some(job) = self.jobs.get(job_id).await? else {
            debug!(job_id = %job_id, "Wake-up for unknown job");
            return Ok(());
        };

        if job.status != JobStatus::Running {
            debug!(job_id = %job_id, status = %job.status, "Job not running, pass skipped");
            return Ok(());
        }

        let cap = self.gate_cap(job_id, source).await?;
        let mut claimed = self.queue.claim_next_ready(job_id, cap).await?;

        if claimed.is_none() && cap.is_some() {
            // The gate held back product work. With no discovery in flight
            // the queue cannot grow further, so the gate opens.
            if self.queue.in_flight_discovery_count(job_id).await? == 0 {
                self.mark_warmed(job_id);
                claimed = self.queue.claim_next_ready(job_id, None).await?;
            }
        }

        let Some(item) = claimed else {
            if self.queue.waiting_retry_count(job_id).await? > 0 {
                self.kick(job_id, RETRY_PROBE_DELAY, KickSource::Probe);
            } else {
                check_job_completion(self.jobs.as_ref(), self.queue.as_ref(), job_id).await?;
            }
            return Ok(());
        };

        self.submit_item(&item).await?;

        let ready = self.queue.ready_count(job_id).await?;
        if ready > 0 {
            self.kick(job_id, self.pacing_delay(), KickSource::Pacing);
        } else if self.queue.waiting_retry_count(job_id).await? > 0 {
            self.kick(job_id, RETRY_PROBE_DELAY, KickSource::Probe);
        } else {
            check_job_completion(self.jobs.as_ref(), self.queue.as_ref(), job_id).await?;
        }

        Ok(())
    }

    async fn submit_item(&self, item: &QueueItem) -> Result<()> {
        let correlation = CorrelationId::new(&item.job_id, item.kind, &item.id);

        match self.fetcher.submit(&item.url, &correlation).await {
            Ok(_) => {
                // Submitted counters track first submissions only; retries
                // would otherwise inflate them past their completed pairs
                if item.retry_count == 0 {
                    let counter = if item.kind.is_discovery() {
                        Counter::SearchUrlsSubmitted
                    } else {
                        Counter::ProductUrlsSubmitted
                    };
                    self.jobs.bump_progress(&item.job_id, &[(counter, 1)]).await?;
                }

                let label = item
                    .keyword
                    .clone()
                    .unwrap_or_else(|| item.kind.to_string());
                info!(
                    job_id = %item.job_id,
                    item_id = %item.id,
                    kind = %item.kind,
                    "Submitted URL to fetcher"
                );
                self.jobs
                    .append_log(
                        &item.job_id,
                        JobLogEntry::now("info", format!("Submitted {}: {label}", item.kind)),
                    )
                    .await?;
            }
            Err(e) => {
                warn!(
                    job_id = %item.job_id,
                    item_id = %item.id,
                    error = %e,
                    "Fetcher submission failed"
                );
                self.handle_failure(item, &e.to_string(), false).await?;
            }
        }

        Ok(())
    }

    /// Route a failed item through the retry ladder.
    ///
    /// `shape_error` marks parse failures of the Shape/Syntax family; when
    /// such an item exhausts its retries the catalog has likely changed
    /// layout, which is surfaced as a distinct operator diagnostic.
    pub async fn handle_failure(
        &self,
        item: &QueueItem,
        error_text: &str,
        shape_error: bool,
    ) -> Result<()> {
        self.jobs
            .bump_progress(&item.job_id, &[(Counter::Errors, 1)])
            .await?;

        match self.retry.on_failure(item.retry_count, Utc::now()) {
            FailureAction::Retry {
                attempt,
                next_attempt_at,
            } => {
                self.queue
                    .schedule_retry(&item.id, next_attempt_at, error_text)
                    .await?;

                let minutes = (next_attempt_at - Utc::now()).num_seconds() as f64 / 60.0;
                info!(
                    job_id = %item.job_id,
                    item_id = %item.id,
                    attempt = attempt,
                    minutes = format!("{minutes:.1}"),
                    "Scheduled retry"
                );
                self.jobs
                    .append_log(
                        &item.job_id,
                        JobLogEntry::now(
                            "warn",
                            format!(
                                "Retry {attempt}/{} for {} in {minutes:.0} min: {error_text}",
                                self.retry.max_retries(),
                                item.kind
                            ),
                        ),
                    )
                    .await?;
            }
            FailureAction::GiveUp => {
                self.queue.mark_failed(&item.id, error_text).await?;

                warn!(
                    job_id = %item.job_id,
                    item_id = %item.id,
                    retries = item.retry_count,
                    "Item failed terminally"
                );
                self.jobs
                    .append_log(
                        &item.job_id,
                        JobLogEntry::now(
                            "error",
                            format!(
                                "Gave up on {} after {} retries: {error_text}",
                                item.kind, item.retry_count
                            ),
                        ),
                    )
                    .await?;

                if shape_error {
                    error!(
                        job_id = %item.job_id,
                        url = %item.url,
                        "Page shape unrecognized across all retries; catalog layout may have changed"
                    );
                    self.jobs
                        .append_log(
                            &item.job_id,
                            JobLogEntry::now(
                                "error",
                                "Page shape unrecognized across all retries; catalog layout may have changed",
                            ),
                        )
                        .await?;
                }

                check_job_completion(self.jobs.as_ref(), self.queue.as_ref(), &item.job_id)
                    .await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::{MemoryJobRepository, MemoryQueueRepository};

    fn scheduler() -> Scheduler {
        let fetcher =
            FetcherClient::with_base_url("http://127.0.0.1:9", "http://localhost:8780").unwrap();
        Scheduler::new(
            Arc::new(MemoryQueueRepository::new()),
            Arc::new(MemoryJobRepository::new()),
            Arc::new(fetcher),
            RetryPolicy::new(900, 300, 3),
            PacingConfig {
                submit_delay_min_secs: 5.0,
                submit_delay_max_secs: 15.0,
                warmup_queue_depth: 15,
            },
        )
    }

    #[test]
    fn test_pacing_delay_bounds() {
        let scheduler = scheduler();
        for _ in 0..200 {
            let delay = scheduler.pacing_delay().as_secs_f64();
            assert!((5.0..15.0).contains(&delay), "delay {delay} out of window");
        }
    }

    #[test]
    fn test_pacing_delay_degenerate_window() {
        let mut s = scheduler();
        s.pacing.submit_delay_min_secs = 7.0;
        s.pacing.submit_delay_max_secs = 7.0;
        assert_eq!(s.pacing_delay(), Duration::from_secs_f64(7.0));
    }

    #[tokio::test]
    async fn test_kick_collapses() {
        let scheduler = scheduler();

        scheduler.kick("j1", Duration::from_secs(30), KickSource::Pacing);
        assert!(scheduler.has_pending_kick("j1"));

        // Second kick while one is pending is absorbed
        scheduler.kick("j1", Duration::from_secs(30), KickSource::Pacing);
        assert!(scheduler.has_pending_kick("j1"));

        // A different job gets its own wake-up
        scheduler.kick("j2", Duration::from_secs(30), KickSource::Pacing);
        assert!(scheduler.has_pending_kick("j2"));
    }

    #[tokio::test]
    async fn test_gate_cap_logic() {
        let scheduler = scheduler();
        let queue = &scheduler.queue;

        // Cold job, few ready items: non-discovery wake-ups are capped
        for i in 0..3 {
            queue
                .enqueue(
                    "j1",
                    &format!("https://x/p{i}"),
                    crate::models::UrlKind::Product,
                    None,
                    2,
                )
                .await
                .unwrap();
        }

        assert_eq!(
            scheduler.gate_cap("j1", KickSource::Pacing).await.unwrap(),
            Some(DISCOVERY_PRIORITY)
        );
        assert_eq!(
            scheduler.gate_cap("j1", KickSource::Discovery).await.unwrap(),
            None
        );
        assert_eq!(
            scheduler.gate_cap("j1", KickSource::JobStart).await.unwrap(),
            None
        );

        // Depth reached: the job warms permanently
        for i in 3..20 {
            queue
                .enqueue(
                    "j1",
                    &format!("https://x/p{i}"),
                    crate::models::UrlKind::Product,
                    None,
                    2,
                )
                .await
                .unwrap();
        }
        assert_eq!(
            scheduler.gate_cap("j1", KickSource::Pacing).await.unwrap(),
            None
        );
        assert!(scheduler.is_warmed("j1"));

        // Stays warmed even if the queue drains below the depth afterwards
        while queue.claim_next_ready("j1", None).await.unwrap().is_some() {}
        assert_eq!(
            scheduler.gate_cap("j1", KickSource::Pacing).await.unwrap(),
            None
        );
    }
}
