//! Background sweeper: crash-recovery safety net for the queue
//!
//! Retry wake-ups live in memory, so a process restart (or a lost timer)
//! would strand pending items whose `next_attempt_at` has elapsed. The
//! sweeper periodically re-arms those jobs, and revives `submitted` items
//! whose callbacks never arrived within the staleness window.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::scheduler::{KickSource, Scheduler};
use crate::storage::repository::QueueRepository;

/// Sweeper parameters
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often the sweep runs
    pub interval: Duration,

    /// Age after which a submitted item with no callback is revived
    pub stale_after: Duration,
}

/// Spawn the sweeper loop. The returned handle can be aborted at shutdown.
pub fn spawn_sweeper(
    scheduler: Scheduler,
    queue: Arc<dyn QueueRepository>,
    config: SweeperConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        // The first tick fires immediately, which doubles as startup recovery
        loop {
            ticker.tick().await;
            sweep_once(&scheduler, queue.as_ref(), &config).await;
        }
    })
}

/// One sweep: kick jobs with due retries, revive stale submissions.
pub async fn sweep_once(
    scheduler: &Scheduler,
    queue: &dyn QueueRepository,
    config: &SweeperConfig,
) {
    let now = Utc::now();

    match queue.jobs_with_due_retries(now).await {
        Ok(jobs) => {
            for job_id in jobs {
                scheduler.kick(&job_id, Duration::ZERO, KickSource::Probe);
            }
        }
        Err(e) => warn!(error = %e, "Sweep: due-retry scan failed"),
    }

    let cutoff = now - ChronoDuration::seconds(config.stale_after.as_secs() as i64);
    match queue.revive_stale_submissions(cutoff).await {
        Ok(jobs) => {
            if !jobs.is_empty() {
                info!(jobs = jobs.len(), "Sweep: revived stale submissions");
            }
            for job_id in jobs {
                scheduler.kick(&job_id, Duration::ZERO, KickSource::Probe);
            }
        }
        Err(e) => warn!(error = %e, "Sweep: stale-submission revival failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PacingConfig;
    use crate::fetcher::FetcherClient;
    use crate::models::{QueueItemStatus, UrlKind};
    use crate::scheduler::RetryPolicy;
    use crate::storage::repository::{MemoryJobRepository, MemoryQueueRepository};

    #[tokio::test]
    async fn test_sweep_revives_stale_submissions() {
        let queue = Arc::new(MemoryQueueRepository::new());
        let fetcher =
            FetcherClient::with_base_url("http://127.0.0.1:9", "http://localhost:8780").unwrap();
        let scheduler = Scheduler::new(
            queue.clone(),
            Arc::new(MemoryJobRepository::new()),
            Arc::new(fetcher),
            RetryPolicy::new(900, 300, 3),
            PacingConfig {
                submit_delay_min_secs: 5.0,
                submit_delay_max_secs: 15.0,
                warmup_queue_depth: 15,
            },
        );

        queue
            .enqueue("j1", "https://x/p", UrlKind::Product, None, 2)
            .await
            .unwrap();
        let item = queue.claim_next_ready("j1", None).await.unwrap().unwrap();

        // Zero staleness window makes the fresh submission eligible
        let config = SweeperConfig {
            interval: Duration::from_secs(60),
            stale_after: Duration::ZERO,
        };
        sweep_once(&scheduler, queue.as_ref(), &config).await;

        let revived = queue.get(&item.id).await.unwrap().unwrap();
        assert_eq!(revived.status, QueueItemStatus::Pending);
        assert_eq!(revived.retry_count, 1);
        assert!(revived.next_attempt_at.is_none());
    }
}
