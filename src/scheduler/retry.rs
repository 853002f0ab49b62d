//! Retry ladder with jittered exponential backoff
//!
//! Failed items cool down for `base * 2^(attempt-1)` seconds plus uniform
//! jitter before re-entering the queue. The long base doubles as the cooldown
//! after an anti-bot block. An item that has already used all its retries
//! fails terminally without touching its retry count, so `retry_count` never
//! exceeds the configured maximum.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;

use crate::config::RetryConfig;

/// What to do with a failed queue item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureAction {
    /// Schedule another attempt at the given time
    Retry {
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Retries exhausted; fail terminally
    GiveUp,
}

/// Retry policy parameters
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_secs: u64,
    jitter_secs: u64,
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(base_secs: u64, jitter_secs: u64, max_retries: u32) -> Self {
        Self {
            base_secs,
            jitter_secs,
            max_retries,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.base_secs, config.jitter_secs, config.max_retries)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide the fate of an item whose submission or parse just failed.
    ///
    /// `retry_count` is the item's current count, before this failure.
    pub fn on_failure(&self, retry_count: i32, now: DateTime<Utc>) -> FailureAction {
        if retry_count >= self.max_retries as i32 {
            return FailureAction::GiveUp;
        }

        let attempt = (retry_count + 1) as u32;
        let delay_secs = self.delay_secs(attempt);

        FailureAction::Retry {
            attempt,
            next_attempt_at: now + ChronoDuration::seconds(delay_secs as i64),
        }
    }

    /// Backoff in seconds for the given attempt (1-based), jitter included
    fn delay_secs(&self, attempt: u32) -> u64 {
        let exponential = self.base_secs.saturating_mul(1_u64 << (attempt - 1).min(16));
        exponential + self.jitter()
    }

    fn jitter(&self) -> u64 {
        if self.jitter_secs == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..=self.jitter_secs)
    }

    /// Inclusive bounds for the delay of a given attempt, jitter included
    pub fn delay_bounds(&self, attempt: u32) -> (u64, u64) {
        let exponential = self.base_secs.saturating_mul(1_u64 << (attempt - 1).min(16));
        (exponential, exponential + self.jitter_secs)
    }
}
