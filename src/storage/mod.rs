//! PostgreSQL persistence for jobs, queue items, rules, and products
//!
//! All durable state lives in one PostgreSQL database:
//!
//! - `crawl_jobs` - job lifecycle, config snapshot, progress, operator logs
//! - `crawl_queue` - the work queue driving the pacing scheduler
//! - `exclusion_rules` - persistent product filters
//! - `scored_products` - parsed products handed to the scoring stage; doubles
//!   as the deduplication index via its unique `source_product_id`
//!
//! Access goes through the repository traits in [`repository`], so the
//! orchestration layers never see SQL and tests can run on the in-memory
//! implementations.

pub mod exclusions;
pub mod jobs;
pub mod products;
pub mod queue;
pub mod repository;

pub use exclusions::{ExclusionCache, PostgresExclusionStore};
pub use jobs::PostgresJobStore;
pub use products::PostgresProductStore;
pub use queue::PostgresQueueStore;
pub use repository::{
    EnqueueOutcome, ExclusionRepository, JobRepository, ProductRepository, QueueRepository,
    StoreOutcome,
};

use anyhow::{Context, Result};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use crate::config::DatabaseConfig;

/// Database handle owning the connection pool
pub struct Database {
    pool: Pool,
}

impl Database {
    /// Create the connection pool.
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut cfg = PoolConfig::new();
        cfg.url = Some(config.url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Get a clone of the pool for store construction
    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    /// Create tables and indexes if they do not exist.
    pub async fn init_schema(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to acquire connection for schema init")?;

        client
            .batch_execute(SCHEMA)
            .await
            .context("Failed to initialize schema")?;

        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS crawl_jobs (
    id            TEXT PRIMARY KEY,
    status        TEXT NOT NULL DEFAULT 'pending',
    config        JSONB NOT NULL DEFAULT '{}'::jsonb,
    progress      JSONB NOT NULL DEFAULT '{}'::jsonb,
    logs          JSONB NOT NULL DEFAULT '[]'::jsonb,
    error_message TEXT,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    started_at    TIMESTAMPTZ,
    completed_at  TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS crawl_queue (
    id              TEXT PRIMARY KEY,
    job_id          TEXT NOT NULL REFERENCES crawl_jobs(id) ON DELETE CASCADE,
    url             TEXT NOT NULL,
    url_type        TEXT NOT NULL,
    keyword         TEXT,
    priority        INTEGER NOT NULL DEFAULT 2,
    status          TEXT NOT NULL DEFAULT 'pending',
    retry_count     INTEGER NOT NULL DEFAULT 0,
    next_attempt_at TIMESTAMPTZ,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    submitted_at    TIMESTAMPTZ,
    completed_at    TIMESTAMPTZ,
    error_message   TEXT,
    UNIQUE (job_id, url)
);

CREATE INDEX IF NOT EXISTS idx_crawl_queue_job_status
    ON crawl_queue (job_id, status);
CREATE INDEX IF NOT EXISTS idx_crawl_queue_ready
    ON crawl_queue (job_id, status, next_attempt_at);

CREATE TABLE IF NOT EXISTS exclusion_rules (
    id         TEXT PRIMARY KEY,
    rule_type  TEXT NOT NULL,
    value      TEXT NOT NULL,
    reason     TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (rule_type, value)
);

CREATE TABLE IF NOT EXISTS scored_products (
    id                TEXT PRIMARY KEY,
    source_product_id TEXT NOT NULL UNIQUE,
    crawl_job_id      TEXT,
    name              TEXT NOT NULL,
    source_url        TEXT,
    data              JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;
