//! trawl - Stealth crawl orchestrator for dropshipping catalog discovery
//!
//! trawl walks a third-party catalog's search -> pagination -> product graph
//! through a remote browser fetcher that delivers results via webhook. It
//! paces submissions to avoid anti-bot detection, retries transient failures
//! with jittered backoff, deduplicates against previously persisted products,
//! and hands normalized records to a downstream scoring stage.
//!
//! # Architecture
//!
//! - [`config`] - Environment-driven configuration
//! - [`models`] - Core data structures (jobs, queue items, product records)
//! - [`parser`] - Catalog HTML parsing and embedded-JSON recovery
//! - [`fetcher`] - Browser fetcher client and payload download
//! - [`storage`] - PostgreSQL persistence behind repository traits
//! - [`scheduler`] - Paced, priority-aware submission scheduling with retry
//! - [`coordinator`] - HTTP server: admin API, webhook ingress, job accounting
//! - [`filter`] - Product admission rules
//!
//! # Example
//!
//! ```no_run
//! use trawl::config::Config;
//! use trawl::coordinator::CoordinatorServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = CoordinatorServer::new(config).await?;
//!     server.start_with_shutdown(async { /* ctrl-c */ }).await
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod models;
pub mod parser;
pub mod scheduler;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{AppState, CoordinatorServer};
    pub use crate::error::{FetchError, ParseError, SubmitError};
    pub use crate::models::{
        CorrelationId, CrawlJob, JobConfig, JobProgress, JobStatus, ProductRecord, QueueItem,
        QueueItemStatus, UrlKind,
    };
    pub use crate::scheduler::Scheduler;
}

// Direct re-exports for convenience
pub use error::{FetchError, ParseError, SubmitError};
pub use models::{CorrelationId, CrawlJob, JobStatus, ProductRecord, QueueItem, UrlKind};
