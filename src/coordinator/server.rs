//! Coordinator server shell
//!
//! Wires storage, the fetcher client, and the pacing scheduler into a shared
//! [`AppState`], builds the axum router, and runs the background tasks
//! (sweeper, exclusion cache refresh, startup self-test).

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::fetcher::payload::PayloadClient;
use crate::fetcher::FetcherClient;
use crate::scheduler::sweeper::{spawn_sweeper, SweeperConfig};
use crate::scheduler::{RetryPolicy, Scheduler};
use crate::storage::repository::{
    ExclusionRepository, JobRepository, ProductRepository, QueueRepository,
};
use crate::storage::{
    Database, ExclusionCache, PostgresExclusionStore, PostgresJobStore, PostgresProductStore,
    PostgresQueueStore,
};

use super::api::create_router;

// ============================================================================
// App State
// ============================================================================

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// Job repository
    pub jobs: Arc<dyn JobRepository>,

    /// Crawl queue repository
    pub queue: Arc<dyn QueueRepository>,

    /// Scored-product repository (dedup index + scoring hand-off)
    pub products: Arc<dyn ProductRepository>,

    /// Exclusion rule repository
    pub exclusions: Arc<dyn ExclusionRepository>,

    /// TTL'd exclusion rule snapshot
    pub exclusion_cache: Arc<ExclusionCache>,

    /// Pacing scheduler
    pub scheduler: Scheduler,

    /// Result payload downloader
    pub payloads: Arc<PayloadClient>,

    /// Server start time
    pub start_time: Instant,
}

// ============================================================================
// Coordinator Server
// ============================================================================

/// Main coordinator server
pub struct CoordinatorServer {
    config: Config,
    state: AppState,
    fetcher: Arc<FetcherClient>,
}

impl CoordinatorServer {
    /// Create the server: connect storage, initialize the schema, build state.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let database = Database::connect(&config.database)?;
        database.init_schema().await?;
        let pool = database.pool();

        let jobs: Arc<dyn JobRepository> = Arc::new(PostgresJobStore::new(pool.clone()));
        let queue: Arc<dyn QueueRepository> = Arc::new(PostgresQueueStore::new(pool.clone()));
        let products: Arc<dyn ProductRepository> = Arc::new(PostgresProductStore::new(pool.clone()));
        let exclusions: Arc<dyn ExclusionRepository> =
            Arc::new(PostgresExclusionStore::new(pool));

        let fetcher =
            Arc::new(FetcherClient::new(&config.fetcher).context("fetcher client")?);
        let payloads = Arc::new(
            PayloadClient::new(config.payload_timeout()).context("payload client")?,
        );

        let scheduler = Scheduler::new(
            queue.clone(),
            jobs.clone(),
            fetcher.clone(),
            RetryPolicy::from_config(&config.retry),
            config.pacing.clone(),
        );

        let exclusion_cache = Arc::new(ExclusionCache::new(
            exclusions.clone(),
            Duration::from_secs(config.server.exclusion_cache_ttl_secs),
        ));

        let state = AppState {
            jobs,
            queue,
            products,
            exclusions,
            exclusion_cache,
            scheduler,
            payloads,
            start_time: Instant::now(),
        };

        Ok(Self {
            config,
            state,
            fetcher,
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes and layers
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.server.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Run the server until the shutdown signal resolves.
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let router = self.build_router();
        let addr = self.config.server.bind_address;

        self.start_background_tasks();

        info!("Starting coordinator server on {addr}");
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .context("Server error")?;

        info!("Coordinator server shutdown complete");
        Ok(())
    }

    /// Spawn the sweeper, the exclusion cache refresher, and the startup
    /// webhook self-test.
    fn start_background_tasks(&self) {
        spawn_sweeper(
            self.state.scheduler.clone(),
            self.state.queue.clone(),
            SweeperConfig {
                interval: Duration::from_secs(self.config.server.sweep_interval_secs),
                stale_after: Duration::from_secs(self.config.retry.stale_submission_secs),
            },
        );

        let cache = self.state.exclusion_cache.clone();
        let ttl = Duration::from_secs(self.config.server.exclusion_cache_ttl_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ttl);
            loop {
                ticker.tick().await;
                cache.refresh().await;
            }
        });

        // A bad WEBHOOK_BASE_URL fails silently (submissions succeed, no
        // callbacks ever arrive), so push one probe through at startup.
        let fetcher = self.fetcher.clone();
        tokio::spawn(async move {
            match fetcher.self_test().await {
                Ok(_) => info!("Fetcher self-test submission accepted"),
                Err(e) => {
                    error!(error = %e, "Fetcher self-test failed; check FETCHER_API_KEY and WEBHOOK_BASE_URL")
                }
            }
        });

        if self.config.fetcher.api_key.is_empty() {
            warn!("FETCHER_API_KEY is empty; submissions will be rejected");
        }

        info!("Background tasks started");
    }
}
