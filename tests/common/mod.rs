//! Shared fixtures for the integration suites
//!
//! Builds the coordinator router over the in-memory repositories with the
//! fetcher and payload host pointed at a wiremock server, and provides HTML
//! fixture builders shaped like real catalog pages.
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use trawl::config::PacingConfig;
use trawl::coordinator::api::create_router;
use trawl::coordinator::AppState;
use trawl::fetcher::payload::PayloadClient;
use trawl::fetcher::FetcherClient;
use trawl::scheduler::{RetryPolicy, Scheduler};
use trawl::storage::repository::{
    ExclusionRepository, JobRepository, MemoryExclusionRepository, MemoryJobRepository,
    MemoryProductRepository, MemoryQueueRepository, ProductRepository, QueueRepository,
};
use trawl::storage::ExclusionCache;

/// Everything a test needs to drive the coordinator
pub struct TestHarness {
    pub state: AppState,
    pub queue: Arc<MemoryQueueRepository>,
    pub jobs: Arc<MemoryJobRepository>,
    pub products: Arc<MemoryProductRepository>,
    pub exclusions: Arc<MemoryExclusionRepository>,
    /// Base URL of the coordinator under test
    pub base_url: String,
}

/// Fast pacing so suites finish in milliseconds, warm-up disabled
pub fn fast_pacing() -> PacingConfig {
    PacingConfig {
        submit_delay_min_secs: 0.0,
        submit_delay_max_secs: 0.05,
        warmup_queue_depth: 0,
    }
}

/// Spawn the coordinator on an ephemeral port with fast pacing
pub async fn spawn_app(fetcher_base: &str, retry: RetryPolicy) -> TestHarness {
    spawn_app_with(fetcher_base, retry, fast_pacing()).await
}

/// Spawn the coordinator with explicit pacing configuration
pub async fn spawn_app_with(
    fetcher_base: &str,
    retry: RetryPolicy,
    pacing: PacingConfig,
) -> TestHarness {
    let queue = Arc::new(MemoryQueueRepository::new());
    let jobs = Arc::new(MemoryJobRepository::new());
    let products = Arc::new(MemoryProductRepository::new());
    let exclusions = Arc::new(MemoryExclusionRepository::new());

    let queue_dyn: Arc<dyn QueueRepository> = queue.clone();
    let jobs_dyn: Arc<dyn JobRepository> = jobs.clone();
    let products_dyn: Arc<dyn ProductRepository> = products.clone();
    let exclusions_dyn: Arc<dyn ExclusionRepository> = exclusions.clone();

    let fetcher = Arc::new(
        FetcherClient::with_base_url(fetcher_base, "http://localhost:8780")
            .expect("test fetcher client"),
    );

    let scheduler = Scheduler::new(
        queue_dyn.clone(),
        jobs_dyn.clone(),
        fetcher,
        retry,
        pacing,
    );

    let state = AppState {
        jobs: jobs_dyn,
        queue: queue_dyn,
        products: products_dyn,
        exclusions: exclusions_dyn.clone(),
        exclusion_cache: Arc::new(ExclusionCache::new(
            exclusions_dyn,
            Duration::from_secs(600),
        )),
        scheduler,
        payloads: Arc::new(PayloadClient::new(Duration::from_secs(5)).expect("payload client")),
        start_time: Instant::now(),
    };

    let router = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });

    TestHarness {
        state,
        queue,
        jobs,
        products,
        exclusions,
        base_url: format!("http://{addr}"),
    }
}

/// Poll an async condition until it holds or the timeout elapses
pub async fn wait_until<F, Fut>(timeout: Duration, check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A product detail page with the embedded data object, padded to a
/// realistic size
pub fn product_page(id: &str, name: &str, price: f64, warehouse: &str) -> String {
    format!(
        "<html><head><title>{name} | Catalog</title></head><body>\
         <script>window.productDetailData = {{\
            \"id\": \"{id}\", \"nameEn\": \"{name}\", \"sku\": \"SKU-{id}\",\
            \"sellPrice\": \"{price}\", \"weight\": \"400.00\",\
            \"warehouseCountry\": \"{warehouse}\", \"warehouseInventory\": 120,\
            \"category\": [{{\"name\": \"Garden\"}}],\
            \"promoBadge\": undefined\
         }};</script>{}</body></html>",
        "<div>filler content</div>".repeat(300)
    )
}

/// A search results page linking the given product ids
pub fn search_page(entries: &[(&str, &str)]) -> String {
    let anchors: String = entries
        .iter()
        .map(|(slug, id)| format!(r#"<a href="/product/{slug}-p-{id}.html">{slug}</a>"#))
        .collect();
    format!(
        "<html><body><div class=\"search-list\">{anchors}</div>\
         <span>{} Records</span>{}</body></html>",
        entries.len(),
        " ".repeat(6000)
    )
}

/// A search results page that reports multiple pages of results
pub fn search_page_with_pages(entries: &[(&str, &str)], total_pages: usize) -> String {
    let anchors: String = entries
        .iter()
        .map(|(slug, id)| format!(r#"<a href="/product/{slug}-p-{id}.html">{slug}</a>"#))
        .collect();
    format!(
        "<html><body><div class=\"search-list\">{anchors}</div>\
         <span>219 Records</span><span>Page 1 of {total_pages}</span>{}</body></html>",
        " ".repeat(6000)
    )
}

/// A fetcher postback payload carrying one result
pub fn postback(
    post_id: &str,
    success: bool,
    html_url: Option<&str>,
    error: Option<&str>,
) -> Value {
    json!({
        "status": "ok",
        "results": [{
            "success": success,
            "url": "https://cjdropshipping.com/original",
            "html": html_url,
            "post_id": post_id,
            "request_id": "req-1",
            "error": error,
        }]
    })
}
