//! Integration tests for the pacing scheduler
//!
//! Drives the scheduler against the in-memory queue with the fetcher pointed
//! at a wiremock server, covering priority ordering, shuffle, the warm-up
//! gate, the retry path for submit failures, and the pacing distribution.

mod common;

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trawl::config::PacingConfig;
use trawl::coordinator::progress::new_job;
use trawl::fetcher::FetcherClient;
use trawl::models::{JobConfig, QueueItemStatus, UrlKind};
use trawl::scheduler::{KickSource, RetryPolicy, Scheduler};
use trawl::storage::repository::{
    JobRepository as _, MemoryJobRepository, MemoryQueueRepository, QueueRepository as _,
};

async fn accepting_fetcher() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/browser"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"request_id": "req-1"})),
        )
        .mount(&server)
        .await;
    server
}

/// Create a running job and return its id
async fn running_job(harness: &common::TestHarness) -> String {
    let job = new_job(JobConfig {
        keywords: vec!["garden tools".into()],
        ..Default::default()
    });
    let id = job.id.clone();
    harness.jobs.create(&job).await.unwrap();
    harness.jobs.mark_running(&id).await.unwrap();
    id
}

/// post_ids of submissions received by the fetcher mock, in arrival order
async fn submitted_post_ids(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|req| {
            serde_json::from_slice::<serde_json::Value>(&req.body)
                .ok()
                .and_then(|v| v["post_id"].as_str().map(String::from))
        })
        .collect()
}

#[tokio::test]
async fn test_discovery_tier_submits_before_products() {
    let fetcher = accepting_fetcher().await;
    let harness = common::spawn_app(&fetcher.uri(), RetryPolicy::new(900, 300, 3)).await;
    let job_id = running_job(&harness).await;

    for i in 0..8 {
        harness
            .queue
            .enqueue(
                &job_id,
                &format!("https://cjdropshipping.com/product/item-p-{i}.html"),
                UrlKind::Product,
                Some("garden tools"),
                2,
            )
            .await
            .unwrap();
    }
    for page in 2..=3 {
        harness
            .queue
            .enqueue(
                &job_id,
                &format!("https://cjdropshipping.com/search/garden+tools.html?pageNum={page}"),
                UrlKind::Pagination,
                Some("garden tools"),
                1,
            )
            .await
            .unwrap();
    }

    harness
        .state
        .scheduler
        .kick(&job_id, Duration::ZERO, KickSource::JobStart);

    let all_submitted = common::wait_until(Duration::from_secs(10), || async {
        harness
            .queue
            .items_for_job(&job_id)
            .iter()
            .all(|i| i.status == QueueItemStatus::Submitted)
    })
    .await;
    assert!(all_submitted, "queue never drained");

    let order = submitted_post_ids(&fetcher).await;
    assert_eq!(order.len(), 10);

    let last_pagination = order
        .iter()
        .rposition(|p| p.contains("-pagination-"))
        .expect("pagination submitted");
    let first_product = order
        .iter()
        .position(|p| p.contains("-product-"))
        .expect("products submitted");
    assert!(
        last_pagination < first_product,
        "pagination must submit before products: {order:?}"
    );
}

#[tokio::test]
async fn test_submission_order_is_shuffled() {
    let fetcher = accepting_fetcher().await;
    let harness = common::spawn_app(&fetcher.uri(), RetryPolicy::new(900, 300, 3)).await;
    let job_id = running_job(&harness).await;

    let mut insertion_order = Vec::new();
    for i in 0..15 {
        let url = format!("https://cjdropshipping.com/product/item-p-{i:03}.html");
        harness
            .queue
            .enqueue(&job_id, &url, UrlKind::Product, None, 2)
            .await
            .unwrap();
        insertion_order.push(url);
    }

    harness
        .state
        .scheduler
        .kick(&job_id, Duration::ZERO, KickSource::JobStart);

    assert!(
        common::wait_until(Duration::from_secs(10), || async {
            harness
                .queue
                .items_for_job(&job_id)
                .iter()
                .all(|i| i.status == QueueItemStatus::Submitted)
        })
        .await
    );

    let submitted: Vec<String> = fetcher
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|req| {
            serde_json::from_slice::<serde_json::Value>(&req.body)
                .ok()
                .and_then(|v| v["url"].as_str().map(String::from))
        })
        .collect();

    assert_eq!(submitted.len(), insertion_order.len());
    // With 15 items the odds of random selection reproducing insertion
    // order are negligible
    assert_ne!(submitted, insertion_order, "submission order not shuffled");
}

#[tokio::test]
async fn test_warmup_gate_holds_products_while_discovery_in_flight() {
    let fetcher = accepting_fetcher().await;
    let pacing = PacingConfig {
        submit_delay_min_secs: 0.0,
        submit_delay_max_secs: 0.05,
        warmup_queue_depth: 5,
    };
    let harness =
        common::spawn_app_with(&fetcher.uri(), RetryPolicy::new(900, 300, 3), pacing).await;
    let job_id = running_job(&harness).await;

    harness
        .queue
        .enqueue(
            &job_id,
            "https://cjdropshipping.com/search/garden+tools.html",
            UrlKind::Search,
            Some("garden tools"),
            1,
        )
        .await
        .unwrap();
    for i in 0..3 {
        harness
            .queue
            .enqueue(
                &job_id,
                &format!("https://cjdropshipping.com/product/item-p-{i}.html"),
                UrlKind::Product,
                None,
                2,
            )
            .await
            .unwrap();
    }

    harness
        .state
        .scheduler
        .kick(&job_id, Duration::ZERO, KickSource::JobStart);

    // The seed search submits...
    assert!(
        common::wait_until(Duration::from_secs(5), || async {
            harness
                .queue
                .items_for_job(&job_id)
                .iter()
                .any(|i| i.kind == UrlKind::Search && i.status == QueueItemStatus::Submitted)
        })
        .await
    );

    // ...but products stay pending while the search result is outstanding
    tokio::time::sleep(Duration::from_millis(300)).await;
    let held = harness
        .queue
        .items_for_job(&job_id)
        .iter()
        .filter(|i| i.kind == UrlKind::Product)
        .all(|i| i.status == QueueItemStatus::Pending);
    assert!(held, "products submitted while warm-up gate should hold");

    // Once the search completes, a discovery kick opens the flow
    let search_item = harness
        .queue
        .items_for_job(&job_id)
        .into_iter()
        .find(|i| i.kind == UrlKind::Search)
        .unwrap();
    harness.queue.mark_completed(&search_item.id).await.unwrap();
    harness
        .state
        .scheduler
        .kick(&job_id, Duration::ZERO, KickSource::Discovery);

    assert!(
        common::wait_until(Duration::from_secs(10), || async {
            harness
                .queue
                .items_for_job(&job_id)
                .iter()
                .filter(|i| i.kind == UrlKind::Product)
                .all(|i| i.status == QueueItemStatus::Submitted)
        })
        .await,
        "products never flowed after discovery completed"
    );
}

#[tokio::test]
async fn test_submit_failure_enters_retry_ladder() {
    let fetcher = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/browser"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&fetcher)
        .await;

    let harness = common::spawn_app(&fetcher.uri(), RetryPolicy::new(900, 300, 3)).await;
    let job_id = running_job(&harness).await;

    harness
        .queue
        .enqueue(
            &job_id,
            "https://cjdropshipping.com/product/item-p-1.html",
            UrlKind::Product,
            None,
            2,
        )
        .await
        .unwrap();

    harness
        .state
        .scheduler
        .kick(&job_id, Duration::ZERO, KickSource::JobStart);

    assert!(
        common::wait_until(Duration::from_secs(5), || async {
            harness
                .queue
                .items_for_job(&job_id)
                .iter()
                .any(|i| i.retry_count == 1 && i.status == QueueItemStatus::Pending)
        })
        .await,
        "submit failure did not schedule a retry"
    );

    let item = &harness.queue.items_for_job(&job_id)[0];
    let delay = (item.next_attempt_at.unwrap() - chrono::Utc::now()).num_seconds();
    // First rung of the ladder: 15-20 minutes out
    assert!(
        (850..=1200).contains(&delay),
        "retry delay {delay}s outside the first rung"
    );

    let job = harness.jobs.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.progress.errors, 1);
}

#[tokio::test]
async fn test_cancelled_job_gets_no_submissions() {
    let fetcher = accepting_fetcher().await;
    let harness = common::spawn_app(&fetcher.uri(), RetryPolicy::new(900, 300, 3)).await;
    let job_id = running_job(&harness).await;

    harness
        .queue
        .enqueue(
            &job_id,
            "https://cjdropshipping.com/product/item-p-1.html",
            UrlKind::Product,
            None,
            2,
        )
        .await
        .unwrap();

    harness.jobs.cancel(&job_id).await.unwrap();
    harness
        .state
        .scheduler
        .kick(&job_id, Duration::ZERO, KickSource::JobStart);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(submitted_post_ids(&fetcher).await.is_empty());
    assert!(harness
        .queue
        .items_for_job(&job_id)
        .iter()
        .all(|i| i.status == QueueItemStatus::Pending));
}

#[test]
fn test_pacing_delay_distribution() {
    let fetcher = FetcherClient::with_base_url("http://127.0.0.1:9", "http://localhost:8780")
        .expect("client");
    let scheduler = Scheduler::new(
        Arc::new(MemoryQueueRepository::new()),
        Arc::new(MemoryJobRepository::new()),
        Arc::new(fetcher),
        RetryPolicy::new(900, 300, 3),
        PacingConfig {
            submit_delay_min_secs: 5.0,
            submit_delay_max_secs: 15.0,
            warmup_queue_depth: 15,
        },
    );

    let samples: Vec<f64> = (0..2000)
        .map(|_| scheduler.pacing_delay().as_secs_f64())
        .collect();

    let min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = samples.iter().cloned().fold(0.0_f64, f64::max);
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;

    assert!(min >= 5.0, "sample below window: {min}");
    assert!(max < 15.0, "sample above window: {max}");
    // Uniform over [5, 15): the sample mean converges on 10
    assert!((9.5..10.5).contains(&mean), "mean {mean} off-center");
}
