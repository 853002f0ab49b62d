//! Fetcher postback ingress
//!
//! The webhook is the heart of control flow: every fetched page funnels
//! through here. The handler must acknowledge quickly, so it only resolves
//! the correlation and guards against ghosts and duplicates inline; payload
//! download and parsing run on a spawned task while the item stays
//! `submitted`.
//!
//! Ghost callbacks (unknown, cancelled, or already-finished work) are always
//! acknowledged with 200 so the fetcher never retries into a dead end.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::coordinator::progress::check_job_completion;
use crate::coordinator::server::AppState;
use crate::fetcher::{parse_postback, PostbackResult};
use crate::filter;
use crate::models::{
    Counter, CorrelationId, JobLogEntry, JobStatus, QueueItem, QueueItemStatus, UrlKind,
};
use crate::parser::{extract_product_id, parse_product_page, parse_search_page, search_url};
use crate::scheduler::KickSource;
use crate::storage::repository::StoreOutcome;
use crate::ParseError;

/// Cap on pagination pages expanded per seed search
const MAX_PAGES_PER_KEYWORD: i64 = 10;

/// Webhook acknowledgment body
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: String,
    pub message: String,
}

/// How one postback result was disposed of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Queued for processing or routed to the retry ladder
    Accepted,
    /// Unknown correlation, unknown job, or cancelled job
    Ghost,
    /// Item not in `submitted`; a duplicate delivery
    Duplicate,
}

/// `POST /api/crawl/webhook`
pub async fn handle_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let results = parse_postback(&payload);
    if results.is_empty() {
        return (
            StatusCode::OK,
            Json(WebhookAck {
                status: "ok".into(),
                message: "no results in payload".into(),
            }),
        );
    }

    let mut accepted = 0usize;
    let mut ignored = 0usize;

    for result in results {
        match ingest_result(&state, result).await {
            Ok(Disposition::Accepted) => accepted += 1,
            Ok(Disposition::Ghost) | Ok(Disposition::Duplicate) => ignored += 1,
            Err(e) => {
                // Absorbed: the fetcher must never see an error from us
                error!(error = %e, "Webhook result ingestion failed");
                ignored += 1;
            }
        }
    }

    (
        StatusCode::OK,
        Json(WebhookAck {
            status: "ok".into(),
            message: format!("accepted {accepted} result(s), ignored {ignored}"),
        }),
    )
}

/// Resolve one postback result and either hand it to the retry ladder or
/// spawn its processing task.
async fn ingest_result(
    state: &AppState,
    result: PostbackResult,
) -> anyhow::Result<Disposition> {
    let Some(correlation) = CorrelationId::parse(&result.post_id) else {
        warn!(post_id = %result.post_id, "Malformed correlation id in postback");
        return Ok(Disposition::Ghost);
    };

    let Some(item) = state.queue.get(&correlation.item_id).await? else {
        debug!(post_id = %result.post_id, "Ghost callback: queue item not found");
        return Ok(Disposition::Ghost);
    };

    if item.job_id != correlation.job_id {
        warn!(post_id = %result.post_id, "Ghost callback: job mismatch");
        return Ok(Disposition::Ghost);
    }

    let Some(job) = state.jobs.get(&item.job_id).await? else {
        debug!(job_id = %item.job_id, "Ghost callback: job not found");
        return Ok(Disposition::Ghost);
    };

    if job.status == JobStatus::Cancelled {
        // In-flight work drains here; no new submissions follow
        info!(job_id = %job.id, item_id = %item.id, "Callback for cancelled job");
        if item.status == QueueItemStatus::Submitted {
            state.queue.mark_failed(&item.id, "job cancelled").await?;
        }
        return Ok(Disposition::Ghost);
    }

    if item.status != QueueItemStatus::Submitted {
        debug!(
            item_id = %item.id,
            status = %item.status,
            "Duplicate callback; acknowledged without side effects"
        );
        return Ok(Disposition::Duplicate);
    }

    let label = item.keyword.clone().unwrap_or_else(|| item.kind.to_string());

    if !result.success || result.html_url.is_none() {
        let error_text = result.error.as_deref().unwrap_or("unknown fetch error");
        warn!(item_id = %item.id, error = %error_text, "Fetcher reported failure");
        state
            .jobs
            .append_log(
                &item.job_id,
                JobLogEntry::now("warn", format!("Failed: {label} - {error_text}")),
            )
            .await?;

        state.scheduler.handle_failure(&item, error_text, false).await?;
        state
            .scheduler
            .kick(&item.job_id, state.scheduler.pacing_delay(), kick_source(item.kind));
        return Ok(Disposition::Accepted);
    }

    state
        .jobs
        .append_log(&item.job_id, JobLogEntry::now("info", format!("Received: {label}")))
        .await?;

    // Heavy work happens off the ingress path; the item stays `submitted`
    // until the task finishes its transition.
    let html_url = result.html_url.clone().unwrap_or_default();
    let original_url = result.url.clone();
    let task_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = process_result(&task_state, &item, &html_url, &original_url).await {
            error!(item_id = %item.id, error = %e, "Result processing failed");
        }
    });

    Ok(Disposition::Accepted)
}

fn kick_source(kind: UrlKind) -> KickSource {
    if kind.is_discovery() {
        KickSource::Discovery
    } else {
        KickSource::Product
    }
}

async fn process_result(
    state: &AppState,
    item: &QueueItem,
    payload_url: &str,
    original_url: &str,
) -> anyhow::Result<()> {
    match item.kind {
        UrlKind::Search | UrlKind::Pagination => {
            process_discovery_result(state, item, payload_url).await
        }
        UrlKind::Product => process_product_result(state, item, payload_url, original_url).await,
    }
}

/// Handle a fetched search or pagination page: expand pagination for seeds,
/// dedup discovered products, and feed the queue.
async fn process_discovery_result(
    state: &AppState,
    item: &QueueItem,
    payload_url: &str,
) -> anyhow::Result<()> {
    let html = match state.payloads.download(payload_url).await {
        Ok(html) => html,
        Err(e) => {
            state.scheduler.handle_failure(item, &e.to_string(), false).await?;
            state
                .scheduler
                .kick(&item.job_id, state.scheduler.pacing_delay(), kick_source(item.kind));
            return Ok(());
        }
    };

    let results = match parse_search_page(&html) {
        Ok(results) => results,
        Err(e) => {
            state
                .scheduler
                .handle_failure(item, &e.to_string(), e.is_shape())
                .await?;
            state
                .scheduler
                .kick(&item.job_id, state.scheduler.pacing_delay(), kick_source(item.kind));
            return Ok(());
        }
    };

    let Some(job) = state.jobs.get(&item.job_id).await? else {
        return Ok(());
    };
    if job.status == JobStatus::Cancelled {
        state.queue.mark_failed(&item.id, "job cancelled").await?;
        return Ok(());
    }

    let keyword = item.keyword.clone().unwrap_or_default();

    // Children are enqueued before the item completes so the queue is never
    // momentarily drained mid-expansion; enqueue idempotency keeps duplicate
    // deliveries from producing a different child set.

    // Seed pages expand into pagination pages; pagination pages do not,
    // or every page would re-enqueue its siblings
    let mut pagination_queued = 0i64;
    if item.kind == UrlKind::Search && results.total_pages > 1 {
        let last_page = results.total_pages.min(MAX_PAGES_PER_KEYWORD);
        for page in 2..=last_page {
            let url = search_url(&keyword, page);
            let outcome = state
                .queue
                .enqueue(
                    &item.job_id,
                    &url,
                    UrlKind::Pagination,
                    item.keyword.as_deref(),
                    UrlKind::Pagination.priority(),
                )
                .await?;
            if outcome.is_queued() {
                pagination_queued += 1;
            }
        }
    }

    // Dedup discovered products against the scored store; URLs without a
    // recognizable id are kept (the detail parse will sort them out)
    let ids: Vec<String> = results
        .product_urls
        .iter()
        .filter_map(|url| extract_product_id(url))
        .collect();
    let existing = state.products.existing_ids(&ids).await?;

    let mut products_queued = 0i64;
    let mut skipped_existing = 0i64;
    for url in &results.product_urls {
        if let Some(pid) = extract_product_id(url) {
            if existing.contains(&pid) {
                skipped_existing += 1;
                continue;
            }
        }

        let outcome = state
            .queue
            .enqueue(
                &item.job_id,
                url,
                UrlKind::Product,
                item.keyword.as_deref(),
                UrlKind::Product.priority(),
            )
            .await?;
        if outcome.is_queued() {
            products_queued += 1;
        }
    }

    // The completion CAS doubles as the idempotency gate: a racing duplicate
    // delivery enqueued the same children above and stops here, so counters
    // and logs move exactly once.
    if !state.queue.mark_completed(&item.id).await? {
        debug!(item_id = %item.id, "Discovery result already finalized");
        return Ok(());
    }

    info!(
        job_id = %item.job_id,
        keyword = %keyword,
        products = results.product_urls.len(),
        total_pages = results.total_pages,
        "Parsed search results"
    );
    state
        .jobs
        .append_log(
            &item.job_id,
            JobLogEntry::now(
                "info",
                format!(
                    "Search '{keyword}': {} products found (total pages: {})",
                    results.product_urls.len(),
                    results.total_pages
                ),
            ),
        )
        .await?;

    if pagination_queued > 0 {
        state
            .jobs
            .append_log(
                &item.job_id,
                JobLogEntry::now(
                    "info",
                    format!("Queued {pagination_queued} additional pages for '{keyword}'"),
                ),
            )
            .await?;
    }
    if skipped_existing > 0 {
        state
            .jobs
            .append_log(
                &item.job_id,
                JobLogEntry::now("info", format!("Skipped {skipped_existing} existing products")),
            )
            .await?;
    }
    if products_queued > 0 {
        state
            .jobs
            .append_log(
                &item.job_id,
                JobLogEntry::now("info", format!("Queued {products_queued} products for fetching")),
            )
            .await?;
    }

    state
        .jobs
        .bump_progress(
            &item.job_id,
            &[
                (Counter::SearchUrlsCompleted, 1),
                (Counter::ProductUrlsFound, results.product_urls.len() as i64),
                (Counter::ProductUrlsSkippedExisting, skipped_existing),
            ],
        )
        .await?;

    state
        .scheduler
        .kick(&item.job_id, state.scheduler.pacing_delay(), KickSource::Discovery);

    check_job_completion(state.jobs.as_ref(), state.queue.as_ref(), &item.job_id).await?;

    Ok(())
}

/// Handle a fetched product detail page: parse, dedup, filter, store.
async fn process_product_result(
    state: &AppState,
    item: &QueueItem,
    payload_url: &str,
    original_url: &str,
) -> anyhow::Result<()> {
    let html = match state.payloads.download(payload_url).await {
        Ok(html) => html,
        Err(e) => {
            state.scheduler.handle_failure(item, &e.to_string(), false).await?;
            state
                .scheduler
                .kick(&item.job_id, state.scheduler.pacing_delay(), KickSource::Product);
            return Ok(());
        }
    };

    let record = match parse_product_page(&html) {
        Ok(record) => record,
        Err(ParseError::ProductRemoved) => {
            // Discontinued listing; terminates cleanly without an error
            debug!(item_id = %item.id, url = %original_url, "Product removed from catalog");
            if state.queue.mark_completed(&item.id).await? {
                state
                    .jobs
                    .bump_progress(&item.job_id, &[(Counter::ProductUrlsCompleted, 1)])
                    .await?;
            }
            state
                .scheduler
                .kick(&item.job_id, state.scheduler.pacing_delay(), KickSource::Product);
            check_job_completion(state.jobs.as_ref(), state.queue.as_ref(), &item.job_id)
                .await?;
            return Ok(());
        }
        Err(e) => {
            let shape = e.is_shape() || matches!(e, ParseError::Syntax(_));
            state
                .jobs
                .append_log(
                    &item.job_id,
                    JobLogEntry::now("error", format!("Parse error: {e}")),
                )
                .await?;
            state.scheduler.handle_failure(item, &e.to_string(), shape).await?;
            state
                .scheduler
                .kick(&item.job_id, state.scheduler.pacing_delay(), KickSource::Product);
            return Ok(());
        }
    };

    let Some(job) = state.jobs.get(&item.job_id).await? else {
        return Ok(());
    };
    if job.status == JobStatus::Cancelled {
        state.queue.mark_failed(&item.id, "job cancelled").await?;
        return Ok(());
    }

    // Stale dedup reads at discovery time are harmless, but the store must
    // never be asked to insert a duplicate; re-check before handing off
    let already = state
        .products
        .existing_ids(std::slice::from_ref(&record.id))
        .await?;
    if already.contains(&record.id) {
        info!(item_id = %item.id, product_id = %record.id, "Product already persisted");
        if state.queue.mark_completed(&item.id).await? {
            state
                .jobs
                .bump_progress(
                    &item.job_id,
                    &[
                        (Counter::ProductUrlsCompleted, 1),
                        (Counter::ProductUrlsSkippedExisting, 1),
                    ],
                )
                .await?;
        }
        state
            .scheduler
            .kick(&item.job_id, state.scheduler.pacing_delay(), KickSource::Product);
        check_job_completion(state.jobs.as_ref(), state.queue.as_ref(), &item.job_id).await?;
        return Ok(());
    }

    if !state.queue.mark_completed(&item.id).await? {
        debug!(item_id = %item.id, "Product result already finalized");
        return Ok(());
    }

    let rules = state.exclusion_cache.rules().await;
    match filter::evaluate(&record, &job.config, &rules) {
        Err(reason) => {
            info!(
                job_id = %item.job_id,
                product_id = %record.id,
                reason = %reason,
                "Product rejected by filters"
            );
            state
                .jobs
                .append_log(
                    &item.job_id,
                    JobLogEntry::now("warn", format!("Rejected {}: {reason}", record.name)),
                )
                .await?;
            state
                .jobs
                .bump_progress(
                    &item.job_id,
                    &[
                        (Counter::ProductUrlsCompleted, 1),
                        (Counter::ProductsParsed, 1),
                        (Counter::ProductsSkippedFiltered, 1),
                    ],
                )
                .await?;
        }
        Ok(()) => {
            let outcome = state.products.store(&item.job_id, &record, original_url).await?;
            let passed = matches!(outcome, StoreOutcome::Stored);

            info!(
                job_id = %item.job_id,
                product_id = %record.id,
                stored = passed,
                "Product handed to scoring store"
            );
            state
                .jobs
                .append_log(
                    &item.job_id,
                    JobLogEntry::now(
                        "info",
                        format!("Stored for scoring: {}", truncate(&record.name, 40)),
                    ),
                )
                .await?;

            state
                .jobs
                .bump_progress(
                    &item.job_id,
                    &[
                        (Counter::ProductUrlsCompleted, 1),
                        (Counter::ProductsParsed, 1),
                        (Counter::ProductsScored, 1),
                        (Counter::ProductsPassedScoring, if passed { 1 } else { 0 }),
                    ],
                )
                .await?;
        }
    }

    state
        .scheduler
        .kick(&item.job_id, state.scheduler.pacing_delay(), KickSource::Product);

    check_job_completion(state.jobs.as_ref(), state.queue.as_ref(), &item.job_id).await?;

    Ok(())
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let cut: String = text.chars().take(limit).collect();
        format!("{cut}...")
    }
}
