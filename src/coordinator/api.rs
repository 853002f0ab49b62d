//! REST API handlers for the coordinator
//!
//! Admin surface for starting, inspecting, and cancelling crawl jobs and for
//! managing exclusion rules, plus the fetcher webhook route.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::coordinator::progress::new_job;
use crate::coordinator::webhook::handle_webhook;
use crate::models::{
    CrawlJob, ExclusionRule, JobConfig, JobLogEntry, JobStatus, RuleKind, UrlKind,
};
use crate::parser::search_url;
use crate::scheduler::KickSource;

use super::server::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Request to start a crawl job
#[derive(Debug, Deserialize)]
pub struct StartCrawlRequest {
    pub keywords: Vec<String>,

    #[serde(default)]
    pub price_min: f64,

    #[serde(default = "default_price_max")]
    pub price_max: f64,

    #[serde(default)]
    pub include_warehouses: Vec<String>,

    #[serde(default)]
    pub exclude_warehouses: Vec<String>,

    #[serde(default)]
    pub include_categories: Vec<String>,

    #[serde(default)]
    pub exclude_categories: Vec<String>,
}

fn default_price_max() -> f64 {
    1000.0
}

/// Response for a started crawl job
#[derive(Debug, Serialize)]
pub struct StartCrawlResponse {
    pub job_id: String,
    pub status: String,
    pub message: String,
    pub search_urls_submitted: i64,
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub items: Vec<CrawlJob>,
    pub total: usize,
}

/// Query parameters for job listing
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_list_limit")]
    pub limit: i64,
}

fn default_list_limit() -> i64 {
    20
}

/// Query parameters for log tailing
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub since: usize,
}

/// Response for job logs
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub job_id: String,
    pub logs: Vec<JobLogEntry>,
}

/// Request to add an exclusion rule
#[derive(Debug, Deserialize)]
pub struct AddRuleRequest {
    pub rule_type: String,
    pub value: String,
    pub reason: Option<String>,
}

/// Response for listing exclusion rules
#[derive(Debug, Serialize)]
pub struct RuleListResponse {
    pub items: Vec<ExclusionRule>,
    pub total: usize,
}

// ============================================================================
// Router
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        // Crawl jobs
        .route("/api/crawl/start", post(start_crawl))
        .route("/api/crawl/jobs", get(list_jobs))
        .route("/api/crawl/webhook", post(handle_webhook))
        .route("/api/crawl/:job_id", get(get_job).delete(cancel_job))
        .route("/api/crawl/:job_id/logs", get(get_job_logs))
        // Exclusion rules
        .route("/api/exclusions", get(list_rules).post(add_rule))
        .route("/api/exclusions/:id", delete(remove_rule))
        .with_state(state)
}

fn internal_error(e: anyhow::Error) -> Response {
    error!(error = %e, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("internal error")),
    )
        .into_response()
}

// ============================================================================
// Health
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Crawl Jobs
// ============================================================================

/// Start a new crawl job: snapshot the config (persistent country/category
/// rules folded into the exclude lists), queue one seed search per keyword,
/// and kick the scheduler with zero delay.
async fn start_crawl(
    State(state): State<AppState>,
    Json(request): Json<StartCrawlRequest>,
) -> Response {
    let keywords: Vec<String> = request
        .keywords
        .iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();

    if keywords.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("no keywords provided")),
        )
            .into_response();
    }

    let rules = state.exclusion_cache.refresh().await;

    let mut exclude_warehouses = request.exclude_warehouses.clone();
    for country in &rules.countries {
        let upper = country.to_uppercase();
        if !exclude_warehouses.iter().any(|w| w.eq_ignore_ascii_case(&upper)) {
            exclude_warehouses.push(upper);
        }
    }

    let mut exclude_categories = request.exclude_categories.clone();
    for category in &rules.categories {
        if !exclude_categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
        {
            exclude_categories.push(category.clone());
        }
    }

    let config = JobConfig {
        keywords: keywords.clone(),
        price_min: request.price_min,
        price_max: request.price_max,
        include_warehouses: request.include_warehouses,
        exclude_warehouses,
        include_categories: request.include_categories,
        exclude_categories,
    };

    let job = new_job(config);
    let job_id = job.id.clone();

    if let Err(e) = state.jobs.create(&job).await {
        return internal_error(e);
    }

    let mut queued = 0i64;
    for keyword in &keywords {
        let url = search_url(keyword, 1);
        match state
            .queue
            .enqueue(
                &job_id,
                &url,
                UrlKind::Search,
                Some(keyword),
                UrlKind::Search.priority(),
            )
            .await
        {
            Ok(outcome) if outcome.is_queued() => queued += 1,
            Ok(_) => {}
            Err(e) => {
                // Orchestration failure: the half-seeded job must not linger
                let _ = state
                    .jobs
                    .mark_failed(&job_id, "failed to queue seed searches")
                    .await;
                return internal_error(e);
            }
        }
    }

    if let Err(e) = state
        .jobs
        .append_log(
            &job_id,
            JobLogEntry::now(
                "info",
                format!("Starting crawl for keywords: {}", keywords.join(", ")),
            ),
        )
        .await
    {
        return internal_error(e);
    }

    if let Err(e) = state.jobs.mark_running(&job_id).await {
        let _ = state
            .jobs
            .mark_failed(&job_id, "failed to start crawl job")
            .await;
        return internal_error(e);
    }

    info!(job_id = %job_id, keywords = queued, "Crawl job started");
    state
        .scheduler
        .kick(&job_id, Duration::ZERO, KickSource::JobStart);

    (
        StatusCode::OK,
        Json(StartCrawlResponse {
            job_id,
            status: JobStatus::Running.to_string(),
            message: format!("Started crawl job with {queued} search URLs queued"),
            search_urls_submitted: queued,
        }),
    )
        .into_response()
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let limit = query.limit.clamp(1, 100);
    match state.jobs.list(limit).await {
        Ok(items) => {
            let total = items.len();
            (StatusCode::OK, Json(JobListResponse { items, total })).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.jobs.get(&job_id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("crawl job not found")),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

async fn get_job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Response {
    match state.jobs.get(&job_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("crawl job not found")),
            )
                .into_response();
        }
        Err(e) => return internal_error(e),
    }

    match state.jobs.logs_since(&job_id, query.since).await {
        Ok(logs) => (StatusCode::OK, Json(LogsResponse { job_id, logs })).into_response(),
        Err(e) => internal_error(e),
    }
}

/// Cancel a job. Idempotent: cancelling an already-terminal job is a no-op
/// with the same response. In-flight fetches drain as ghost callbacks.
async fn cancel_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.jobs.get(&job_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("crawl job not found")),
            )
                .into_response();
        }
        Err(e) => return internal_error(e),
    }

    match state.jobs.cancel(&job_id).await {
        Ok(cancelled) => {
            if cancelled {
                info!(job_id = %job_id, "Crawl job cancelled");
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// Exclusion Rules
// ============================================================================

async fn list_rules(State(state): State<AppState>) -> Response {
    match state.exclusions.list().await {
        Ok(items) => {
            let total = items.len();
            (StatusCode::OK, Json(RuleListResponse { items, total })).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn add_rule(
    State(state): State<AppState>,
    Json(request): Json<AddRuleRequest>,
) -> Response {
    let Some(kind) = RuleKind::parse(&request.rule_type) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(format!(
                "invalid rule_type '{}'; expected country, category, supplier, or keyword",
                request.rule_type
            ))),
        )
            .into_response();
    };

    let value = request.value.trim();
    if value.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("rule value must not be empty")),
        )
            .into_response();
    }

    match state
        .exclusions
        .add(kind, value, request.reason.as_deref())
        .await
    {
        Ok(Some(rule)) => {
            state.exclusion_cache.invalidate().await;
            info!(kind = %kind, value = %value, "Exclusion rule added");
            (StatusCode::CREATED, Json(rule)).into_response()
        }
        Ok(None) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("rule already exists")),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

async fn remove_rule(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.exclusions.remove(&id).await {
        Ok(true) => {
            state.exclusion_cache.invalidate().await;
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("exclusion rule not found")),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}
