// Core data structures for the trawl orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generate a short, dash-free identifier.
///
/// Correlation ids are dash-delimited, so record ids must not contain dashes
/// themselves. Twelve hex chars is plenty for queue and job cardinalities.
pub fn new_record_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[..12].to_string()
}

/// Lifecycle state of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Pending,
    Submitted,
    Completed,
    Failed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "submitted" => Some(Self::Submitted),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of URL a queue item points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlKind {
    Search,
    Pagination,
    Product,
}

impl UrlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Pagination => "pagination",
            Self::Product => "product",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "search" => Some(Self::Search),
            "pagination" => Some(Self::Pagination),
            "product" => Some(Self::Product),
            _ => None,
        }
    }

    /// Priority tier: discovery pages go first so the funnel stays fed
    pub fn priority(&self) -> i32 {
        match self {
            Self::Search | Self::Pagination => 1,
            Self::Product => 2,
        }
    }

    /// Discovery pages feed the queue; product pages drain it
    pub fn is_discovery(&self) -> bool {
        matches!(self, Self::Search | Self::Pagination)
    }
}

impl std::fmt::Display for UrlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Token round-tripped through the fetcher to correlate callbacks
///
/// Rendered as `crawl-{job_id}-{kind}-{item_id}`. Job ids may themselves
/// contain dashes, so parsing anchors on the two rightmost segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId {
    pub job_id: String,
    pub kind: UrlKind,
    pub item_id: String,
}

impl CorrelationId {
    pub fn new(job_id: impl Into<String>, kind: UrlKind, item_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            item_id: item_id.into(),
        }
    }

    /// Parse a correlation id, returning None for anything malformed
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix("crawl-")?;
        let (rest, item_id) = rest.rsplit_once('-')?;
        let (job_id, kind_str) = rest.rsplit_once('-')?;
        let kind = UrlKind::parse(kind_str)?;

        if job_id.is_empty() || item_id.is_empty() {
            return None;
        }

        Some(Self {
            job_id: job_id.to_string(),
            kind,
            item_id: item_id.to_string(),
        })
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "crawl-{}-{}-{}", self.job_id, self.kind, self.item_id)
    }
}

/// Configuration snapshot attached to a crawl job
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobConfig {
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

/// Monotonic progress counters for a crawl job
///
/// Counters only ever increase while a job is alive; consumers may observe
/// transient skew between related counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobProgress {
    #[serde(default)]
    pub search_urls_submitted: i64,
    #[serde(default)]
    pub search_urls_completed: i64,
    #[serde(default)]
    pub product_urls_found: i64,
    #[serde(default)]
    pub product_urls_skipped_existing: i64,
    #[serde(default)]
    pub product_urls_submitted: i64,
    #[serde(default)]
    pub product_urls_completed: i64,
    #[serde(default)]
    pub products_parsed: i64,
    #[serde(default)]
    pub products_skipped_filtered: i64,
    #[serde(default)]
    pub products_scored: i64,
    #[serde(default)]
    pub products_passed_scoring: i64,
    #[serde(default)]
    pub errors: i64,
}

/// Named progress counter, used for increment batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    SearchUrlsSubmitted,
    SearchUrlsCompleted,
    ProductUrlsFound,
    ProductUrlsSkippedExisting,
    ProductUrlsSubmitted,
    ProductUrlsCompleted,
    ProductsParsed,
    ProductsSkippedFiltered,
    ProductsScored,
    ProductsPassedScoring,
    Errors,
}

impl JobProgress {
    /// Apply an increment batch. Negative deltas are clamped to zero since
    /// counters never decrease within a job's lifetime.
    pub fn apply(&mut self, updates: &[(Counter, i64)]) {
        for (counter, delta) in updates {
            let delta = (*delta).max(0);
            let slot = match counter {
                Counter::SearchUrlsSubmitted => &mut self.search_urls_submitted,
                Counter::SearchUrlsCompleted => &mut self.search_urls_completed,
                Counter::ProductUrlsFound => &mut self.product_urls_found,
                Counter::ProductUrlsSkippedExisting => &mut self.product_urls_skipped_existing,
                Counter::ProductUrlsSubmitted => &mut self.product_urls_submitted,
                Counter::ProductUrlsCompleted => &mut self.product_urls_completed,
                Counter::ProductsParsed => &mut self.products_parsed,
                Counter::ProductsSkippedFiltered => &mut self.products_skipped_filtered,
                Counter::ProductsScored => &mut self.products_scored,
                Counter::ProductsPassedScoring => &mut self.products_passed_scoring,
                Counter::Errors => &mut self.errors,
            };
            *slot += delta;
        }
    }
}

/// Entry in a job's operator-visible log ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub ts: DateTime<Utc>,
    pub level: String,
    pub msg: String,
}

impl JobLogEntry {
    pub fn now(level: &str, msg: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            level: level.to_string(),
            msg: msg.into(),
        }
    }
}

/// One crawl run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: String,
    pub status: JobStatus,
    pub config: JobConfig,
    pub progress: JobProgress,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One unit of crawl work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub job_id: String,
    pub url: String,
    pub kind: UrlKind,
    pub keyword: Option<String>,
    pub priority: i32,
    pub status: QueueItemStatus,
    pub retry_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Per-state counts for a job's queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: i64,
    pub submitted: i64,
    pub completed: i64,
    pub failed: i64,
}

impl QueueCounts {
    /// The queue has drained when nothing is pending or in flight
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.submitted == 0
    }
}

/// Kind of a persistent exclusion rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Country,
    Category,
    Supplier,
    Keyword,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Country => "country",
            Self::Category => "category",
            Self::Supplier => "supplier",
            Self::Keyword => "keyword",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "country" => Some(Self::Country),
            "category" => Some(Self::Category),
            "supplier" => Some(Self::Supplier),
            "keyword" => Some(Self::Keyword),
            _ => None,
        }
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persistent product exclusion rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionRule {
    pub id: String,
    pub kind: RuleKind,
    pub value: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One sellable variant of a catalog product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub sku: String,
    pub sell_price: f64,
    pub retail_price: Option<f64>,
    pub weight: Option<i64>,
    pub pack_weight: Option<i64>,
    pub variant_id: Option<String>,
}

/// Normalized product record extracted from a catalog detail page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: String,
    pub name: String,
    pub sku: Option<String>,
    pub sell_price_min: f64,
    pub sell_price_max: f64,
    pub weight_min: Option<i64>,
    pub weight_max: Option<i64>,
    pub list_count: i64,
    pub supplier_id: Option<String>,
    pub supplier_name: Option<String>,
    pub categories: Vec<String>,
    pub variants: Vec<ProductVariant>,
    pub warehouse_country: Option<String>,
    pub warehouse_inventory: Option<i64>,
    pub is_free_shipping: bool,
    pub delivery_cycle_days: Option<i64>,
    pub image_url: Option<String>,
}
