//! Configuration management for the trawl orchestrator
//!
//! This module handles loading and validating configuration from environment
//! variables. All pacing and retry knobs are environment-driven so deployments
//! can tune stealth behavior without a rebuild.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Fetcher (browser service) configuration
    pub fetcher: FetcherConfig,

    /// Crawl pacing configuration
    pub pacing: PacingConfig,

    /// Retry configuration
    pub retry: RetryConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// HTTP server configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Browser fetcher service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// API key for the fetcher service
    pub api_key: String,

    /// Fetcher API endpoint
    pub base_url: String,

    /// Public origin where the fetcher can reach our webhook
    pub webhook_base_url: String,

    /// Submit-side timeout in seconds
    pub submit_timeout_secs: u64,

    /// Payload download timeout in seconds
    pub payload_timeout_secs: u64,
}

/// Submission pacing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Minimum delay between submissions within one job (seconds)
    pub submit_delay_min_secs: f64,

    /// Maximum delay between submissions within one job (seconds)
    pub submit_delay_max_secs: f64,

    /// Ready-queue depth required before paced product submissions begin
    pub warmup_queue_depth: usize,
}

/// Retry ladder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base delay in seconds for the first retry
    pub base_secs: u64,

    /// Maximum uniform jitter in seconds added to each retry delay
    pub jitter_secs: u64,

    /// Maximum number of retries before an item fails terminally
    pub max_retries: u32,

    /// Age in seconds after which a submitted item with no callback is revived
    pub stale_submission_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub url: String,

    /// Maximum pool size
    pub pool_size: usize,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the admin API and webhook ingress
    pub bind_address: SocketAddr,

    /// Enable permissive CORS (for the admin dashboard)
    pub enable_cors: bool,

    /// Exclusion rule cache TTL in seconds
    pub exclusion_cache_ttl_secs: u64,

    /// Sweeper interval in seconds
    pub sweep_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("FETCHER_API_KEY").unwrap_or_default();

        let base_url = std::env::var("FETCHER_BASE_URL")
            .unwrap_or_else(|_| String::from("https://engine.v2.serpwatch.io/api"));

        let webhook_base_url = std::env::var("WEBHOOK_BASE_URL")
            .unwrap_or_else(|_| String::from("http://localhost:8780"));

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| String::from("postgresql://localhost/trawl"));

        let bind_address = std::env::var("TRAWL_BIND_ADDRESS")
            .ok()
            .and_then(|v| v.parse::<SocketAddr>().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8780)));

        let log_level = std::env::var("TRAWL_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let log_format = std::env::var("TRAWL_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            fetcher: FetcherConfig {
                api_key,
                base_url,
                webhook_base_url,
                submit_timeout_secs: env_parse("FETCHER_SUBMIT_TIMEOUT", 10),
                payload_timeout_secs: env_parse("FETCHER_PAYLOAD_TIMEOUT", 30),
            },
            pacing: PacingConfig {
                submit_delay_min_secs: env_parse("SUBMIT_DELAY_MIN_SECONDS", 5.0),
                submit_delay_max_secs: env_parse("SUBMIT_DELAY_MAX_SECONDS", 15.0),
                warmup_queue_depth: env_parse("WARMUP_QUEUE_DEPTH", 15),
            },
            retry: RetryConfig {
                base_secs: env_parse("RETRY_BASE_SECONDS", 900),
                jitter_secs: env_parse("RETRY_JITTER_SECONDS", 300),
                max_retries: env_parse("MAX_RETRIES", 3),
                stale_submission_secs: env_parse("STALE_SUBMISSION_SECONDS", 7200),
            },
            database: DatabaseConfig {
                url: database_url,
                pool_size: env_parse("TRAWL_DB_POOL_SIZE", 10),
            },
            server: ServerConfig {
                bind_address,
                enable_cors: env_parse("TRAWL_ENABLE_CORS", true),
                exclusion_cache_ttl_secs: env_parse("EXCLUSION_CACHE_TTL", 60),
                sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECONDS", 60),
            },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.pacing.submit_delay_min_secs < 0.0 {
            anyhow::bail!("submit_delay_min_secs must be non-negative");
        }

        if self.pacing.submit_delay_max_secs < self.pacing.submit_delay_min_secs {
            anyhow::bail!("submit_delay_max_secs must be >= submit_delay_min_secs");
        }

        if self.retry.base_secs == 0 {
            anyhow::bail!("retry base_secs must be greater than 0");
        }

        if self.database.pool_size == 0 {
            anyhow::bail!("pool_size must be greater than 0");
        }

        if self.fetcher.webhook_base_url.is_empty() {
            anyhow::bail!("WEBHOOK_BASE_URL must be set");
        }

        Ok(())
    }

    /// Get the submit timeout as a Duration
    #[must_use]
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.fetcher.submit_timeout_secs)
    }

    /// Get the payload download timeout as a Duration
    #[must_use]
    pub fn payload_timeout(&self) -> Duration {
        Duration::from_secs(self.fetcher.payload_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetcher: FetcherConfig {
                api_key: String::new(),
                base_url: String::from("https://engine.v2.serpwatch.io/api"),
                webhook_base_url: String::from("http://localhost:8780"),
                submit_timeout_secs: 10,
                payload_timeout_secs: 30,
            },
            pacing: PacingConfig {
                submit_delay_min_secs: 5.0,
                submit_delay_max_secs: 15.0,
                warmup_queue_depth: 15,
            },
            retry: RetryConfig {
                base_secs: 900,
                jitter_secs: 300,
                max_retries: 3,
                stale_submission_secs: 7200,
            },
            database: DatabaseConfig {
                url: String::from("postgresql://localhost/trawl"),
                pool_size: 10,
            },
            server: ServerConfig {
                bind_address: SocketAddr::from(([0, 0, 0, 0], 8780)),
                enable_cors: true,
                exclusion_cache_ttl_secs: 60,
                sweep_interval_secs: 60,
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}
