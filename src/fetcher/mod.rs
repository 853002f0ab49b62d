//! Client for the remote browser fetcher service
//!
//! The fetcher renders catalog pages in a real browser and delivers results
//! asynchronously: we submit a URL together with a correlation id and our
//! webhook address, and the result arrives later as a postback. This module
//! owns the submit side and the postback payload shapes; downloading the
//! stored result payload lives in [`payload`].
//!
//! The client never retries on its own. A failed submit is surfaced to the
//! scheduler, which owns the retry ladder.

pub mod payload;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::FetcherConfig;
use crate::error::SubmitError;
use crate::models::CorrelationId;

/// Device profile requested from the browser service
const DEVICE: &str = "desktop";

/// Submission acknowledged by the fetcher
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReceipt {
    /// Fetcher-side request id, when the service reports one
    pub request_id: Option<String>,
}

/// One result inside a fetcher postback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostbackResult {
    #[serde(default)]
    pub success: bool,

    /// The originally submitted URL
    #[serde(default)]
    pub url: String,

    /// URL of the stored result payload
    #[serde(rename = "html")]
    pub html_url: Option<String>,

    /// Our correlation id, round-tripped
    #[serde(default)]
    pub post_id: String,

    pub request_id: Option<String>,

    pub error: Option<String>,
}

/// Parse a postback body into its result list.
///
/// The fetcher normally posts `{"status": "...", "results": [...]}` but older
/// engine versions post a single bare result object; both shapes are accepted.
pub fn parse_postback(payload: &Value) -> Vec<PostbackResult> {
    if let Some(results) = payload.get("results").and_then(Value::as_array) {
        return results
            .iter()
            .filter_map(|r| serde_json::from_value(r.clone()).ok())
            .collect();
    }

    if payload.get("success").is_some() {
        if let Ok(single) = serde_json::from_value::<PostbackResult>(payload.clone()) {
            return vec![single];
        }
    }

    Vec::new()
}

/// HTTP client for the browser fetcher API
pub struct FetcherClient {
    client: Client,
    api_key: String,
    base_url: String,
    postback_url: String,
}

impl FetcherClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `SubmitError::Http` if the underlying HTTP client cannot be
    /// built, or `SubmitError::InvalidUrl` for an unusable webhook origin.
    pub fn new(config: &FetcherConfig) -> Result<Self, SubmitError> {
        let webhook_base = config.webhook_base_url.trim_end_matches('/');
        if url::Url::parse(webhook_base).is_err() {
            return Err(SubmitError::InvalidUrl(config.webhook_base_url.clone()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.submit_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            postback_url: format!("{webhook_base}/api/crawl/webhook"),
        })
    }

    /// Create a client aimed at a mock server, for tests
    pub fn with_base_url(base_url: &str, webhook_base_url: &str) -> Result<Self, SubmitError> {
        Self::new(&FetcherConfig {
            api_key: String::from("test-key"),
            base_url: base_url.to_string(),
            webhook_base_url: webhook_base_url.to_string(),
            submit_timeout_secs: 10,
            payload_timeout_secs: 30,
        })
    }

    /// The postback URL handed to the fetcher with every submission
    pub fn postback_url(&self) -> &str {
        &self.postback_url
    }

    /// Submit a URL for browser fetching.
    ///
    /// # Errors
    ///
    /// `SubmitError::Api` for 4xx/5xx responses, `SubmitError::Timeout` for
    /// submit-side timeouts, `SubmitError::Http` for transport failures.
    pub async fn submit(
        &self,
        target_url: &str,
        correlation: &CorrelationId,
    ) -> Result<SubmitReceipt, SubmitError> {
        let body = serde_json::json!({
            "url": target_url,
            "device": DEVICE,
            "postback_url": self.postback_url,
            "post_id": correlation.to_string(),
        });

        info!(url = %target_url, post_id = %correlation, "Submitting URL to fetcher");

        let response = self
            .client
            .post(format!("{}/v2/browser", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SubmitError::Timeout
                } else {
                    SubmitError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SubmitError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let value: Value = response.json().await.map_err(SubmitError::Http)?;
        let request_id = value
            .get("request_id")
            .or_else(|| value.get("id"))
            .and_then(Value::as_str)
            .map(String::from);

        debug!(request_id = ?request_id, "Fetcher accepted submission");

        Ok(SubmitReceipt { request_id })
    }

    /// Startup self-test: push one trivial request through the fetcher.
    ///
    /// A misconfigured `WEBHOOK_BASE_URL` fails silently in normal operation
    /// (submissions succeed, callbacks never arrive), so the server submits a
    /// probe at startup. The probe's callback lands as a ghost and is logged;
    /// what matters is that the submission itself is accepted.
    pub async fn self_test(&self) -> Result<SubmitReceipt, SubmitError> {
        let correlation = CorrelationId::new(
            "selftest",
            crate::models::UrlKind::Search,
            "000000000000",
        );
        self.submit("https://cjdropshipping.com/", &correlation).await
    }
}
