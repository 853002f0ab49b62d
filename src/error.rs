//! Error types for the trawl orchestrator
//!
//! This module defines the typed errors used at the module seams. Item-level
//! errors are absorbed by the webhook path and fed into the retry ladder;
//! they never propagate to the fetcher.

use thiserror::Error;

/// Errors raised while downloading a result payload from the fetcher's storage
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server responded with a non-success status
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Payload could not be decoded to UTF-8
    #[error("Decoding error: {0}")]
    Decode(String),
}

/// Errors raised when submitting a URL to the browser fetcher service
#[derive(Error, Debug)]
pub enum SubmitError {
    /// HTTP transport failure
    #[error("Submit request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The fetcher rejected the submission
    #[error("Fetcher API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Submit-side timeout
    #[error("Submit timeout")]
    Timeout,

    /// The configured endpoint or webhook URL is unusable
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Errors raised while extracting structured data from a payload
#[derive(Error, Debug)]
pub enum ParseError {
    /// The expected anchor token was not found; also covers anti-bot pages
    #[error("Payload shape not recognized: {0}")]
    Shape(String),

    /// Braces never balanced, or the repaired text is still not valid JSON
    #[error("Embedded data is not valid JSON: {0}")]
    Syntax(String),

    /// Parsed, but required fields are missing
    #[error("Product data incomplete: {0}")]
    Incomplete(String),

    /// The catalog reports the product as removed (benign, not retried)
    #[error("Product removed from catalog")]
    ProductRemoved,
}

impl FetchError {
    /// Check if this error is worth retrying
    pub fn is_recoverable(&self) -> bool {
        match self {
            FetchError::Timeout => true,
            FetchError::ServerError(status) => matches!(status, 429 | 500 | 502 | 503 | 504),
            FetchError::Http(e) => e.is_timeout() || e.is_connect(),
            FetchError::Decode(_) => false,
        }
    }
}

impl SubmitError {
    /// Check if this error is worth retrying
    pub fn is_recoverable(&self) -> bool {
        match self {
            SubmitError::Timeout => true,
            SubmitError::Api { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            SubmitError::Http(e) => e.is_timeout() || e.is_connect(),
            SubmitError::InvalidUrl(_) => false,
        }
    }
}

impl ParseError {
    /// Shape errors are the signal used for anti-bot cooldown handling
    pub fn is_shape(&self) -> bool {
        matches!(self, ParseError::Shape(_))
    }

    /// Removed products terminate the item without an error
    pub fn is_benign(&self) -> bool {
        matches!(self, ParseError::ProductRemoved)
    }
}
