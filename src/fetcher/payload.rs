//! Downloading stored result payloads
//!
//! After a successful fetch the browser service stores the rendered HTML and
//! hands us a URL to it in the postback. The stored payload is sometimes
//! Brotli-compressed and sometimes raw depending on the upstream response, so
//! decompression is attempted first with a raw fallback.

use reqwest::Client;
use std::io::Read;
use std::time::Duration;
use tracing::debug;

use crate::error::FetchError;

/// Buffer size for streaming Brotli decompression
const BROTLI_BUFFER: usize = 4096;

/// Client for downloading result payloads from the fetcher's storage
pub struct PayloadClient {
    client: Client,
}

impl PayloadClient {
    /// Create a payload client with the given download timeout.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Download and decode one payload.
    ///
    /// # Errors
    ///
    /// `FetchError::ServerError` for non-success statuses,
    /// `FetchError::Timeout` for elapsed downloads, `FetchError::Http` for
    /// transport failures.
    pub async fn download(&self, payload_url: &str) -> Result<String, FetchError> {
        let response = self.client.get(payload_url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::ServerError(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(FetchError::Http)?;
        Ok(decode_payload(&bytes))
    }
}

/// Decode payload bytes: try Brotli, fall back to the raw bytes.
///
/// Brotli streams carry no magic number, so "try and see" is the only
/// reliable detection; the original upstream stores both forms.
pub fn decode_payload(bytes: &[u8]) -> String {
    let mut decompressed = Vec::new();
    let mut reader = brotli::Decompressor::new(bytes, BROTLI_BUFFER);

    match reader.read_to_end(&mut decompressed) {
        Ok(_) if !decompressed.is_empty() => {
            debug!(
                compressed = bytes.len(),
                decompressed = decompressed.len(),
                "Decompressed Brotli payload"
            );
            String::from_utf8_lossy(&decompressed).into_owned()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}
