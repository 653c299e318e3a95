use futures::StreamExt;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::util::{validate_feed_url, UrlValidationError};

/// Identifies the bot to feed servers. Some servers answer 403 to requests
/// with an empty or library-default agent, so one is always sent.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; feedbot/0.1)";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while downloading a feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL is unparseable, not http(s), or blocked by policy
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[source] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: {0}")]
    HttpStatus(StatusCode),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(e)
        }
    }
}

/// Settings for [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_bytes: usize,
    pub block_private_addresses: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_bytes: DEFAULT_MAX_FEED_SIZE,
            block_private_addresses: false,
        }
    }
}

/// Downloads feed documents. One GET per call, never retried.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
    block_private_addresses: bool,
}

impl Fetcher {
    pub fn new(options: FetchOptions) -> Result<Self, FetchError> {
        let user_agent = if options.user_agent.trim().is_empty() {
            DEFAULT_USER_AGENT.to_string()
        } else {
            options.user_agent
        };

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(options.timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(FetchError::Network)?;

        Ok(Self {
            client,
            timeout: options.timeout,
            max_bytes: options.max_bytes,
            block_private_addresses: options.block_private_addresses,
        })
    }

    /// Fetch the raw bytes of the document at `url`.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] - Not an http(s) URL, or a blocked host
    /// - [`FetchError::Network`] - Connection, DNS or TLS errors
    /// - [`FetchError::Timeout`] - Request and body read exceeded the timeout
    /// - [`FetchError::HttpStatus`] - Any non-2xx response
    /// - [`FetchError::ResponseTooLarge`] - Body exceeded the size limit
    /// - [`FetchError::IncompleteResponse`] - Body shorter than Content-Length
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let url = validate_feed_url(url, self.block_private_addresses)?;

        // The client timeout covers the request; this one also bounds a
        // server that trickles the body.
        tokio::time::timeout(self.timeout, async {
            let response = self.client.get(url.as_str()).send().await?;

            if !response.status().is_success() {
                return Err(FetchError::HttpStatus(response.status()));
            }

            read_limited_bytes(response, self.max_bytes).await
        })
        .await
        .map_err(|_| FetchError::Timeout)?
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
