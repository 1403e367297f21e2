//! Origin retrieval
//!
//! [`OriginFetcher`] is the seam between the resolver and the network. The
//! production implementation, [`HttpOrigin`], issues a GET with reqwest and
//! buffers the body through a [`BoundedBody`], so an asset larger than
//! `max_asset_size` fails instead of exhausting memory.

use crate::config::EdgeCacheConfig;
use crate::error::{EdgeCacheError, Result};
use crate::range::BoundedBody;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A fully buffered origin response
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OriginResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn content_range(&self) -> Option<&str> {
        self.headers.get(CONTENT_RANGE).and_then(|v| v.to_str().ok())
    }
}

/// Something that can retrieve an asset from upstream
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    /// GET `url` with the given extra request headers
    ///
    /// Any status the origin answers with is returned as `Ok`; only transport
    /// failures (connect, timeout, oversized or truncated body) are errors.
    async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<OriginResponse>;
}

/// reqwest-backed origin client
pub struct HttpOrigin {
    client: Client,
    bearer_token: Option<String>,
    max_body_size: u64,
}

impl HttpOrigin {
    /// Create a new HttpOrigin
    ///
    /// # Arguments
    /// * `timeout` - Timeout for one whole fetch, body included
    /// * `max_body_size` - Largest body that will be buffered
    pub fn new(timeout: Duration, max_body_size: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                EdgeCacheError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(HttpOrigin {
            client,
            bearer_token: None,
            max_body_size,
        })
    }

    /// Create an origin client from the configuration
    pub fn from_config(config: &EdgeCacheConfig) -> Result<Self> {
        let origin = Self::new(config.origin_timeout(), config.max_asset_size)?;
        Ok(match &config.resizer_token {
            Some(token) if !token.is_empty() => origin.with_bearer_token(token.clone()),
            _ => origin,
        })
    }

    /// Send `Authorization: Bearer <token>` on every fetch
    pub fn with_bearer_token(mut self, token: String) -> Self {
        self.bearer_token = Some(token);
        self
    }
}

#[async_trait]
impl OriginFetcher for HttpOrigin {
    async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<OriginResponse> {
        debug!("Fetching from origin: url={}", url);

        let mut request = self.client.get(url).headers(headers.clone());
        if let Some(token) = &self.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                EdgeCacheError::ConfigError(format!("Invalid bearer token: {}", e))
            })?;
            request = request.header(AUTHORIZATION, value);
        }

        let mut response = request.send().await.map_err(|e| {
            warn!("Origin request failed for url={}: {}", url, e);
            EdgeCacheError::from(e)
        })?;

        let status = response.status();
        let response_headers = response.headers().clone();

        let mut body = if status.is_success() {
            BoundedBody::new(self.max_body_size, response.content_length())?
        } else {
            // Error answers are relayed, never cached
            BoundedBody::truncating(self.max_body_size)
        };
        while let Some(chunk) = response.chunk().await? {
            body.push(&chunk)?;
            if body.is_truncated() {
                warn!(
                    "Truncated status={} body from url={} at {} bytes",
                    status, url, self.max_body_size
                );
                break;
            }
        }
        let body = body.freeze();

        info!(
            "Origin responded: url={}, status={}, bytes={}",
            url,
            status,
            body.len()
        );

        Ok(OriginResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}
