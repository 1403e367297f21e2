//! Request coordinator
//!
//! [`AssetCache`] is the single entry point of the subsystem. Given an origin
//! URL and the client's request headers it produces a complete response:
//!
//! - whole-object hit: served directly, or sliced when a range was asked for
//! - range-variant hit: served verbatim
//! - miss: handed to the [`FetchOrchestrator`], which coalesces concurrent
//!   fetches of the same key behind the [`KeyedLock`]

use crate::cache_key::CacheKey;
use crate::config::EdgeCacheConfig;
use crate::error::Result;
use crate::lock::KeyedLock;
use crate::metrics::CacheMetrics;
use crate::models::{AssetResponse, CacheHit, FetchOutcome};
use crate::orchestrator::FetchOrchestrator;
use crate::origin::{HttpOrigin, OriginFetcher};
use crate::range::synthesize;
use crate::store::{self, CacheStore};
use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Range-aware, coalescing asset cache
pub struct AssetCache {
    orchestrator: FetchOrchestrator,
    cache_key_host: String,
    metrics: Arc<CacheMetrics>,
}

impl AssetCache {
    /// Assemble a cache from its parts
    ///
    /// # Arguments
    /// * `config` - Supplies the cache key host and the lock's waiter order
    /// * `store` - Backing cache store
    /// * `origin` - Upstream fetcher
    pub fn new(
        config: &EdgeCacheConfig,
        store: Arc<dyn CacheStore>,
        origin: Arc<dyn OriginFetcher>,
    ) -> Self {
        let metrics = Arc::new(CacheMetrics::new());
        let lock = KeyedLock::new(config.waiter_order);
        AssetCache {
            orchestrator: FetchOrchestrator::new(store, origin, lock, metrics.clone()),
            cache_key_host: config.cache_key_host.clone(),
            metrics,
        }
    }

    /// Build the store and the HTTP origin client described by `config`
    pub async fn from_config(config: &EdgeCacheConfig) -> Result<Self> {
        let store = store::from_config(config).await?;
        let origin: Arc<dyn OriginFetcher> = Arc::new(HttpOrigin::from_config(config)?);
        Ok(Self::new(config, store, origin))
    }

    pub fn metrics(&self) -> Arc<CacheMetrics> {
        self.metrics.clone()
    }

    pub fn lock(&self) -> &KeyedLock {
        self.orchestrator.lock()
    }

    /// The cache key a request for `url` with `headers` resolves to
    pub fn key_for(&self, url: &str, headers: &HeaderMap) -> Result<CacheKey> {
        CacheKey::for_request(url, headers, &self.cache_key_host)
    }

    /// Resolve one request for `url`
    ///
    /// Errors are returned for malformed URLs and origin transport failures;
    /// origin error statuses come back as ordinary responses.
    pub async fn resolve(&self, url: &str, headers: &HeaderMap) -> Result<AssetResponse> {
        let started = Instant::now();
        let result = self.resolve_inner(url, headers).await;

        self.metrics.record_request(result.is_ok());
        self.metrics.record_request_duration(started.elapsed());
        if let Ok(response) = &result {
            self.metrics.record_bytes_to_client(response.body().len() as u64);
        }
        result
    }

    async fn resolve_inner(&self, url: &str, headers: &HeaderMap) -> Result<AssetResponse> {
        let key = self.key_for(url, headers)?;

        if let Some(hit) = self.orchestrator.lookup(&key).await {
            match &hit {
                CacheHit::Whole(_) => self.metrics.record_whole_hit(),
                CacheHit::Range(_) => self.metrics.record_range_hit(),
            }
            debug!("Cache hit for key={}", key);
            return Ok(self.respond(hit, key.range()));
        }

        self.metrics.record_cache_miss();
        debug!("Cache miss for key={}", key);

        match self.orchestrator.fetch_and_store(&key, url).await? {
            FetchOutcome::Cached(hit) => Ok(self.respond(hit, key.range())),
            FetchOutcome::Stored(hit) => {
                info!("Served from origin: key={}", key);
                Ok(render_hit(hit, key.range()))
            }
            FetchOutcome::Passthrough { status, body } => Ok(passthrough(status, body)),
        }
    }

    fn respond(&self, hit: CacheHit, range: Option<&str>) -> AssetResponse {
        self.metrics
            .record_bytes_from_cache(hit.payload().content_length());
        render_hit(hit, range)
    }
}

fn render_hit(hit: CacheHit, range: Option<&str>) -> AssetResponse {
    match hit {
        CacheHit::Whole(payload) => synthesize(&payload, range),
        CacheHit::Range(payload) => payload.to_response(),
    }
}

/// Origin error answer, relayed without caching headers
fn passthrough(status: StatusCode, body: Bytes) -> AssetResponse {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let length = HeaderValue::from(response.body().len());
    response.headers_mut().insert(CONTENT_LENGTH, length);
    response
}
