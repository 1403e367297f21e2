//! Origin fetch and store
//!
//! [`FetchOrchestrator::fetch_and_store`] runs the miss path for one cache
//! key:
//!
//! 1. acquire the per-key lock
//! 2. look the key up again, since a request queued ahead of this one may
//!    have stored it in the meantime
//! 3. fetch from origin, store a 2xx answer, pass anything else through
//!
//! A ranged miss the origin answers with 416 is fetched again without the
//! `Range` header and stored as the whole object.
//!
//! The lock guard lives for the whole call, so every exit path (re-check
//! hit, stored, passthrough, transport error) releases it exactly once.

use crate::cache_key::CacheKey;
use crate::error::{EdgeCacheError, Result};
use crate::lock::KeyedLock;
use crate::metrics::CacheMetrics;
use crate::models::{CacheHit, CachedPayload, FetchOutcome};
use crate::origin::{OriginFetcher, OriginResponse};
use crate::store::CacheStore;
use http::header::{HeaderValue, RANGE};
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct FetchOrchestrator {
    store: Arc<dyn CacheStore>,
    origin: Arc<dyn OriginFetcher>,
    lock: KeyedLock,
    metrics: Arc<CacheMetrics>,
}

impl FetchOrchestrator {
    pub fn new(
        store: Arc<dyn CacheStore>,
        origin: Arc<dyn OriginFetcher>,
        lock: KeyedLock,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        FetchOrchestrator {
            store,
            origin,
            lock,
            metrics,
        }
    }

    pub fn lock(&self) -> &KeyedLock {
        &self.lock
    }

    /// Look up the entries that can answer a request for `key`
    ///
    /// The whole-object entry wins; the range-variant entry is only consulted
    /// for ranged keys. Store failures count as misses.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CacheHit> {
        if let Some(payload) = self.lookup_entry(&key.to_whole()).await {
            return Some(CacheHit::Whole(payload));
        }
        if key.is_ranged() {
            if let Some(payload) = self.lookup_entry(key).await {
                return Some(CacheHit::Range(payload));
            }
        }
        None
    }

    async fn lookup_entry(&self, key: &CacheKey) -> Option<CachedPayload> {
        match self.store.lookup(&key.store_key()).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Cache lookup failed for key={}: {}", key, e);
                self.metrics.record_store_error();
                None
            }
        }
    }

    /// Fetch `origin_url` and store it under `key`, coalescing with any
    /// in-flight fetch for the same key
    ///
    /// # Returns
    /// * `Ok(FetchOutcome::Cached)` if the re-check after locking found an entry
    /// * `Ok(FetchOutcome::Stored)` after a 2xx origin answer was stored
    /// * `Ok(FetchOutcome::Passthrough)` for a non-2xx origin answer, not stored
    /// * `Err(EdgeCacheError)` on origin transport failure, never retried here
    pub async fn fetch_and_store(&self, key: &CacheKey, origin_url: &str) -> Result<FetchOutcome> {
        let lock_key = key.store_key();
        let _guard = self.lock.acquire(&lock_key).await;
        debug!("Holding fetch lock for key={}", lock_key);

        if let Some(hit) = self.lookup(key).await {
            debug!("Entry appeared while waiting for lock: key={}", lock_key);
            self.metrics.record_coalesced();
            return Ok(FetchOutcome::Cached(hit));
        }

        let mut headers = HeaderMap::new();
        if let Some(range) = key.range() {
            let value = HeaderValue::from_str(range).map_err(|e| {
                EdgeCacheError::InternalError(format!("Range header not re-encodable: {}", e))
            })?;
            headers.insert(RANGE, value);
        }

        let mut response = self.fetch_origin(origin_url, &headers).await?;
        let mut ranged = key.is_ranged();
        if ranged && response.status == StatusCode::RANGE_NOT_SATISFIABLE {
            // An unsatisfiable range degrades to the whole object
            info!(
                "Origin rejected range for url={}, fetching whole object",
                origin_url
            );
            response = self.fetch_origin(origin_url, &HeaderMap::new()).await?;
            ranged = false;
        }

        let status = response.status;
        if !status.is_success() {
            warn!(
                "Origin returned status={} for url={}, not caching",
                status, origin_url
            );
            self.metrics.record_origin_passthrough();
            return Ok(FetchOutcome::Passthrough {
                status,
                body: response.body,
            });
        }

        let content_type = response.content_type();
        let hit = match (ranged, status) {
            (true, StatusCode::PARTIAL_CONTENT) => {
                let payload = CachedPayload::from_origin(
                    status.as_u16(),
                    content_type,
                    response.content_range().map(str::to_string),
                    response.body.clone(),
                );
                self.put(key, &payload).await;
                CacheHit::Range(payload)
            }
            (false, StatusCode::PARTIAL_CONTENT) => {
                warn!(
                    "Origin sent partial content to an unranged request for url={}, not caching",
                    origin_url
                );
                self.metrics.record_origin_passthrough();
                return Ok(FetchOutcome::Passthrough {
                    status,
                    body: response.body,
                });
            }
            _ => {
                // A full answer is the whole object, whatever was asked for
                let payload = CachedPayload::from_origin(
                    status.as_u16(),
                    content_type,
                    None,
                    response.body.clone(),
                );
                self.put(&key.to_whole(), &payload).await;
                CacheHit::Whole(payload)
            }
        };

        Ok(FetchOutcome::Stored(hit))
    }

    async fn fetch_origin(&self, origin_url: &str, headers: &HeaderMap) -> Result<OriginResponse> {
        let started = Instant::now();
        match self.origin.fetch(origin_url, headers).await {
            Ok(response) => {
                self.metrics
                    .record_origin_fetch(response.body.len() as u64, started.elapsed());
                Ok(response)
            }
            Err(e) => {
                warn!("Origin fetch failed for url={}: {}", origin_url, e);
                self.metrics.record_origin_failure();
                Err(e)
            }
        }
    }

    /// Store failures are logged; the fetched payload is still served
    async fn put(&self, key: &CacheKey, payload: &CachedPayload) {
        let store_key = key.store_key();
        match self.store.put(&store_key, payload.clone()).await {
            Ok(()) => info!(
                "Stored key={} ({} bytes, status={})",
                store_key,
                payload.content_length(),
                payload.status
            ),
            Err(e) => {
                warn!("Failed to store key={}: {}", store_key, e);
                self.metrics.record_store_error();
            }
        }
    }
}
