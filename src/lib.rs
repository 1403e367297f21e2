//! Edge Media Cache
//!
//! A range-aware caching and request-coalescing layer for an edge reverse
//! proxy that serves media assets from origin hosts, with image requests
//! optionally routed through a resizing backend.
//!
//! # Overview
//!
//! Every request resolves against two kinds of cache entries:
//!
//! - a **whole-object** entry keyed by the canonical origin URL, from which any
//!   single `bytes=<start>-<end?>` range is synthesized in memory
//! - a **range-variant** entry keyed by the URL plus the literal `Range`
//!   header, holding a partial response the origin produced itself
//!
//! On a full miss the [`FetchOrchestrator`] takes a per-key lock, looks the
//! key up again and only then goes to origin, so concurrent requests for the
//! same uncached resource share one upstream fetch.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use edge_media_cache::{AssetCache, EdgeCacheConfig};
//! use http::HeaderMap;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EdgeCacheConfig::from_file("edge_media_cache.yaml")?;
//! let cache = AssetCache::from_config(&config).await?;
//!
//! let response = cache
//!     .resolve("https://origin.example.com/video/intro.mp4", &HeaderMap::new())
//!     .await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! listen_address: "0.0.0.0:8080"
//! resizer_url: "https://resizer.example.com"
//! resizer_token: "secret"
//! waiter_order: fifo
//! store:
//!   backend: disk
//!   disk_path: /var/cache/edge-media-cache
//!   ttl_secs: 604800
//! metrics_endpoint:
//!   enabled: true
//!   address: "127.0.0.1:9090"
//! ```
//!
//! See [`EdgeCacheConfig`] for every option and its default.
//!
//! # Error Handling
//!
//! Fallible operations return [`EdgeCacheError`]. Origin error statuses are
//! not errors: they are relayed to the client and never cached. A malformed
//! or unsatisfiable `Range` header is not an error either; the whole object
//! is served with status 200.

pub mod cache_key;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod metrics_endpoint;
pub mod models;
pub mod orchestrator;
pub mod origin;
pub mod range;
pub mod router;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use cache_key::{canonicalize_url, CacheKey};
pub use config::{EdgeCacheConfig, MetricsEndpointConfig, StoreBackend, StoreConfig};
pub use coordinator::AssetCache;
pub use error::{EdgeCacheError, Result};
pub use lock::{KeyedLock, LockGuard, WaiterOrder};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use metrics_endpoint::MetricsEndpoint;
pub use models::{AssetResponse, ByteRange, CacheHit, CachedPayload, FetchOutcome, RangeSpec};
pub use orchestrator::FetchOrchestrator;
pub use origin::{HttpOrigin, OriginFetcher, OriginResponse};
pub use range::{parse_range_header, synthesize, BoundedBody};
pub use router::{AssetRouter, Route};
pub use server::EdgeHandler;
pub use store::{CacheStore, DiskStore, MemoryStore, StoreStats};
