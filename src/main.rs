//! Edge Media Cache Server
//!
//! Loads configuration, sets up logging, starts the optional metrics
//! endpoint and serves inbound asset requests.

use anyhow::Context;
use edge_media_cache::server::{self, EdgeHandler};
use edge_media_cache::{AssetCache, AssetRouter, EdgeCacheConfig, MetricsEndpoint};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Main entry point
///
/// # Usage
/// ```bash
/// # Start with default config (edge_media_cache.yaml)
/// edge-media-cache
///
/// # Start with custom config
/// edge-media-cache /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Edge Media Cache");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "edge_media_cache.yaml".to_string());
    info!("Loading configuration from: {}", config_path);

    let config = EdgeCacheConfig::from_file(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;
    info!("Configuration loaded successfully");
    info!("  - Listen address: {}", config.listen_address);
    info!("  - Resizer: {}", config.resizer_url.as_deref().unwrap_or("disabled"));
    info!("  - Store backend: {:?}", config.store.backend);
    info!("  - Store TTL: {} seconds", config.store.ttl_secs);
    info!("  - Max asset size: {} bytes", config.max_asset_size);
    info!("  - Waiter order: {:?}", config.waiter_order);

    let cache = Arc::new(
        AssetCache::from_config(&config)
            .await
            .context("failed to initialize asset cache")?,
    );
    let router = AssetRouter::from_config(&config)?;

    if let Some(endpoint) = config.metrics_endpoint.as_ref().filter(|m| m.enabled) {
        let addr: SocketAddr = endpoint
            .address
            .parse()
            .with_context(|| format!("invalid metrics address {}", endpoint.address))?;
        let metrics = MetricsEndpoint::new(cache.metrics(), addr);
        tokio::spawn(async move {
            if let Err(e) = metrics.start().await {
                error!("Metrics endpoint stopped: {}", e);
            }
        });
    }

    let listener = TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_address))?;
    let handler = Arc::new(EdgeHandler::new(cache, router, config.request_timeout()));

    server::serve(listener, handler).await?;
    Ok(())
}
