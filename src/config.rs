//! Configuration management for the edge media cache

use crate::error::{EdgeCacheError, Result};
use crate::lock::WaiterOrder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeCacheConfig {
    /// Address the inbound HTTP listener binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Scheme used when forwarding directly to an origin host (default: https)
    #[serde(default = "default_origin_scheme")]
    pub origin_scheme: String,

    /// Base URL of the image resizing backend
    /// Image requests go straight to the origin when this is unset
    #[serde(default)]
    pub resizer_url: Option<String>,

    /// Bearer token sent upstream as `Authorization: Bearer <token>`
    #[serde(default)]
    pub resizer_token: Option<String>,

    /// Host every cache key is normalized to (default: cache.cdn.com)
    #[serde(default = "default_cache_key_host")]
    pub cache_key_host: String,

    /// Largest origin body buffered in memory, in bytes (default: 64MB)
    #[serde(default = "default_max_asset_size")]
    pub max_asset_size: u64,

    /// Timeout for a single origin fetch in seconds (default: 30)
    #[serde(default = "default_origin_timeout")]
    pub origin_timeout_secs: u64,

    /// Deadline wrapped around a whole resolve call in seconds (default: 60)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Order in which blocked lock waiters are served (default: fifo)
    #[serde(default)]
    pub waiter_order: WaiterOrder,

    /// Cache store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Cache store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process map, lost on restart
    #[default]
    Memory,
    /// One file per entry under `disk_path`
    Disk,
}

/// Configuration for the cache store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Store-side expiry in seconds (default: 604800 = 1 week)
    #[serde(default = "default_store_ttl")]
    pub ttl_secs: u64,

    /// Directory used by the disk backend
    #[serde(default = "default_disk_path")]
    pub disk_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            ttl_secs: default_store_ttl(),
            disk_path: default_disk_path(),
        }
    }
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

// Default value functions for serde
fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_origin_scheme() -> String {
    "https".to_string()
}

fn default_cache_key_host() -> String {
    "cache.cdn.com".to_string()
}

fn default_max_asset_size() -> u64 {
    64 * 1024 * 1024 // 64MB
}

fn default_origin_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    60
}

fn default_store_ttl() -> u64 {
    604_800 // 1 week, same as the max-age written on stored entries
}

fn default_disk_path() -> String {
    "/var/cache/edge-media-cache".to_string()
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for EdgeCacheConfig {
    fn default() -> Self {
        EdgeCacheConfig {
            listen_address: default_listen_address(),
            origin_scheme: default_origin_scheme(),
            resizer_url: None,
            resizer_token: None,
            cache_key_host: default_cache_key_host(),
            max_asset_size: default_max_asset_size(),
            origin_timeout_secs: default_origin_timeout(),
            request_timeout_secs: default_request_timeout(),
            waiter_order: WaiterOrder::default(),
            store: StoreConfig::default(),
            metrics_endpoint: None,
        }
    }
}

impl EdgeCacheConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(EdgeCacheConfig)` if loading and validation succeed
    /// * `Err(EdgeCacheError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            EdgeCacheError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: EdgeCacheConfig = serde_yaml::from_str(content).map_err(|e| {
            EdgeCacheError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - origin_scheme must be http or https
    /// - resizer_url, when set, must be an absolute http(s) URL
    /// - cache_key_host must not be empty
    /// - max_asset_size, timeouts and store ttl must be > 0
    /// - disk_path must not be empty when the disk backend is selected
    pub fn validate(&self) -> Result<()> {
        if self.origin_scheme != "http" && self.origin_scheme != "https" {
            return Err(EdgeCacheError::ConfigError(format!(
                "origin_scheme must be 'http' or 'https', got '{}'",
                self.origin_scheme
            )));
        }

        if let Some(resizer) = &self.resizer_url {
            let parsed = url::Url::parse(resizer).map_err(|e| {
                EdgeCacheError::ConfigError(format!("resizer_url '{}' is invalid: {}", resizer, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                return Err(EdgeCacheError::ConfigError(format!(
                    "resizer_url must be an absolute http(s) URL, got '{}'",
                    resizer
                )));
            }
        }

        if self.cache_key_host.trim().is_empty() {
            return Err(EdgeCacheError::ConfigError(
                "cache_key_host must not be empty".to_string(),
            ));
        }

        if self.max_asset_size == 0 {
            return Err(EdgeCacheError::ConfigError(
                "max_asset_size must be greater than 0".to_string(),
            ));
        }

        if self.origin_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(EdgeCacheError::ConfigError(
                "origin_timeout_secs and request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.store.ttl_secs == 0 {
            return Err(EdgeCacheError::ConfigError(
                "store.ttl_secs must be greater than 0".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Disk && self.store.disk_path.trim().is_empty() {
            return Err(EdgeCacheError::ConfigError(
                "store.disk_path is required when store.backend is 'disk'".to_string(),
            ));
        }

        Ok(())
    }

    pub fn origin_timeout(&self) -> Duration {
        Duration::from_secs(self.origin_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn store_ttl(&self) -> Duration {
        Duration::from_secs(self.store.ttl_secs)
    }
}
