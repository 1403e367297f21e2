//! Error types for the edge media cache

use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, EdgeCacheError>;

/// Error types that can occur while resolving an asset
///
/// Origin responses with a non-2xx status are not errors: they travel back
/// to the caller as [`crate::models::FetchOutcome::Passthrough`]. Malformed
/// `Range` headers are not errors either; they degrade to the whole object.
#[derive(Error, Debug, Clone)]
pub enum EdgeCacheError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Origin transport error: {0}")]
    OriginTransport(String),

    #[error("Origin payload exceeds {limit} bytes (got at least {actual})")]
    PayloadTooLarge { limit: u64, actual: u64 },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for EdgeCacheError {
    fn from(err: std::io::Error) -> Self {
        EdgeCacheError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for EdgeCacheError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EdgeCacheError::Timeout(err.to_string())
        } else {
            EdgeCacheError::OriginTransport(err.to_string())
        }
    }
}

impl From<url::ParseError> for EdgeCacheError {
    fn from(err: url::ParseError) -> Self {
        EdgeCacheError::InvalidUrl(err.to_string())
    }
}

impl EdgeCacheError {
    /// Convert error to the HTTP status code returned to the client
    ///
    /// - Transport failures and oversized payloads: 502 Bad Gateway
    /// - Timeouts: 504 Gateway Timeout
    /// - Unparsable request URLs: 400 Bad Request
    /// - Everything else: 500 Internal Server Error
    pub fn to_http_status(&self) -> u16 {
        match self {
            EdgeCacheError::OriginTransport(_) => 502,
            EdgeCacheError::PayloadTooLarge { .. } => 502,
            EdgeCacheError::Timeout(_) => 504,
            EdgeCacheError::InvalidUrl(_) => 400,
            EdgeCacheError::ConfigError(_) => 500,
            EdgeCacheError::CacheError(_) => 500,
            EdgeCacheError::IoError(_) => 500,
            EdgeCacheError::InternalError(_) => 500,
        }
    }

    /// Whether the failure happened while talking to the origin
    pub fn is_origin_failure(&self) -> bool {
        matches!(
            self,
            EdgeCacheError::OriginTransport(_)
                | EdgeCacheError::Timeout(_)
                | EdgeCacheError::PayloadTooLarge { .. }
        )
    }
}
