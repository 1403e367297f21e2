//! Cache key derivation
//!
//! Every resource has a whole-object key: its origin URL rewritten under the
//! cache host, with the query sorted by parameter name. A ranged request
//! additionally gets a range-variant key scoped to the literal `Range`
//! header value, so `bytes=0-9` and `bytes=0-09` are distinct entries even
//! though they cover the same span.

use crate::error::{EdgeCacheError, Result};
use crate::range::raw_range_header;
use http::HeaderMap;
use std::fmt;
use url::Url;

/// Separator between the whole key and the range spec in a rendered key
///
/// Whole keys never carry a fragment, so no whole key contains `#`.
const RANGE_MARKER: &str = "#range=";

/// Structured key for one cacheable artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resource: String,
    range: Option<String>,
}

impl CacheKey {
    /// Key for the whole, unranged resource
    pub fn whole(resource: impl Into<String>) -> Self {
        CacheKey {
            resource: resource.into(),
            range: None,
        }
    }

    /// Key for one range variant of `resource`
    pub fn ranged(resource: impl Into<String>, raw_range: impl Into<String>) -> Self {
        CacheKey {
            resource: resource.into(),
            range: Some(raw_range.into()),
        }
    }

    /// Derive the key for a request against `url`
    ///
    /// The key is ranged exactly when the request carries a `Range` header.
    pub fn for_request(url: &str, headers: &HeaderMap, cache_host: &str) -> Result<Self> {
        let resource = canonicalize_url(url, cache_host)?;
        Ok(match raw_range_header(headers) {
            Some(raw) => CacheKey::ranged(resource, raw),
            None => CacheKey::whole(resource),
        })
    }

    /// The canonical whole-object key
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The literal range spec, for range-variant keys
    pub fn range(&self) -> Option<&str> {
        self.range.as_deref()
    }

    pub fn is_ranged(&self) -> bool {
        self.range.is_some()
    }

    /// The whole-object key for the same resource
    pub fn to_whole(&self) -> CacheKey {
        CacheKey::whole(self.resource.clone())
    }

    /// Render the string handed to the cache store and the lock
    pub fn store_key(&self) -> String {
        match &self.range {
            Some(range) => format!("{}{}{}", self.resource, RANGE_MARKER, range),
            None => self.resource.clone(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.store_key())
    }
}

/// Canonicalize an origin URL into a whole-object cache key
///
/// `https://Origin.example.com:8443/a/b.jpg?w=10&h=5#x` with cache host
/// `cache.cdn.com` becomes `https://cache.cdn.com/origin.example.com:8443/a/b.jpg?h=5&w=10`:
///
/// - the origin host (lowercased, default port dropped) moves into the path
///   so different origins never share a key
/// - query parameters are sorted by name (case-sensitive, stable for
///   repeated names) and re-encoded
/// - the fragment is dropped
pub fn canonicalize_url(url: &str, cache_host: &str) -> Result<String> {
    let origin = Url::parse(url)?;
    let host = origin
        .host_str()
        .ok_or_else(|| EdgeCacheError::InvalidUrl(format!("URL has no host: {}", url)))?;
    let authority = match origin.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let mut key = Url::parse(&format!("https://{}/", cache_host))?;
    key.set_path(&format!("/{}{}", authority, origin.path()));

    let mut pairs: Vec<(String, String)> = origin
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        key.set_query(None);
    } else {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        key.query_pairs_mut().extend_pairs(pairs);
    }

    Ok(key.into())
}
