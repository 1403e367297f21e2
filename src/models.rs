//! Core data models for the edge media cache

use bytes::Bytes;
use http::header::{
    HeaderValue, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE,
};
use http::{Response, StatusCode};

/// Response handed back to the inbound dispatcher
pub type AssetResponse = Response<Bytes>;

/// Cache-Control written on every stored entry
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=604800, immutable";

/// Content-Type used when the origin does not send one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content-Disposition written on every stored entry
pub const INLINE_DISPOSITION: &str = "inline";

/// Parsed `Range` request intent
///
/// `end` of `None` means "to the end of the resource".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    /// Resolve this request intent against a payload of `total` bytes
    ///
    /// # Returns
    /// * `Some(ByteRange)` when `start <= end < total`
    /// * `None` when the range cannot be served from this payload
    pub fn resolve(&self, total: u64) -> Option<ByteRange> {
        if total == 0 {
            return None;
        }
        let end = self.end.unwrap_or(total - 1);
        if self.start > end || end >= total {
            return None;
        }
        Some(ByteRange {
            start: self.start,
            end,
        })
    }
}

/// A resolved, inclusive byte span inside a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Get the size of this byte range in bytes
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Render the `Content-Range` value for a payload of `total` bytes
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// An immutable cached response
///
/// Built once per successful origin fetch and never mutated afterwards. A
/// newer store under the same key replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPayload {
    /// Status the origin answered with (200 for whole objects, 206 for range variants)
    pub status: u16,
    pub body: Bytes,
    pub content_type: String,
    pub cache_control: String,
    pub content_disposition: String,
    /// Origin `Content-Range`, kept for range-variant entries
    pub content_range: Option<String>,
}

impl CachedPayload {
    /// Wrap an origin body with the fixed caching header policy
    pub fn from_origin(
        status: u16,
        content_type: Option<&str>,
        content_range: Option<String>,
        body: Bytes,
    ) -> Self {
        let content_type = content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        CachedPayload {
            status,
            body,
            content_type,
            cache_control: IMMUTABLE_CACHE_CONTROL.to_string(),
            content_disposition: INLINE_DISPOSITION.to_string(),
            content_range,
        }
    }

    pub fn content_length(&self) -> u64 {
        self.body.len() as u64
    }

    /// Build the response served for this entry as stored
    pub fn to_response(&self) -> AssetResponse {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = Response::new(self.body.clone());
        *response.status_mut() = status;

        let headers = response.headers_mut();
        insert_header(headers, CONTENT_TYPE, &self.content_type);
        insert_header(headers, CACHE_CONTROL, &self.cache_control);
        insert_header(headers, CONTENT_DISPOSITION, &self.content_disposition);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(self.content_length()));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        if let Some(content_range) = &self.content_range {
            insert_header(headers, CONTENT_RANGE, content_range);
        }

        response
    }
}

/// Header values come from the origin; a value that cannot be re-encoded is skipped
pub(crate) fn insert_header(headers: &mut http::HeaderMap, name: http::HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(e) => {
            tracing::warn!("Dropping unencodable header {}={:?}: {}", name, value, e);
        }
    }
}

/// Which cache entry satisfied a lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheHit {
    /// The full, unranged object; a requested range is synthesized from it
    Whole(CachedPayload),
    /// A stored range variant, served verbatim
    Range(CachedPayload),
}

impl CacheHit {
    pub fn payload(&self) -> &CachedPayload {
        match self {
            CacheHit::Whole(p) | CacheHit::Range(p) => p,
        }
    }
}

/// Result of the fetch-and-store step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Another request stored the entry while this one waited for the lock
    Cached(CacheHit),
    /// Fetched from origin and written to the store
    Stored(CacheHit),
    /// Origin answered with a non-success status; nothing was cached
    Passthrough { status: StatusCode, body: Bytes },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_spec_resolve_closed() {
        let spec = RangeSpec {
            start: 0,
            end: Some(9),
        };
        let range = spec.resolve(100).unwrap();
        assert_eq!(range, ByteRange { start: 0, end: 9 });
        assert_eq!(range.size(), 10);
        assert_eq!(range.content_range(100), "bytes 0-9/100");
    }

    #[test]
    fn test_range_spec_resolve_open() {
        let spec = RangeSpec {
            start: 90,
            end: None,
        };
        assert_eq!(spec.resolve(100), Some(ByteRange { start: 90, end: 99 }));
    }

    #[test]
    fn test_range_spec_resolve_out_of_bounds() {
        let past_end = RangeSpec {
            start: 0,
            end: Some(100),
        };
        assert!(past_end.resolve(100).is_none());

        let inverted = RangeSpec {
            start: 5,
            end: Some(2),
        };
        assert!(inverted.resolve(100).is_none());

        let start_past_end = RangeSpec {
            start: 100,
            end: None,
        };
        assert!(start_past_end.resolve(100).is_none());

        let empty = RangeSpec {
            start: 0,
            end: None,
        };
        assert!(empty.resolve(0).is_none());
    }

    #[test]
    fn test_payload_header_policy() {
        let payload = CachedPayload::from_origin(200, None, None, Bytes::from_static(b"abc"));
        assert_eq!(payload.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(payload.cache_control, IMMUTABLE_CACHE_CONTROL);
        assert_eq!(payload.content_disposition, "inline");
        assert_eq!(payload.content_length(), 3);

        let response = payload.to_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_CONTROL], IMMUTABLE_CACHE_CONTROL);
        assert_eq!(response.headers()[CONTENT_LENGTH], "3");
        assert!(response.headers().get(CONTENT_RANGE).is_none());
    }

    #[test]
    fn test_payload_preserves_origin_content_type() {
        let payload =
            CachedPayload::from_origin(200, Some("image/png"), None, Bytes::from_static(b"png"));
        assert_eq!(payload.content_type, "image/png");
    }

    #[test]
    fn test_range_variant_response() {
        let payload = CachedPayload::from_origin(
            206,
            Some("video/mp4"),
            Some("bytes 0-3/10".to_string()),
            Bytes::from_static(b"0123"),
        );
        let response = payload.to_response();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 0-3/10");
        assert_eq!(response.body().as_ref(), b"0123");
    }
}
