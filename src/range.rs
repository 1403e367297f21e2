//! Range parsing and partial-content synthesis
//!
//! Ranges are served by slicing a payload that is already fully in memory.
//! Nothing here streams: every origin body is buffered first, through
//! [`BoundedBody`], whose limit (`max_asset_size`) caps the memory one
//! request can pin.
//!
//! Malformed or unsatisfiable ranges never produce a 416. They degrade to
//! the whole object with status 200.

use crate::error::{EdgeCacheError, Result};
use crate::models::{insert_header, AssetResponse, ByteRange, CachedPayload, RangeSpec};
use bytes::{Bytes, BytesMut};
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use http::{HeaderMap, StatusCode};
use tracing::debug;

/// Get the raw `Range` header value, if any
///
/// A header that is not valid visible ASCII counts as absent.
pub fn raw_range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(RANGE).and_then(|v| v.to_str().ok())
}

/// Parse a `Range` header of the form `bytes=<start>-<end?>`
///
/// # Returns
/// * `Some(RangeSpec)` for a single range with an explicit start
/// * `None` for anything else: other units, suffix ranges (`bytes=-N`),
///   multiple ranges, or non-numeric bounds
pub fn parse_range_header(header: &str) -> Option<RangeSpec> {
    let spec = header.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = parse_position(start.trim())?;
    let end = match end.trim() {
        "" => None,
        end => Some(parse_position(end)?),
    };
    Some(RangeSpec { start, end })
}

fn parse_position(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Resolve a raw `Range` header against a payload length
pub fn resolve_range(header: &str, total: u64) -> Option<ByteRange> {
    parse_range_header(header)?.resolve(total)
}

/// Build the response for a whole-object entry and an optional `Range` header
///
/// - No header: the payload as stored (200)
/// - Satisfiable single range: 206 with exactly `[start, end]`, a matching
///   `Content-Range` and `Content-Length`, other headers preserved
/// - Anything else: the payload as stored (200)
pub fn synthesize(payload: &CachedPayload, range_header: Option<&str>) -> AssetResponse {
    let Some(raw) = range_header else {
        return payload.to_response();
    };

    let total = payload.content_length();
    let Some(range) = resolve_range(raw, total) else {
        debug!(
            "Range '{}' not satisfiable for {} byte payload, serving whole object",
            raw, total
        );
        return payload.to_response();
    };

    let mut response = payload.to_response();
    *response.status_mut() = StatusCode::PARTIAL_CONTENT;
    // Bounds were checked by resolve; both ends fit in the body
    let slice = payload
        .body
        .slice(range.start as usize..=range.end as usize);
    let headers = response.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(range.size()));
    insert_header(headers, CONTENT_RANGE, &range.content_range(total));
    *response.body_mut() = slice;

    debug!(
        "Synthesized partial content {}-{}/{} ({} bytes)",
        range.start,
        range.end,
        total,
        range.size()
    );
    response
}

/// In-memory body buffer with a hard size limit
///
/// Every origin body passes through one of these before it is cached or
/// sliced. A strict buffer fails once the limit is crossed; a truncating one
/// keeps the first `limit` bytes and drops the rest.
#[derive(Debug)]
pub struct BoundedBody {
    buf: BytesMut,
    limit: u64,
    truncate: bool,
    truncated: bool,
}

impl BoundedBody {
    /// Create a buffer that refuses to grow past `limit` bytes
    ///
    /// `size_hint` (usually the origin `Content-Length`) is checked up front
    /// so oversized bodies fail before any byte is read.
    pub fn new(limit: u64, size_hint: Option<u64>) -> Result<Self> {
        let capacity = match size_hint {
            Some(hint) if hint > limit => {
                return Err(EdgeCacheError::PayloadTooLarge {
                    limit,
                    actual: hint,
                })
            }
            Some(hint) => hint as usize,
            None => 0,
        };
        Ok(BoundedBody {
            buf: BytesMut::with_capacity(capacity),
            limit,
            truncate: false,
            truncated: false,
        })
    }

    /// Create a buffer that silently stops growing at `limit` bytes
    pub fn truncating(limit: u64) -> Self {
        BoundedBody {
            buf: BytesMut::new(),
            limit,
            truncate: true,
            truncated: false,
        }
    }

    /// Append a chunk
    ///
    /// A strict buffer fails once the total exceeds the limit; a truncating
    /// buffer keeps what fits.
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        let next = self.buf.len() as u64 + chunk.len() as u64;
        if next > self.limit && self.truncate {
            let room = (self.limit - self.buf.len() as u64) as usize;
            self.buf.extend_from_slice(&chunk[..room]);
            self.truncated = true;
            return Ok(());
        }
        if next > self.limit {
            return Err(EdgeCacheError::PayloadTooLarge {
                limit: self.limit,
                actual: next,
            });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Whether a truncating buffer has dropped bytes
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}
