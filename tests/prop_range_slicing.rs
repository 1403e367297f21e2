// Feature: edge-media-cache, Property 2: Partial content correctness
//
// Property: For any payload and any satisfiable `bytes=<start>-<end?>`
// range, the synthesized response is a 206 whose body is exactly the
// inclusive slice [start, end] and whose headers describe that slice.

use bytes::Bytes;
use edge_media_cache::models::CachedPayload;
use edge_media_cache::range::synthesize;
use http::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use http::StatusCode;
use proptest::prelude::*;

fn payload(body: Vec<u8>) -> CachedPayload {
    CachedPayload::from_origin(200, Some("video/mp4"), None, Bytes::from(body))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 2: closed ranges
    #[test]
    fn prop_closed_range_slices_exactly(
        body in prop::collection::vec(any::<u8>(), 1..4096),
        a in any::<prop::sample::Index>(),
        b in any::<prop::sample::Index>(),
    ) {
        let total = body.len();
        let (start, end) = {
            let (x, y) = (a.index(total), b.index(total));
            (x.min(y), x.max(y))
        };
        let header = format!("bytes={}-{}", start, end);
        let response = synthesize(&payload(body.clone()), Some(&header));

        prop_assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        prop_assert_eq!(response.body().as_ref(), &body[start..=end]);
        let expected_range = format!("bytes {}-{}/{}", start, end, total);
        prop_assert_eq!(
            response.headers()[CONTENT_RANGE].to_str().unwrap(),
            expected_range.as_str()
        );
        let expected_len = (end - start + 1).to_string();
        prop_assert_eq!(
            response.headers()[CONTENT_LENGTH].to_str().unwrap(),
            expected_len.as_str()
        );
        prop_assert_eq!(response.headers()[CONTENT_TYPE].to_str().unwrap(), "video/mp4");
    }

    /// Property 2 (open range): `bytes=<start>-` runs to the last byte
    #[test]
    fn prop_open_range_runs_to_end(
        body in prop::collection::vec(any::<u8>(), 1..4096),
        a in any::<prop::sample::Index>(),
    ) {
        let total = body.len();
        let start = a.index(total);
        let header = format!("bytes={}-", start);
        let response = synthesize(&payload(body.clone()), Some(&header));

        prop_assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        prop_assert_eq!(response.body().as_ref(), &body[start..]);
        let expected_range = format!("bytes {}-{}/{}", start, total - 1, total);
        prop_assert_eq!(
            response.headers()[CONTENT_RANGE].to_str().unwrap(),
            expected_range.as_str()
        );
    }
}
