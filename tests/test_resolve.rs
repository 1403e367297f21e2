//! Integration tests for AssetCache::resolve against a mock origin

use edge_media_cache::{AssetCache, EdgeCacheConfig, EdgeCacheError, HttpOrigin, MemoryStore};
use http::header::{
    HeaderValue, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE, RANGE,
};
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BODY: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn build_cache(config: &EdgeCacheConfig, max_body: u64) -> AssetCache {
    let mut origin = HttpOrigin::new(Duration::from_secs(5), max_body).unwrap();
    if let Some(token) = &config.resizer_token {
        origin = origin.with_bearer_token(token.clone());
    }
    let store = Arc::new(MemoryStore::new(config.store_ttl()));
    AssetCache::new(config, store, Arc::new(origin))
}

fn cache() -> AssetCache {
    build_cache(&EdgeCacheConfig::default(), 1024 * 1024)
}

fn range(value: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RANGE, HeaderValue::from_static(value));
    headers
}

#[tokio::test]
async fn test_whole_object_cached_with_immutable_headers() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/clip.mp4"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(BODY.to_vec())
                .insert_header("Content-Type", "video/mp4"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let cache = cache();
    let url = format!("{}/media/clip.mp4", mock_server.uri());

    for _ in 0..3 {
        let response = cache.resolve(&url, &HeaderMap::new()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), BODY);
        assert_eq!(response.headers()[CONTENT_TYPE], "video/mp4");
        assert_eq!(
            response.headers()[CACHE_CONTROL],
            "public, max-age=604800, immutable"
        );
        assert_eq!(response.headers()[CONTENT_DISPOSITION], "inline");
        assert_eq!(response.headers()[CONTENT_LENGTH], BODY.len().to_string().as_str());
        assert_eq!(response.headers()[ACCEPT_RANGES], "bytes");
    }

    let stats = cache.metrics().get_stats();
    assert_eq!(stats.origin_fetches, 1);
    assert_eq!(stats.whole_hits, 2);
}

#[tokio::test]
async fn test_missing_content_type_defaults_to_octet_stream() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blob"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY.to_vec()))
        .mount(&mock_server)
        .await;

    let cache = cache();
    let response = cache
        .resolve(&format!("{}/blob", mock_server.uri()), &HeaderMap::new())
        .await
        .unwrap();
    assert_eq!(response.headers()[CONTENT_TYPE], "application/octet-stream");
}

#[tokio::test]
async fn test_concurrent_misses_share_one_fetch() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(BODY.to_vec())
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let cache = Arc::new(cache());
    let url = format!("{}/big.bin", mock_server.uri());

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        let url = url.clone();
        handles.push(tokio::spawn(async move {
            cache.resolve(&url, &HeaderMap::new()).await
        }));
    }

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), BODY);
    }

    let stats = cache.metrics().get_stats();
    assert_eq!(stats.origin_fetches, 1);
    assert_eq!(stats.coalesced + stats.whole_hits, 9);
    assert_eq!(stats.cache_misses, stats.coalesced + 1);
    assert!((stats.cache_hit_rate() - 90.0).abs() < 0.001);
    assert_eq!(cache.lock().held_count(), 0);
}

#[tokio::test]
async fn test_error_status_passes_through_and_is_retried() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.jpg"))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let cache = cache();
    let url = format!("{}/flaky.jpg", mock_server.uri());

    for _ in 0..2 {
        let response = cache.resolve(&url, &HeaderMap::new()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.body().as_ref(), b"try later");
        assert!(response.headers().get(CACHE_CONTROL).is_none());
    }
    assert_eq!(cache.metrics().get_stats().origin_passthroughs, 2);
}

#[tokio::test]
async fn test_range_synthesized_from_cached_whole_object() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY.to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let cache = cache();
    let url = format!("{}/clip.mp4", mock_server.uri());
    cache.resolve(&url, &HeaderMap::new()).await.unwrap();

    let response = cache.resolve(&url, &range("bytes=0-9")).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.body().as_ref(), b"0123456789");
    assert_eq!(
        response.headers()[CONTENT_RANGE],
        format!("bytes 0-9/{}", BODY.len()).as_str()
    );
    assert_eq!(response.headers()[CONTENT_LENGTH], "10");

    let open = cache.resolve(&url, &range("bytes=30-")).await.unwrap();
    assert_eq!(open.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(open.body().as_ref(), &BODY[30..]);
}

#[tokio::test]
async fn test_bad_range_degrades_to_whole_object() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY.to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let cache = cache();
    let url = format!("{}/clip.mp4", mock_server.uri());
    cache.resolve(&url, &HeaderMap::new()).await.unwrap();

    for bad in ["bytes=abc", "bytes=50-60", "bytes=9-3", "items=0-1", "bytes=-5"] {
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_str(bad).unwrap());
        let response = cache.resolve(&url, &headers).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "range {}", bad);
        assert_eq!(response.body().as_ref(), BODY, "range {}", bad);
        assert!(response.headers().get(CONTENT_RANGE).is_none());
    }
}

#[tokio::test]
async fn test_range_miss_forwards_range_and_stores_variant() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/movie.mp4"))
        .and(header("range", "bytes=0-3"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(b"0123".to_vec())
                .insert_header("Content-Range", "bytes 0-3/1000")
                .insert_header("Content-Type", "video/mp4"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let cache = cache();
    let url = format!("{}/movie.mp4", mock_server.uri());

    for _ in 0..2 {
        let response = cache.resolve(&url, &range("bytes=0-3")).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.body().as_ref(), b"0123");
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 0-3/1000");
        assert_eq!(response.headers()[CONTENT_TYPE], "video/mp4");
    }

    let stats = cache.metrics().get_stats();
    assert_eq!(stats.range_hits, 1);
    assert_eq!(stats.whole_hits, 0);
}

#[tokio::test]
async fn test_full_answer_to_range_miss_fills_whole_entry() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/movie.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY.to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let cache = cache();
    let url = format!("{}/movie.mp4", mock_server.uri());

    let ranged = cache.resolve(&url, &range("bytes=2-5")).await.unwrap();
    assert_eq!(ranged.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(ranged.body().as_ref(), b"2345");

    let whole = cache.resolve(&url, &HeaderMap::new()).await.unwrap();
    assert_eq!(whole.status(), StatusCode::OK);
    assert_eq!(whole.body().as_ref(), BODY);
}

#[tokio::test]
async fn test_range_rejected_by_origin_degrades_to_whole_object() {
    let mock_server = MockServer::start().await;
    // Mounted first, so it answers every request that carries a Range header
    Mock::given(method("GET"))
        .and(path("/short.bin"))
        .and(header_exists("range"))
        .respond_with(ResponseTemplate::new(416))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/short.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY.to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let cache = cache();
    let url = format!("{}/short.bin", mock_server.uri());

    let cold = cache.resolve(&url, &range("bytes=100-")).await.unwrap();
    assert_eq!(cold.status(), StatusCode::OK);
    assert_eq!(cold.body().as_ref(), BODY);
    assert!(cold.headers().get(CONTENT_RANGE).is_none());

    let warm = cache.resolve(&url, &range("bytes=100-")).await.unwrap();
    assert_eq!(warm.status(), StatusCode::OK);
    assert_eq!(warm.body().as_ref(), BODY);

    let sliced = cache.resolve(&url, &range("bytes=0-3")).await.unwrap();
    assert_eq!(sliced.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(sliced.body().as_ref(), b"0123");
    assert_eq!(cache.metrics().get_stats().origin_passthroughs, 0);
}

#[tokio::test]
async fn test_query_order_shares_entry() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img.webp"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY.to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let cache = cache();
    let base = mock_server.uri();
    cache
        .resolve(&format!("{}/img.webp?w=10&h=20", base), &HeaderMap::new())
        .await
        .unwrap();
    let response = cache
        .resolve(&format!("{}/img.webp?h=20&w=10", base), &HeaderMap::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private.png"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY.to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = EdgeCacheConfig {
        resizer_token: Some("s3cret".to_string()),
        ..Default::default()
    };
    let cache = build_cache(&config, 1024 * 1024);
    let response = cache
        .resolve(&format!("{}/private.png", mock_server.uri()), &HeaderMap::new())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_transport_failure_releases_lock() {
    let cache = cache();
    // Nothing listens on port 1
    let url = "http://127.0.0.1:1/unreachable.bin";

    let err = cache.resolve(url, &HeaderMap::new()).await.unwrap_err();
    assert!(err.is_origin_failure());
    assert_eq!(err.to_http_status(), 502);

    let key = cache.key_for(url, &HeaderMap::new()).unwrap();
    assert!(cache.lock().try_acquire(&key.store_key()).is_some());
    assert_eq!(cache.metrics().get_stats().origin_failures, 1);
}

#[tokio::test]
async fn test_oversized_payload_is_rejected() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/huge.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY.to_vec()))
        .mount(&mock_server)
        .await;

    let cache = build_cache(&EdgeCacheConfig::default(), 8);
    let url = format!("{}/huge.bin", mock_server.uri());
    let err = cache.resolve(&url, &HeaderMap::new()).await.unwrap_err();
    assert!(matches!(err, EdgeCacheError::PayloadTooLarge { limit: 8, .. }));

    let key = cache.key_for(&url, &HeaderMap::new()).unwrap();
    assert!(!cache.lock().is_locked(&key.store_key()));
}

#[tokio::test]
async fn test_oversized_error_page_is_relayed_truncated() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken.bin"))
        .respond_with(ResponseTemplate::new(500).set_body_bytes(BODY.to_vec()))
        .mount(&mock_server)
        .await;

    let cache = build_cache(&EdgeCacheConfig::default(), 8);
    let url = format!("{}/broken.bin", mock_server.uri());
    let response = cache.resolve(&url, &HeaderMap::new()).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body().as_ref(), &BODY[..8]);
    assert_eq!(response.headers()[CONTENT_LENGTH], "8");
}
