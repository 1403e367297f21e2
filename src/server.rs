//! Inbound HTTP dispatcher
//!
//! Accepts HTTP/1 connections, routes each request with [`AssetRouter`] and
//! answers asset routes through [`AssetCache::resolve`] under a per-request
//! deadline.

use crate::coordinator::AssetCache;
use crate::error::{EdgeCacheError, Result};
use crate::router::{AssetRouter, Route};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

const HELLO_BODY: &str = "hello from server";

/// Request handler shared by every connection
pub struct EdgeHandler {
    cache: Arc<AssetCache>,
    router: AssetRouter,
    request_timeout: Duration,
}

impl EdgeHandler {
    pub fn new(cache: Arc<AssetCache>, router: AssetRouter, request_timeout: Duration) -> Self {
        EdgeHandler {
            cache,
            router,
            request_timeout,
        }
    }

    /// Produce the response for one inbound request
    pub async fn handle(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> Response<Full<Bytes>> {
        if method != Method::GET && method != Method::HEAD {
            let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
            return response;
        }

        let route = match self.router.route(uri.path(), uri.query()) {
            Ok(route) => route,
            Err(e) => return error_response(&e),
        };

        let response = match route {
            Route::Hello => text_response(StatusCode::OK, HELLO_BODY),
            Route::NotFound => text_response(StatusCode::NOT_FOUND, "not found"),
            Route::Asset(url) => self.resolve_asset(&url, headers).await,
        };

        if method == Method::HEAD {
            let (parts, _) = response.into_parts();
            return Response::from_parts(parts, Full::new(Bytes::new()));
        }
        response
    }

    async fn resolve_asset(&self, url: &str, headers: &HeaderMap) -> Response<Full<Bytes>> {
        debug!("Resolving asset url={}", url);
        match tokio::time::timeout(self.request_timeout, self.cache.resolve(url, headers)).await {
            Ok(Ok(response)) => response.map(Full::new),
            Ok(Err(e)) => error_response(&e),
            Err(_) => {
                warn!(
                    "Request deadline of {:?} exceeded for url={}",
                    self.request_timeout, url
                );
                error_response(&EdgeCacheError::Timeout(format!(
                    "no response within {:?}",
                    self.request_timeout
                )))
            }
        }
    }
}

/// Serve connections accepted on `listener` until the process exits
pub async fn serve(listener: TcpListener, handler: Arc<EdgeHandler>) -> Result<()> {
    info!("Edge cache listening on http://{}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let handler = Arc::clone(&handler);

        tokio::task::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let handler = Arc::clone(&handler);
                async move {
                    let response = handler.handle(req.method(), req.uri(), req.headers()).await;
                    Ok::<_, Infallible>(response)
                }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("Error serving connection from {}: {:?}", peer, err);
            }
        });
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn error_response(err: &EdgeCacheError) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(err.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        debug!("Request rejected: {}", err);
    }
    let mut response = Response::new(Full::new(Bytes::from(err.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EdgeCacheConfig;
    use crate::origin::{OriginFetcher, OriginResponse};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowOrigin {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl OriginFetcher for SlowOrigin {
        async fn fetch(&self, _url: &str, _headers: &HeaderMap) -> Result<OriginResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(OriginResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::from_static(b"payload"),
            })
        }
    }

    fn handler(delay: Duration, timeout: Duration) -> (EdgeHandler, Arc<SlowOrigin>) {
        let origin = Arc::new(SlowOrigin {
            calls: AtomicUsize::new(0),
            delay,
        });
        let store = Arc::new(MemoryStore::new(Duration::from_secs(60)));
        let cache = Arc::new(AssetCache::new(
            &EdgeCacheConfig::default(),
            store,
            origin.clone(),
        ));
        let router = AssetRouter::new("https", None).unwrap();
        (EdgeHandler::new(cache, router, timeout), origin)
    }

    async fn body_of(response: Response<Full<Bytes>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_hello_and_favicon() {
        let (handler, origin) = handler(Duration::ZERO, Duration::from_secs(5));
        let headers = HeaderMap::new();

        let hello = handler.handle(&Method::GET, &"/".parse().unwrap(), &headers).await;
        assert_eq!(hello.status(), StatusCode::OK);
        assert_eq!(body_of(hello).await.as_ref(), HELLO_BODY.as_bytes());

        let favicon = handler
            .handle(&Method::GET, &"/favicon.ico".parse().unwrap(), &headers)
            .await;
        assert_eq!(favicon.status(), StatusCode::NOT_FOUND);
        assert_eq!(origin.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let (handler, _origin) = handler(Duration::ZERO, Duration::from_secs(5));
        let response = handler
            .handle(&Method::POST, &"/o.example.com/a.bin".parse().unwrap(), &HeaderMap::new())
            .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "GET, HEAD");
    }

    #[tokio::test]
    async fn test_head_drops_body() {
        let (handler, _origin) = handler(Duration::ZERO, Duration::from_secs(5));
        let response = handler
            .handle(&Method::HEAD, &"/o.example.com/a.bin".parse().unwrap(), &HeaderMap::new())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[hyper::header::CONTENT_LENGTH], "7");
        assert!(body_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_deadline_returns_gateway_timeout() {
        let (handler, _origin) = handler(Duration::from_millis(500), Duration::from_millis(50));
        let uri: Uri = "/o.example.com/slow.bin".parse().unwrap();
        let response = handler.handle(&Method::GET, &uri, &HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        // The abandoned fetch must not leave its key locked
        let key = handler
            .cache
            .key_for("https://o.example.com/slow.bin", &HeaderMap::new())
            .unwrap();
        assert!(!handler.cache.lock().is_locked(&key.store_key()));
    }
}
