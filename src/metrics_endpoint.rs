//! Metrics HTTP Endpoint
//!
//! Serves the cache counters on a separate port:
//!
//! - `/metrics`: Prometheus text exposition format
//! - `/health`: JSON liveness document with a few headline numbers
//! - `/`: small index page

use crate::metrics::{CacheMetrics, MetricsSnapshot};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics endpoint server
pub struct MetricsEndpoint {
    metrics: Arc<CacheMetrics>,
    addr: SocketAddr,
}

impl MetricsEndpoint {
    /// Create a new metrics endpoint
    ///
    /// # Arguments
    /// * `metrics` - Shared metrics collector
    /// * `addr` - Address to bind the HTTP server to
    pub fn new(metrics: Arc<CacheMetrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Bind and serve until the process is terminated
    pub async fn start(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics endpoint listening on http://{}", self.addr);
        info!("Metrics available at http://{}/metrics", self.addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let metrics = Arc::clone(&self.metrics);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let metrics = Arc::clone(&metrics);
                    async move { handle_request(req, metrics).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<CacheMetrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(route(req.uri().path(), &metrics))
}

fn route(path: &str, metrics: &CacheMetrics) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => {
            let body = format_prometheus_metrics(&metrics.get_stats());
            respond(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body)
        }
        "/health" => {
            let body = health_body(&metrics.get_stats());
            respond(StatusCode::OK, "application/json", body)
        }
        "/" => respond(StatusCode::OK, "text/html; charset=utf-8", INDEX_PAGE.to_string()),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "404 Not Found".to_string()),
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Format metrics in Prometheus exposition format
fn format_prometheus_metrics(snapshot: &MetricsSnapshot) -> String {
    let counters: [(&str, &str, u64); 13] = [
        ("requests_total", "Total number of resolve calls", snapshot.total_requests),
        ("failed_requests_total", "Resolve calls that ended in an error", snapshot.failed_requests),
        ("whole_hits_total", "Requests served from a whole-object entry", snapshot.whole_hits),
        ("range_hits_total", "Requests served from a range-variant entry", snapshot.range_hits),
        (
            "cache_misses_total",
            "Lookups that missed before taking the fetch lock",
            snapshot.cache_misses,
        ),
        ("coalesced_total", "Misses answered by another request's fetch", snapshot.coalesced),
        ("store_errors_total", "Failed cache store reads and writes", snapshot.store_errors),
        (
            "origin_fetches_total",
            "Origin fetches that returned a response",
            snapshot.origin_fetches,
        ),
        (
            "origin_passthroughs_total",
            "Origin answers relayed without caching",
            snapshot.origin_passthroughs,
        ),
        (
            "origin_failures_total",
            "Origin fetches that failed in transport",
            snapshot.origin_failures,
        ),
        ("bytes_from_origin_total", "Total bytes received from origin", snapshot.bytes_from_origin),
        ("bytes_from_cache_total", "Total bytes served from cache", snapshot.bytes_from_cache),
        ("bytes_to_client_total", "Total bytes sent to clients", snapshot.bytes_to_client),
    ];
    let gauges: [(&str, &str, f64); 3] = [
        ("cache_hit_rate", "Cache hit rate percentage", snapshot.cache_hit_rate()),
        (
            "request_duration_ms_avg",
            "Average resolve duration in milliseconds",
            snapshot.avg_request_duration_ms(),
        ),
        (
            "origin_duration_ms_avg",
            "Average origin fetch duration in milliseconds",
            snapshot.avg_origin_duration_ms(),
        ),
    ];

    let mut output = String::new();
    for (name, help, value) in counters {
        let _ = writeln!(output, "# HELP edge_cache_{} {}", name, help);
        let _ = writeln!(output, "# TYPE edge_cache_{} counter", name);
        let _ = writeln!(output, "edge_cache_{} {}\n", name, value);
    }
    for (name, help, value) in gauges {
        let _ = writeln!(output, "# HELP edge_cache_{} {}", name, help);
        let _ = writeln!(output, "# TYPE edge_cache_{} gauge", name);
        let _ = writeln!(output, "edge_cache_{} {:.2}\n", name, value);
    }
    output
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    total_requests: u64,
    cache_hit_rate: f64,
    origin_failures: u64,
}

fn health_body(snapshot: &MetricsSnapshot) -> String {
    let health = Health {
        status: "healthy",
        total_requests: snapshot.total_requests,
        cache_hit_rate: snapshot.cache_hit_rate(),
        origin_failures: snapshot.origin_failures,
    };
    serde_json::to_string(&health).unwrap_or_else(|_| r#"{"status":"healthy"}"#.to_string())
}

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Edge Media Cache Metrics</title>
    <style>
        body { font-family: Arial, sans-serif; margin: 40px; }
        .endpoint { margin: 10px 0; padding: 10px; background: #f5f5f5; border-radius: 4px; }
    </style>
</head>
<body>
    <h1>Edge Media Cache</h1>
    <div class="endpoint"><a href="/metrics">/metrics</a> - Prometheus format metrics</div>
    <div class="endpoint"><a href="/health">/health</a> - Health check</div>
</body>
</html>"#;
