//! Prometheus metrics for the transcode server.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "vscale_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vscale_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vscale_http_requests_in_flight";

    // Cache metrics
    pub const CACHE_LOOKUPS_TOTAL: &str = "vscale_cache_lookups_total";

    // Encoder metrics
    pub const TRANSCODES_TOTAL: &str = "vscale_transcodes_total";
    pub const ENCODERS_ACTIVE: &str = "vscale_encoders_active";
    pub const ENCODER_REJECTIONS_TOTAL: &str = "vscale_encoder_rejections_total";
    pub const STREAMED_BYTES_TOTAL: &str = "vscale_streamed_bytes_total";
    pub const TRANSCODE_DURATION_SECONDS: &str = "vscale_transcode_duration_seconds";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a cache lookup (`hit` or `miss`).
pub fn record_cache_lookup(result: &'static str) {
    counter!(names::CACHE_LOOKUPS_TOTAL, "result" => result).increment(1);
}

/// Record how a live transcode ended and how long it ran.
pub fn record_transcode(outcome: &'static str, duration: Duration) {
    counter!(names::TRANSCODES_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::TRANSCODE_DURATION_SECONDS, "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Record bytes delivered to a client from a live transcode.
pub fn record_streamed_bytes(bytes: u64) {
    counter!(names::STREAMED_BYTES_TOTAL).increment(bytes);
}

/// Record a request turned away because every encoder slot was taken.
pub fn record_encoder_rejection() {
    counter!(names::ENCODER_REJECTIONS_TOTAL).increment(1);
}

/// Holds the active-encoder gauge up while alive.
#[derive(Debug)]
pub struct ActiveEncoder(());

impl ActiveEncoder {
    pub fn track() -> Self {
        gauge!(names::ENCODERS_ACTIVE).increment(1.0);
        Self(())
    }
}

impl Drop for ActiveEncoder {
    fn drop(&mut self) {
        gauge!(names::ENCODERS_ACTIVE).decrement(1.0);
    }
}

static TRANSCODE_ROUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/\d+p/.+$").expect("route pattern is valid"));

/// Sanitize path for metrics labels (collapse per-file paths).
fn sanitize_path(path: &str) -> String {
    if TRANSCODE_ROUTE.is_match(path) {
        "/:width/:filename".to_string()
    } else {
        path.to_string()
    }
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
