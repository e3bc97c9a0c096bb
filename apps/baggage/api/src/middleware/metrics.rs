//! HTTP request metrics.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Request, Response},
    middleware::Next,
};
use metrics::{counter, histogram};
use std::time::Instant;

/// Records:
/// - `http_requests_total` - Counter with method, route, status labels
/// - `http_request_duration_seconds` - Histogram with method, route labels
///
/// Unmatched requests are labeled `unmatched` so scanners cannot inflate cardinality.
pub async fn metrics_middleware(
    matched_path: Option<MatchedPath>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = matched_path
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status().as_u16().to_string();

    counter!(
        "http_requests_total",
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);

    histogram!(
        "http_request_duration_seconds",
        "method" => method,
        "route" => route
    )
    .record(duration.as_secs_f64());

    response
}

/// Count a rejected event body, labeled by its declared type
pub fn record_validation_error(event_type: &'static str) {
    counter!("validation_errors_total", "event_type" => event_type).increment(1);
}
