//! Prometheus metrics exposition
//!
//! - `auth_http_requests_total` (counter): labels `route`, `status`
//! - `auth_http_request_duration_seconds` (histogram): label `route`
//! - `auth_logins_total` (counter): labels `provider`, `outcome`
//! - `auth_device_codes_issued_total` (counter)
//! - `auth_device_redemptions_total` (counter): label `outcome`
//! - `auth_store_evictions_total` (counter): label `store`

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::{Instrument, debug, info_span};

const REQUEST_DURATION: &str = "auth_http_request_duration_seconds";

/// 5 ms to 30 s; callbacks wait on two provider round trips.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), DURATION_BUCKETS)
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed HTTP request.
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "auth_http_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(REQUEST_DURATION, "route" => route.to_string()).record(duration_secs);
}

/// Record a login step: `started`, `success`, `denied`, `failed`.
pub fn record_login(provider: &str, outcome: &'static str) {
    metrics::counter!(
        "auth_logins_total",
        "provider" => provider.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_code_issued() {
    metrics::counter!("auth_device_codes_issued_total").increment(1);
}

/// Record a redemption attempt: `success`, `invalid_code`, `invalid_factor`, `timeout`, `error`.
pub fn record_redemption(outcome: &'static str) {
    metrics::counter!("auth_device_redemptions_total", "outcome" => outcome).increment(1);
}

/// Record entries evicted by the sweep task.
pub fn record_evictions(store: &'static str, count: usize) {
    if count > 0 {
        metrics::counter!("auth_store_evictions_total", "store" => store).increment(count as u64);
    }
}

/// Middleware: request id span, in-flight accounting, request metrics.
///
/// The route label is the matched route template (`/auth/{provider}/login`),
/// never the raw path, to keep label cardinality bounded.
pub async fn track_requests(
    State(in_flight): State<Arc<AtomicU64>>,
    req: Request,
    next: Next,
) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        route = %route,
    );

    in_flight.fetch_add(1, Ordering::Relaxed);
    let start = Instant::now();
    let response = next.run(req).instrument(span.clone()).await;
    let elapsed = start.elapsed();
    in_flight.fetch_sub(1, Ordering::Relaxed);

    let status = response.status().as_u16();
    record_request(&route, status, elapsed.as_secs_f64());
    span.in_scope(|| debug!(status, duration_ms = elapsed.as_millis() as u64, "request finished"));
    response
}
