use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Stamps every response with its handler wall time and logs one line
/// per API request. Static assets log at debug.
pub async fn timing_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();

    stamp(response.headers_mut(), elapsed);

    let status = response.status().as_u16();
    let us = elapsed.as_micros() as u64;
    if is_api_path(&path) {
        info!(status, %method, path = %path, us, "request");
    } else {
        debug!(status, %method, path = %path, us, "static request");
    }

    response
}

/// `X-Response-Time-Us` in whole microseconds, `Server-Timing` as
/// `total;dur=<ms>` with microsecond precision.
fn stamp(headers: &mut HeaderMap, elapsed: Duration) {
    headers.insert("x-response-time-us", HeaderValue::from(elapsed.as_micros() as u64));

    let dur_ms = elapsed.as_secs_f64() * 1000.0;
    if let Ok(value) = HeaderValue::from_str(&format!("total;dur={dur_ms:.3}")) {
        headers.insert("server-timing", value);
    }
}

/// SSE streams are long-lived and static assets are noise.
fn is_api_path(path: &str) -> bool {
    matches!(path, "/ping" | "/services" | "/health" | "/snapshots")
}
