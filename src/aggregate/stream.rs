use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::bucket::now_ms;
use crate::handlers::health::health_report;
use crate::AppState;

/// How often the live feed pushes a fresh health report
const PUSH_INTERVAL: Duration = Duration::from_secs(5);

// ─── GET /health/stream ──────────────────────────────────────────
/// Server-Sent Events endpoint.
/// Pushes the `/health` payload as JSON every 5 s so the dashboard's
/// open-bucket cells update without polling.

pub async fn health_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(PUSH_INTERVAL);

    let stream = IntervalStream::new(interval).then(move |_| {
        let state = state.clone();
        async move {
            let json = match health_report(&state, now_ms()).await {
                Ok(report) => serde_json::to_string(&report).unwrap_or_default(),
                Err(e) => {
                    warn!(error = %e, "health stream tick failed");
                    serde_json::json!({ "error": "storage read failed" }).to_string()
                }
            };
            Ok(Event::default().data(json))
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
