use axum::{middleware as axum_mw, routing::get, Router};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::aggregate::stream;
use crate::handlers;
use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router` with all routes, middleware, and static serving.
pub fn create_router(state: Arc<AppState>, static_dir: &Path) -> Router {
    Router::new()
        // ── Status ──────────────────────────────────────────────
        .route("/ping", get(handlers::status::ping))
        .route("/services", get(handlers::status::services))
        // ── Live view ───────────────────────────────────────────
        .route("/health", get(handlers::health::health))
        .route("/health/stream", get(stream::health_stream))
        // ── History ─────────────────────────────────────────────
        .route("/snapshots", get(handlers::snapshots::snapshots))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Serve the dashboard ─────────────────────────────────
        .fallback_service(ServeDir::new(static_dir))
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CorsLayer::permissive())
}
