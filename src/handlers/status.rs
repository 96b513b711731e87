use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::bucket::now_ms;
use crate::config::ServiceConfig;
use crate::AppState;

// ─── Response types ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub ok: bool,
    pub now_utc_ms: i64,
    pub bucket_size_ms: i64,
    /// Display label for the dashboard; all timestamps stay UTC
    pub timezone: String,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub tags: Vec<String>,
    pub slow_threshold_ms: u64,
    pub timeout_ms: u64,
}

impl From<&ServiceConfig> for ServiceInfo {
    fn from(s: &ServiceConfig) -> Self {
        Self {
            id: s.id.clone(),
            name: s.name.clone(),
            url: s.url.clone(),
            tags: s.tags.clone(),
            slow_threshold_ms: s.slow_threshold_ms,
            timeout_ms: s.timeout_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ServicesResponse {
    pub services: Vec<ServiceInfo>,
}

// ─── GET /ping ───────────────────────────────────────────────────

pub async fn ping(State(state): State<Arc<AppState>>) -> Json<PingResponse> {
    Json(PingResponse {
        ok: true,
        now_utc_ms: now_ms(),
        bucket_size_ms: state.clock.width_ms(),
        timezone: state.config.timezone.clone(),
    })
}

// ─── GET /services ───────────────────────────────────────────────

pub async fn services(State(state): State<Arc<AppState>>) -> Json<ServicesResponse> {
    Json(ServicesResponse {
        services: state.config.services.iter().map(ServiceInfo::from).collect(),
    })
}
