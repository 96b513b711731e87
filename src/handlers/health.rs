use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use super::AppError;
use crate::aggregate::Color;
use crate::bucket::now_ms;
use crate::reconcile::live_snapshot;
use crate::store::{Snapshot, StoreError};
use crate::AppState;

// ─── Response types ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub id: String,
    pub status: Status,
    pub last_hour_utc_ms: i64,
    pub last_ping_ms: u64,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub now_utc_ms: i64,
    pub services: Vec<ServiceHealth>,
}

/// Current status of every configured service.
///
/// The open bucket's live value (with fast-down) is preferred. Before
/// the first sample of a bucket lands, the latest finalized snapshot
/// stands in; with no history at all the service reads as down.
pub async fn health_report(state: &AppState, now: i64) -> Result<HealthReport, StoreError> {
    let open_bucket = state.clock.bucket_start(now);
    let mut services = Vec::with_capacity(state.config.services.len());

    for service in &state.config.services {
        let current = match live_snapshot(&state.accumulator, &service.id, now) {
            Some(live) => live,
            None => state
                .store
                .get_latest_snapshot(&service.id, now)
                .await?
                .unwrap_or(Snapshot {
                    hour_utc_ms: open_bucket,
                    ping_ms: 0,
                }),
        };

        services.push(ServiceHealth {
            id: service.id.clone(),
            status: if current.ping_ms > 0 { Status::Up } else { Status::Down },
            last_hour_utc_ms: current.hour_utc_ms,
            last_ping_ms: current.ping_ms,
            color: Color::for_ping(current.ping_ms, service.slow_threshold_ms),
        });
    }

    Ok(HealthReport {
        now_utc_ms: now,
        services,
    })
}

// ─── GET /health ─────────────────────────────────────────────────

pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthReport>, AppError> {
    Ok(Json(health_report(&state, now_ms()).await?))
}
