use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AppError;
use crate::bucket::{is_calendar_instant, now_ms, BucketClock};
use crate::config::Config;
use crate::reconcile;
use crate::store::ServiceSnapshots;
use crate::AppState;

// ─── Request / response types ────────────────────────────────────

/// Raw query string. Everything arrives as text so each bad field
/// gets its own message instead of a generic rejection.
#[derive(Debug, Default, Deserialize)]
pub struct SnapshotsQuery {
    /// Comma-separated service ids
    pub service_id: Option<String>,
    pub from_utc_ms: Option<String>,
    pub to_utc_ms: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub service_ids: Vec<String>,
    pub from: i64,
    pub to: i64,
    pub limit: usize,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SnapshotsResponse {
    Single(ServiceSnapshots),
    Multi { results: Vec<ServiceSnapshots> },
}

// ─── Validation ──────────────────────────────────────────────────

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, AppError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("{name} is required")))
}

fn parse_ms(raw: &str, name: &str) -> Result<i64, AppError> {
    let ms: i64 = raw
        .parse()
        .map_err(|_| AppError::BadRequest(format!("{name} must be an integer (epoch ms)")))?;
    if !is_calendar_instant(ms) {
        return Err(AppError::BadRequest(format!("{name} is outside the supported time range")));
    }
    Ok(ms)
}

impl SnapshotsQuery {
    pub fn validate(&self, config: &Config, clock: BucketClock) -> Result<RangeRequest, AppError> {
        let ids_raw = required(&self.service_id, "service_id")?;
        let from = parse_ms(required(&self.from_utc_ms, "from_utc_ms")?, "from_utc_ms")?;
        let to = parse_ms(required(&self.to_utc_ms, "to_utc_ms")?, "to_utc_ms")?;

        if from > to {
            return Err(AppError::BadRequest(
                "from_utc_ms must be <= to_utc_ms".into(),
            ));
        }

        let service_ids: Vec<String> = ids_raw
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .collect();
        if service_ids.is_empty() {
            return Err(AppError::BadRequest("service_id is required".into()));
        }
        if let Some(unknown) = service_ids.iter().find(|id| config.service(id).is_none()) {
            return Err(AppError::BadRequest(format!("unknown service_id '{unknown}'")));
        }

        let max_buckets = config.bucket.max_query_buckets();
        let too_wide = |requested: String| {
            AppError::BadRequest(format!(
                "range spans {requested} buckets, at most {max_buckets} allowed"
            ))
        };
        match clock.buckets_in_range(from, to) {
            Some(requested) if requested <= max_buckets => {}
            Some(requested) => return Err(too_wide(requested.to_string())),
            None => return Err(too_wide("too many".into())),
        }

        let limit = match self.limit.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            None => max_buckets,
            Some(raw) => match raw.parse::<i64>() {
                Ok(n) if n >= 1 => n.min(max_buckets),
                _ => {
                    return Err(AppError::BadRequest(
                        "limit must be a positive integer".into(),
                    ))
                }
            },
        };

        Ok(RangeRequest {
            service_ids,
            from,
            to,
            limit: limit as usize,
        })
    }
}

// ─── GET /snapshots ──────────────────────────────────────────────

pub async fn snapshots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SnapshotsQuery>,
) -> Result<Json<SnapshotsResponse>, AppError> {
    let req = query.validate(&state.config, state.clock)?;

    let mut results = reconcile::read_range(
        &state.store,
        &state.accumulator,
        &req.service_ids,
        req.from,
        req.to,
        req.limit,
        now_ms(),
    )
    .await?;

    let response = if results.len() == 1 {
        SnapshotsResponse::Single(results.remove(0))
    } else {
        SnapshotsResponse::Multi { results }
    };
    Ok(Json(response))
}
