pub mod health;
pub mod snapshots;
pub mod status;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed, missing or out-of-bound query parameters
    #[error("{0}")]
    BadRequest(String),

    #[error("storage: {0}")]
    Storage(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Storage(e) => {
                error!(error = %e, "storage read failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage read failed".to_owned(),
                )
            }
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
