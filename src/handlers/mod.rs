pub mod load;
pub mod metrics;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use transport_metrics::metrics::MetricsError;

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    Metrics(MetricsError),
    BadRequest(String),
    AlreadyRunning,
}

impl From<MetricsError> for AppError {
    fn from(e: MetricsError) -> Self {
        Self::Metrics(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Metrics(e) => {
                tracing::warn!("metrics request failed: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::AlreadyRunning => {
                (StatusCode::CONFLICT, "Synthetic load already running".into())
            }
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
