use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::AppState;

/// Builds the full Axum `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Metrics ─────────────────────────────────────────────
        .route("/api/metrics", get(handlers::metrics::get_report))
        .route("/api/metrics/latency", get(handlers::metrics::get_latency))
        .route("/api/metrics/counts", get(handlers::metrics::get_counts))
        .route("/api/metrics/stream", get(handlers::metrics::report_stream))
        // ── Synthetic load control ──────────────────────────────
        .route("/api/load/start", post(handlers::load::start))
        .route("/api/load/stop", post(handlers::load::stop))
        .route("/api/load/status", get(handlers::load::status))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        .layer(CorsLayer::permissive())
}
