use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use transport_metrics::metrics::{CumulativeCounts, EndpointStats, FlatReport};

use super::AppError;
use crate::AppState;

// ─── GET /api/metrics ────────────────────────────────────────────
/// The flattened `"{scope}/{metric}"` report as one JSON object.

pub async fn get_report(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FlatReport>, AppError> {
    Ok(Json(state.metrics.flat_report()?))
}

// ─── GET /api/metrics/latency ────────────────────────────────────

pub async fn get_latency(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<String, EndpointStats>>, AppError> {
    Ok(Json(state.metrics.get_latency_stats()?))
}

// ─── GET /api/metrics/counts ─────────────────────────────────────

pub async fn get_counts(State(state): State<Arc<AppState>>) -> Json<CumulativeCounts> {
    Json(state.metrics.get_cumulative_counts())
}

// ─── GET /api/metrics/stream ─────────────────────────────────────
/// Server-Sent Events endpoint.
/// Pushes the flat report as JSON every 500 ms.  A failed snapshot is
/// sent as an `error` event and the stream keeps going.

pub async fn report_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(Duration::from_millis(500));

    let stream = IntervalStream::new(interval).map(move |_| {
        let event = match state.metrics.flat_report() {
            Ok(report) => {
                let json = serde_json::to_string(&report).unwrap_or_default();
                Event::default().data(json)
            }
            Err(e) => Event::default().event("error").data(e.to_string()),
        };
        Ok(event)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
