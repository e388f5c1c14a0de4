//! Start/stop control for the synthetic load generator.
//!
//! Every endpoint answers with the same [`PipelineState`] so a caller can
//! watch the bus and cache react to the load it just started or stopped.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::load_generator;
use crate::AppState;

use super::AppError;

const MAX_DURATION_SECS: u64 = 300;

/// Body of `POST /api/load/start`.  Missing fields take their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadRequest {
    /// Producer tasks; capped at the event queue capacity.
    pub workers: u32,
    pub duration_secs: u64,
    /// Share of transactions that end in an error, 0 to 100.
    pub error_pct: u8,
}

impl Default for LoadRequest {
    fn default() -> Self {
        Self {
            workers: 10,
            duration_secs: 30,
            error_pct: 2,
        }
    }
}

impl LoadRequest {
    fn check(&self, queue_capacity: usize) -> Result<(), AppError> {
        let max_workers = u32::try_from(queue_capacity).unwrap_or(u32::MAX);
        if self.workers == 0 || self.workers > max_workers {
            return Err(AppError::BadRequest(format!(
                "workers must be between 1 and the queue capacity ({queue_capacity})"
            )));
        }
        if self.duration_secs == 0 || self.duration_secs > MAX_DURATION_SECS {
            return Err(AppError::BadRequest(format!(
                "duration_secs must be between 1 and {MAX_DURATION_SECS}"
            )));
        }
        if self.error_pct > 100 {
            return Err(AppError::BadRequest("error_pct must be at most 100".into()));
        }
        Ok(())
    }
}

/// What the pipeline looks like right now.
#[derive(Debug, Serialize)]
pub struct PipelineState {
    pub running: bool,
    pub in_flight: usize,
    pub cached: usize,
    pub completed: u64,
    pub evicted: u64,
    pub queue_capacity: usize,
}

impl PipelineState {
    fn read(state: &AppState) -> Self {
        let counts = state.metrics.get_cumulative_counts();
        Self {
            running: state.load_running.load(Ordering::SeqCst),
            in_flight: state.metrics.in_flight(),
            cached: state.metrics.cached(),
            completed: counts.total,
            evicted: counts.evicted,
            queue_capacity: state.events.capacity(),
        }
    }
}

/// `POST /api/load/start`
pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoadRequest>,
) -> Result<Json<PipelineState>, AppError> {
    req.check(state.events.capacity())?;

    // Held until the handle is stored, so `stop_load` never misses it
    let mut slot = state.load_handle.lock().await;
    if state
        .load_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(AppError::AlreadyRunning);
    }

    tracing::info!(
        workers = req.workers,
        duration_secs = req.duration_secs,
        error_pct = req.error_pct,
        "synthetic load started"
    );
    *slot = Some(tokio::spawn(load_generator::run(
        state.load_running.clone(),
        state.events.clone(),
        req.workers,
        req.duration_secs,
        req.error_pct,
    )));
    drop(slot);

    Ok(Json(PipelineState::read(&state)))
}

/// `POST /api/load/stop`.  Stopping an idle generator is a no-op.
pub async fn stop(State(state): State<Arc<AppState>>) -> Json<PipelineState> {
    stop_load(&state).await;
    Json(PipelineState::read(&state))
}

/// `GET /api/load/status`
pub async fn status(State(state): State<Arc<AppState>>) -> Json<PipelineState> {
    Json(PipelineState::read(&state))
}

/// Clear the run flag and wait for the generator task to exit.
pub async fn stop_load(state: &AppState) {
    state.load_running.store(false, Ordering::SeqCst);
    let handle = state.load_handle.lock().await.take();
    if let Some(handle) = handle {
        if let Err(e) = handle.await {
            tracing::warn!("load generator task failed: {e}");
        }
    }
}
