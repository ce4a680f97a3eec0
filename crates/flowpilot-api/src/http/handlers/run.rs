//! Run status and control handlers.
//!
//! Control endpoints answer with the run's snapshot after the transition so
//! the caller sees the new status without another round-trip.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use uuid::Uuid;

use flowpilot_types::run::RunSnapshot;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

fn snapshot_response(snapshot: RunSnapshot, start: Instant) -> Json<ApiResponse<RunSnapshot>> {
    let run_id = snapshot.run_id;
    let plan_id = snapshot.plan_id;
    Json(
        ApiResponse::success(snapshot, start)
            .with_link("self", &format!("/api/v1/runs/{run_id}"))
            .with_link("plan", &format!("/api/v1/plans/{plan_id}")),
    )
}

/// GET /api/v1/runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RunSnapshot>>, AppError> {
    let start = Instant::now();
    let snapshot = state.engine.status(id).await?;
    Ok(snapshot_response(snapshot, start))
}

/// POST /api/v1/runs/{id}/pause
pub async fn pause_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RunSnapshot>>, AppError> {
    let start = Instant::now();
    state.engine.pause(id).await?;
    Ok(snapshot_response(state.engine.status(id).await?, start))
}

/// POST /api/v1/runs/{id}/resume
pub async fn resume_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RunSnapshot>>, AppError> {
    let start = Instant::now();
    state.engine.resume(id).await?;
    Ok(snapshot_response(state.engine.status(id).await?, start))
}

/// POST /api/v1/runs/{id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RunSnapshot>>, AppError> {
    let start = Instant::now();
    state.engine.cancel(id).await?;
    Ok(snapshot_response(state.engine.status(id).await?, start))
}
