use std::time::Instant;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/health
pub async fn health(State(state): State<AppState>) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let plans = state.engine.list().await?;
    Ok(Json(ApiResponse::success(
        json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "plans": plans.len(),
            "data_dir": state.data_dir.display().to_string(),
            "event_subscribers": state.engine.event_bus().receiver_count(),
        }),
        start,
    )))
}
