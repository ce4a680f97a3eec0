//! Plan submission, listing, and run start handlers.

use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use flowpilot_core::workflow::definition::{parse_plan_json, parse_plan_yaml};
use flowpilot_core::workflow::lint::lint_plan;
use flowpilot_types::plan::{Plan, PlanDefinition, PlanSummary};
use flowpilot_types::run::RunSnapshot;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Parse a submitted plan body. `application/yaml` (or `x-yaml`) selects YAML,
/// anything else is read as JSON.
fn parse_plan_body(headers: &HeaderMap, body: &[u8]) -> Result<PlanDefinition, AppError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| AppError::Validation("plan body must be UTF-8".to_string()))?;
    let is_yaml = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("yaml"));

    let definition = if is_yaml {
        parse_plan_yaml(text)?
    } else {
        parse_plan_json(text)?
    };
    Ok(definition)
}

/// POST /api/v1/plans - Validate and store a plan.
pub async fn create_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<Value>>), AppError> {
    let start = Instant::now();
    let definition = parse_plan_body(&headers, &body)?;
    let warnings: Vec<String> = lint_plan(&definition)
        .iter()
        .map(ToString::to_string)
        .collect();

    let plan_id = state.engine.create_plan(definition).await?;

    let resp = ApiResponse::success(json!({ "id": plan_id, "warnings": warnings }), start)
        .with_link("self", &format!("/api/v1/plans/{plan_id}"))
        .with_link("runs", &format!("/api/v1/plans/{plan_id}/runs"));
    Ok((StatusCode::CREATED, Json(resp)))
}

/// GET /api/v1/plans - Summaries of all plans.
pub async fn list_plans(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<PlanSummary>>>, AppError> {
    let start = Instant::now();
    let plans = state.engine.list().await?;
    Ok(Json(
        ApiResponse::success(plans, start).with_link("self", "/api/v1/plans"),
    ))
}

/// GET /api/v1/plans/{id} - Full plan.
pub async fn get_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Plan>>, AppError> {
    let start = Instant::now();
    let plan = state.engine.get_plan(id).await?;
    Ok(Json(
        ApiResponse::success(Plan::clone(&plan), start)
            .with_link("self", &format!("/api/v1/plans/{id}"))
            .with_link("runs", &format!("/api/v1/plans/{id}/runs")),
    ))
}

/// POST /api/v1/plans/{id}/runs - Start a run. The optional body is the
/// initial context object.
pub async fn start_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<Value>>), AppError> {
    let start = Instant::now();
    let context: Map<String, Value> = if body.iter().all(u8::is_ascii_whitespace) {
        Map::new()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("context must be a JSON object: {e}")))?
    };

    let run_id = state.engine.execute(id, context).await?;

    let resp = ApiResponse::success(json!({ "run_id": run_id, "plan_id": id }), start)
        .with_link("self", &format!("/api/v1/runs/{run_id}"));
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

/// GET /api/v1/plans/{id}/runs - All runs of a plan.
pub async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<RunSnapshot>>>, AppError> {
    let start = Instant::now();
    let runs = state.engine.list_runs(id).await?;
    Ok(Json(
        ApiResponse::success(runs, start).with_link("plan", &format!("/api/v1/plans/{id}")),
    ))
}
