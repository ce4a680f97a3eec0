//! Axum router configuration with middleware.
//!
//! REST routes are under `/api/v1/`, the event WebSocket at `/ws/events`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Plans
        .route(
            "/plans",
            post(handlers::plan::create_plan).get(handlers::plan::list_plans),
        )
        .route("/plans/{id}", get(handlers::plan::get_plan))
        .route(
            "/plans/{id}/runs",
            post(handlers::plan::start_run).get(handlers::plan::list_runs),
        )
        // Runs
        .route("/runs/{id}", get(handlers::run::get_run))
        .route("/runs/{id}/pause", post(handlers::run::pause_run))
        .route("/runs/{id}/resume", post(handlers::run::resume_run))
        .route("/runs/{id}/cancel", post(handlers::run::cancel_run))
        // Health
        .route("/health", get(handlers::health::health));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/ws/events", get(handlers::ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use flowpilot_core::actuator::{BoxActuator, ScriptedActuator};
    use flowpilot_types::action::ActionResult;
    use flowpilot_types::config::EngineConfig;
    use flowpilot_types::run::RunStatus;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;

    fn state_with(actuator: ScriptedActuator) -> AppState {
        AppState::with_actuator(
            EngineConfig {
                retry_backoff_base_ms: 0,
                ..Default::default()
            },
            BoxActuator::new(actuator),
            PathBuf::from("/tmp/flowpilot-test"),
        )
    }

    async fn send(state: &AppState, method: &str, uri: &str, body: Option<(&str, String)>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some((content_type, body)) => {
                builder = builder.header(header::CONTENT_TYPE, content_type);
                Body::from(body)
            }
            None => Body::empty(),
        };
        let response = build_router(state.clone())
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn json_body(value: Value) -> Option<(&'static str, String)> {
        Some(("application/json", value.to_string()))
    }

    async fn create_plan(state: &AppState, plan: Value) -> Uuid {
        let (status, body) = send(state, "POST", "/api/v1/plans", json_body(plan)).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        serde_json::from_value(body["data"]["id"].clone()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let state = state_with(ScriptedActuator::new());
        let (status, body) = send(&state, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");
        assert!(body["meta"]["request_id"].is_string());
    }

    #[tokio::test]
    async fn create_and_fetch_plan() {
        let state = state_with(ScriptedActuator::new());
        let plan_id = create_plan(
            &state,
            json!({"name": "login", "steps": [{"id": "a", "type": "action", "action": "tap"}]}),
        )
        .await;

        let (status, body) = send(&state, "GET", &format!("/api/v1/plans/{plan_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "login");
        assert_eq!(body["_links"]["runs"], format!("/api/v1/plans/{plan_id}/runs"));

        let (_, body) = send(&state, "GET", "/api/v1/plans", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn yaml_plans_are_accepted() {
        let state = state_with(ScriptedActuator::new());
        let yaml = "name: y\nsteps:\n  - id: w\n    type: wait\n    duration_ms: 1\n".to_string();
        let (status, _) = send(&state, "POST", "/api/v1/plans", Some(("application/yaml", yaml))).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn forward_dependency_is_reported_as_warning() {
        let state = state_with(ScriptedActuator::new());
        let plan = json!({"name": "fwd", "steps": [
            {"id": "a", "type": "action", "action": "tap", "dependencies": ["b"]},
            {"id": "b", "type": "action", "action": "tap"}
        ]});
        let (status, body) = send(&state, "POST", "/api/v1/plans", json_body(plan)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["warnings"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_plan_is_bad_request() {
        let state = state_with(ScriptedActuator::new());
        let plan = json!({"name": "bad", "steps": [
            {"id": "a", "type": "action", "action": "tap", "dependencies": ["ghost"]}
        ]});
        let (status, body) = send(&state, "POST", "/api/v1/plans", json_body(plan)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "INVALID_PLAN");

        let (status, _) = send(
            &state,
            "POST",
            "/api/v1/plans",
            Some(("application/json", "{not json".to_string())),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let state = state_with(ScriptedActuator::new());
        let id = Uuid::now_v7();
        let (status, body) = send(&state, "GET", &format!("/api/v1/runs/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "RUN_NOT_FOUND");

        let (status, _) = send(&state, "POST", &format!("/api/v1/plans/{id}/runs"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn run_lifecycle_over_http() {
        let state = state_with(
            ScriptedActuator::new().with_fallback("broken", ActionResult::failed("boom")),
        );
        let plan_id = create_plan(
            &state,
            json!({"name": "run", "steps": [
                {"id": "a", "type": "action", "action": "type_text",
                 "parameters": {"text": "{{ user }}"}},
                {"id": "b", "type": "action", "action": "broken"}
            ]}),
        )
        .await;

        let (status, body) = send(
            &state,
            "POST",
            &format!("/api/v1/plans/{plan_id}/runs"),
            json_body(json!({"user": "ada"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id: Uuid = serde_json::from_value(body["data"]["run_id"].clone()).unwrap();

        let snapshot = state.engine.wait(run_id).await.unwrap();
        assert_eq!(snapshot.status, RunStatus::Failed);

        let (status, body) = send(&state, "GET", &format!("/api/v1/runs/{run_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "failed");
        assert_eq!(body["data"]["step_results"]["a"]["status"], "completed");

        let (status, body) = send(&state, "POST", &format!("/api/v1/runs/{run_id}/resume"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errors"][0]["details"]["status"], "failed");

        let (_, body) = send(&state, "GET", &format!("/api/v1/plans/{plan_id}/runs"), None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn non_object_context_is_rejected() {
        let state = state_with(ScriptedActuator::new());
        let plan_id = create_plan(&state, json!({"name": "ctx", "steps": []})).await;
        let (status, body) = send(
            &state,
            "POST",
            &format!("/api/v1/plans/{plan_id}/runs"),
            json_body(json!([1, 2, 3])),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");
    }
}
