//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use flowpilot_core::workflow::definition::PlanError;
use flowpilot_core::workflow::engine::EngineError;
use flowpilot_types::error::RepositoryError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Engine(EngineError),
    /// Malformed request body or parameters.
    Validation(String),
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl From<PlanError> for AppError {
    fn from(e: PlanError) -> Self {
        AppError::Engine(EngineError::Plan(e))
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, Option<serde_json::Value>) {
        match self {
            AppError::Engine(EngineError::PlanNotFound(_)) => {
                (StatusCode::NOT_FOUND, "PLAN_NOT_FOUND", None)
            }
            AppError::Engine(EngineError::RunNotFound(_)) => {
                (StatusCode::NOT_FOUND, "RUN_NOT_FOUND", None)
            }
            AppError::Engine(EngineError::Plan(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_PLAN", None)
            }
            AppError::Engine(EngineError::InvalidTransition { status, .. }) => (
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                Some(json!({ "status": status })),
            ),
            AppError::Engine(EngineError::Repository(RepositoryError::Conflict(_))) => {
                (StatusCode::CONFLICT, "CONFLICT", None)
            }
            AppError::Engine(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR", None),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", None),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Engine(e) => e.to_string(),
            AppError::Validation(msg) | AppError::Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, details) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, error = %self.message(), "request failed");
        }
        (status, Json(ApiResponse::error(code, self.message(), details))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_types::run::RunStatus;
    use uuid::Uuid;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn maps_engine_errors_to_status_codes() {
        let id = Uuid::now_v7();
        assert_eq!(
            status_of(EngineError::PlanNotFound(id).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(EngineError::RunNotFound(id).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(PlanError::Validation("empty".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(
                EngineError::InvalidTransition {
                    run_id: id,
                    action: "pause",
                    status: RunStatus::Completed,
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(EngineError::Repository(RepositoryError::Unavailable).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(AppError::Validation("bad context".into())),
            StatusCode::BAD_REQUEST
        );
    }
}
