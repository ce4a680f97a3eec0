use thiserror::Error;

/// Errors from repository operations (used by trait definitions in flowpilot-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage unavailable")]
    Unavailable,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}
