//! HTTP/REST API layer for flowpilot.
//!
//! Axum-based REST API at `/api/v1/` with envelope response format, plus the
//! `/ws/events` WebSocket for live run events.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
