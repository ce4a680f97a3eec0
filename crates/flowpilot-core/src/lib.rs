//! Core engine for flowpilot.
//!
//! Owns the workflow engine (plan validation, run scheduling, step execution),
//! the actuator port the engine drives devices through, the event bus, and
//! the repository traits that `flowpilot-infra` or tests plug storage into.

pub mod actuator;
pub mod event;
pub mod repository;
pub mod workflow;
