//! Shared domain types for flowpilot.
//!
//! This crate contains the domain types used across the workflow engine:
//! plans and steps, run and step status, lifecycle events, actuator requests,
//! engine configuration, and repository errors.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod action;
pub mod config;
pub mod error;
pub mod event;
pub mod plan;
pub mod run;
