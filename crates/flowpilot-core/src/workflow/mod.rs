//! Workflow engine: plan definitions, validation, and run execution.
//!
//! A plan is an ordered list of steps (actions, waits, conditionals, loops).
//! Each run walks the top-level steps in declaration order, gating each on
//! its dependencies, retrying failed steps with linear backoff, and honouring
//! pause/cancel requests at step boundaries.

pub mod condition;
pub mod definition;
pub mod engine;
pub mod finalize;
pub mod generator;
pub mod lint;
pub mod retry;
pub mod run_state;
pub mod scheduler;
pub mod step_executor;
pub mod template;
