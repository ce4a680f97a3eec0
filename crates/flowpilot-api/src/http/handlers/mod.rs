//! Route handlers, one module per resource.

pub mod health;
pub mod plan;
pub mod run;
pub mod ws;
