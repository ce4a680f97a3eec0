//! Repository trait definitions (ports).
//!
//! The engine stores plans and live runs through these traits. The in-memory
//! implementation here is what the CLI and server use; durable storage would
//! implement the same trait.

pub mod memory;
pub mod plan;

pub use memory::InMemoryPlanRepository;
pub use plan::PlanRepository;
