//! Infrastructure layer for flowpilot.
//!
//! Contains the adapters `flowpilot-core` is plugged into at runtime: the
//! HTTP actuator that talks to a device agent, and the TOML config loader
//! with data directory resolution.

pub mod actuator;
pub mod config;
