//! Actuator implementations backed by real transports.

pub mod http;

pub use http::HttpActuator;
