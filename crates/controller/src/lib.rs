//! Adaptive controller daemon
//!
//! Wires the controller library into a long-running process with an HTTP
//! surface for health, metrics and read-only operator state.

pub mod api;
pub mod config;
pub mod runtime;
