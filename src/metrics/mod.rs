//! Metrics Module
//!
//! Prometheus collectors for the relay and the HTTP endpoint that exposes them.

pub mod collector;
pub mod server;

pub use collector::Metrics;
pub use server::{MonitoringServer, MonitoringState};
