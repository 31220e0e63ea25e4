//! Metrics and Monitoring Adapters
//!
//! Prometheus export on :9090 and the health server (/live, /ready,
//! /status) on :8080, both via axum 0.7.

pub mod health;
pub mod prometheus;

pub use health::{HealthServer, HealthState};
pub use prometheus::MetricsRegistry;
