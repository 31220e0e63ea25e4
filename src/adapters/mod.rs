//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP price APIs, blockchain RPC). Each
//! sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `chain`: aggregator contracts via alloy-rs, plus a dry-run ledger
//! - `feeds`: REST spot price sources
//! - `metrics`: Prometheus metrics export and health checks

pub mod chain;
pub mod feeds;
pub mod metrics;
