//! Chain Adapters - Round Ledger Implementations
//!
//! Provides `Ledger` implementations:
//! - `AggregatorLedger`: per-pair aggregator contracts via alloy-rs 0.9
//! - `DryRunLedger`: in-memory, logs rounds instead of sending them

pub mod contracts;
pub mod dry_run;
pub mod provider;

pub use contracts::AggregatorLedger;
pub use dry_run::DryRunLedger;
pub use provider::ChainProvider;
