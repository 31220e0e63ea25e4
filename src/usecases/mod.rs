//! Use Cases Layer - Oracle Orchestration
//!
//! Wires the pure domain to the ports:
//! - `FetchCoordinator`: concurrent per-source fetch with deadlines
//! - `RoundSubmitter`: periodic round commits to the ledger
//! - `FeedLoop`: the per-pair fetch/aggregate/submit state machine
//! - `PriceOracle`: spawns one feed loop per pair
//! - `status`: per-pair snapshots for health reporting

pub mod feed_loop;
pub mod fetch_coordinator;
pub mod oracle;
pub mod round_submitter;
pub mod status;

pub use feed_loop::{CycleOutcome, FeedLoop, FeedSettings};
pub use fetch_coordinator::{FanIn, FetchCoordinator, Quote};
pub use oracle::{PriceOracle, RunningOracle};
pub use round_submitter::{RoundSubmitter, SubmitOutcome};
pub use status::{PairSnapshot, StatusBoard};
