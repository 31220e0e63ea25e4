//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the domain/usecases layer
//! requires from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `PriceFetcher`: Spot price from one external API
//! - `Ledger`: On-chain round storage

pub mod ledger;
pub mod price_fetcher;

pub use ledger::{LatestRound, Ledger, LedgerError, SubmissionReceipt};
pub use price_fetcher::{FetchError, PriceFetcher};
