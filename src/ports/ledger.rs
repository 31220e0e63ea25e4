//! Ledger Port - On-chain Round Storage Interface
//!
//! The ledger holds the committed rounds of every pair. The oracle reads
//! the latest committed round once at startup and then appends rounds.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::pair::TradingPair;
use crate::domain::round::Round;

/// Latest committed round as reported by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestRound {
  /// Zero when nothing has been committed yet.
  pub round_id: u64,
  /// Committed fixed-point price; zero when none.
  pub price: u128,
  /// Decimal places of `price`.
  pub decimals: u32,
}

/// Acknowledgement of a committed round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
  pub round_id: u64,
  /// Transaction hash, when the ledger is a chain.
  pub tx_hash: Option<String>,
}

/// Ledger read/write failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
  #[error("rpc error: {0}")]
  Rpc(String),
  #[error("transaction {tx_hash} reverted")]
  Reverted { tx_hash: String },
  #[error("submission rejected: {0}")]
  Rejected(String),
  #[error("no feed registered for {0}")]
  UnknownFeed(String),
  #[error("encoding error: {0}")]
  Encoding(String),
}

/// Trait for round storage backends.
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
  /// Latest committed round for `pair`.
  async fn latest_round(&self, pair: &TradingPair) -> Result<LatestRound, LedgerError>;

  /// Commit `round`. Called at most once per produced round attempt.
  async fn submit_round(
    &self,
    pair: &TradingPair,
    round: &Round,
  ) -> Result<SubmissionReceipt, LedgerError>;
}
