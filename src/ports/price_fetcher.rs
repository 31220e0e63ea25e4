//! Price Fetcher Port - Single-source Spot Price Interface
//!
//! Defines the trait every price API adapter implements. A fetcher
//! answers one spot price for one pair per call and must give up by the
//! supplied deadline; the coordinator enforces it regardless.

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

use crate::domain::pair::TradingPair;

/// Why a single source failed to produce a price.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
  /// No answer before the deadline.
  #[error("timed out")]
  Timeout,
  /// Non-success HTTP status.
  #[error("http {status}: {message}")]
  Http { status: u16, message: String },
  /// Connection, TLS or body read failure.
  #[error("transport: {0}")]
  Transport(String),
  /// Response did not contain a parseable price.
  #[error("malformed response: {0}")]
  Malformed(String),
  /// Price parsed but is zero, negative or not finite.
  #[error("invalid price {0}")]
  InvalidPrice(f64),
  /// The source does not list this pair.
  #[error("pair not supported")]
  UnsupportedPair,
  /// Local or remote rate limit hit.
  #[error("rate limited")]
  RateLimited,
  /// The source reported an error of its own.
  #[error("source unavailable: {0}")]
  Unavailable(String),
}

impl FetchError {
  /// Short label for metrics.
  pub const fn kind(&self) -> &'static str {
    match self {
      Self::Timeout => "timeout",
      Self::Http { .. } => "http",
      Self::Transport(_) => "transport",
      Self::Malformed(_) => "malformed",
      Self::InvalidPrice(_) => "invalid_price",
      Self::UnsupportedPair => "unsupported_pair",
      Self::RateLimited => "rate_limited",
      Self::Unavailable(_) => "unavailable",
    }
  }
}

/// Trait for spot price sources.
///
/// Implementors must be cheap to share (`Arc<dyn PriceFetcher>`) and safe
/// to call concurrently for different pairs.
#[async_trait]
pub trait PriceFetcher: Send + Sync + 'static {
  /// Stable source name used as the key in aggregation results.
  fn name(&self) -> &str;

  /// Whether this source can quote `pair`. Checked once at startup.
  fn supports_pair(&self, _pair: &TradingPair) -> bool {
    true
  }

  /// Fetch the current spot price of `pair`.
  async fn fetch(&self, pair: &TradingPair, deadline: Instant) -> Result<f64, FetchError>;
}
