//! Trading Pair - Normalized Base/Quote Identity
//!
//! A pair is a case-normalized `{base, quote}` symbol combination. It is the
//! key for all per-pair state and renders on-chain as
//! `aggregated/<base>/<quote>`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Prefix of the on-chain feed path. Aggregated feeds are not tied to any
/// single exchange, so the provider segment is fixed.
pub const FEED_PROVIDER: &str = "aggregated";

/// Error returned when a `base/quote` string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid pair format '{input}': expected 'base/quote' (e.g. 'btc/usd')")]
pub struct PairParseError {
    /// The rejected input.
    pub input: String,
}

/// Immutable base/quote pair, lower-cased on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TradingPair {
    base: String,
    quote: String,
}

impl TradingPair {
    /// Build a pair from raw symbols. Whitespace is trimmed and both
    /// symbols are lower-cased.
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: base.trim().to_lowercase(),
            quote: quote.trim().to_lowercase(),
        }
    }

    /// Base symbol, e.g. `btc`.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Quote symbol, e.g. `usd`.
    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// On-chain feed path: `aggregated/<base>/<quote>`.
    pub fn feed_path(&self) -> String {
        format!("{FEED_PROVIDER}/{}/{}", self.base, self.quote)
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for TradingPair {
    type Err = PairParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').map(str::trim).collect();
        match parts.as_slice() {
            [base, quote] if !base.is_empty() && !quote.is_empty() => {
                Ok(Self::new(base, quote))
            }
            _ => Err(PairParseError {
                input: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case() {
        let pair: TradingPair = "BTC/Usd".parse().unwrap();
        assert_eq!(pair.base(), "btc");
        assert_eq!(pair.quote(), "usd");
        assert_eq!(pair.to_string(), "btc/usd");
    }

    #[test]
    fn test_structural_equality() {
        let a: TradingPair = "eth/usd".parse().unwrap();
        let b = TradingPair::new("ETH", " usd ");
        assert_eq!(a, b);
    }

    #[test]
    fn test_feed_path() {
        let pair = TradingPair::new("rose", "usd");
        assert_eq!(pair.feed_path(), "aggregated/rose/usd");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!("btcusd".parse::<TradingPair>().is_err());
        assert!("btc/usd/eur".parse::<TradingPair>().is_err());
        assert!("/usd".parse::<TradingPair>().is_err());
        assert!("btc/".parse::<TradingPair>().is_err());
    }
}
