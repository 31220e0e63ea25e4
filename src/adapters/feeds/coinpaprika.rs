//! Coinpaprika Fetcher - Ticker Endpoint
//!
//! `GET /v1/tickers/{id}`, price in `quotes.{QUOTE}.price`. No key needed.
//! Bases are mapped to Coinpaprika ids of the form `{symbol}-{name}`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::time::Instant;
use tracing::instrument;

use crate::domain::pair::TradingPair;
use crate::ports::price_fetcher::{FetchError, PriceFetcher};

use super::http::{RateGate, get_json, price_field};

pub const NAME: &str = "coinpaprika";
const BASE_URL: &str = "https://api.coinpaprika.com/v1";

const COIN_IDS: &[(&str, &str)] = &[
    ("btc", "btc-bitcoin"),
    ("eth", "eth-ethereum"),
    ("usdt", "usdt-tether"),
    ("usdc", "usdc-usd-coin"),
    ("rose", "rose-oasis-network"),
    ("sol", "sol-solana"),
    ("avax", "avax-avalanche"),
    ("matic", "matic-polygon"),
    ("dot", "dot-polkadot"),
    ("atom", "atom-cosmos"),
    ("link", "link-chainlink"),
    ("uni", "uni-uniswap"),
    ("aave", "aave-aave"),
];

pub fn coin_id(symbol: &str) -> Option<&'static str> {
    COIN_IDS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, id)| *id)
}

pub struct CoinpaprikaFetcher {
    client: Client,
    base_url: String,
    gate: RateGate,
}

impl CoinpaprikaFetcher {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, BASE_URL)
    }

    pub fn with_base_url(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            gate: RateGate::per_minute(60),
        }
    }
}

/// Extract `quotes.{QUOTE}.price`; a top-level `error` means the source
/// refused the request.
pub fn parse_ticker(body: &Value, quote: &str) -> Result<f64, FetchError> {
    if let Some(error) = body.get("error") {
        return Err(FetchError::Unavailable(error.to_string()));
    }
    let quote = quote.to_uppercase();
    let price = body
        .get("quotes")
        .and_then(|q| q.get(&quote))
        .and_then(|q| q.get("price"))
        .ok_or_else(|| FetchError::Malformed(format!("no {quote} price")))?;
    price_field(price)
}

#[async_trait]
impl PriceFetcher for CoinpaprikaFetcher {
    fn name(&self) -> &str {
        NAME
    }

    fn supports_pair(&self, pair: &TradingPair) -> bool {
        coin_id(pair.base()).is_some()
    }

    #[instrument(skip(self, deadline), fields(source = NAME, pair = %pair))]
    async fn fetch(&self, pair: &TradingPair, deadline: Instant) -> Result<f64, FetchError> {
        let id = coin_id(pair.base()).ok_or(FetchError::UnsupportedPair)?;
        let url = format!("{}/tickers/{id}", self.base_url);
        let body: Value = get_json(&self.client, &url, &[], &self.gate, deadline).await?;
        parse_ticker(&body, pair.quote())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ticker() {
        let body = json!({
            "id": "rose-oasis-network",
            "symbol": "ROSE",
            "quotes": {"USD": {"price": 0.0724, "volume_24h": 1.5e7}}
        });
        assert_eq!(parse_ticker(&body, "usd").unwrap(), 0.0724);
        assert!(matches!(parse_ticker(&body, "eur"), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn test_error_body_is_unavailable() {
        let body = json!({"error": "id not found"});
        assert!(matches!(parse_ticker(&body, "usd"), Err(FetchError::Unavailable(_))));
    }

    #[test]
    fn test_supports_only_mapped_symbols() {
        let fetcher = CoinpaprikaFetcher::new(Client::new());
        assert!(fetcher.supports_pair(&TradingPair::new("rose", "usd")));
        assert!(!fetcher.supports_pair(&TradingPair::new("doge", "usd")));
        assert_eq!(coin_id("usdt"), Some("usdt-tether"));
    }
}
