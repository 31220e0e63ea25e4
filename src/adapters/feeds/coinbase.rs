//! Coinbase Exchange Fetcher - Public Ticker Endpoint
//!
//! `GET /products/{BASE}-{QUOTE}/ticker`, price in the `price` field.
//! No API key required.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::time::Instant;
use tracing::instrument;

use crate::domain::pair::TradingPair;
use crate::ports::price_fetcher::{FetchError, PriceFetcher};

use super::http::{RateGate, get_json, price_field};

pub const NAME: &str = "coinbase";
const BASE_URL: &str = "https://api.exchange.coinbase.com";

/// Coinbase spot price source.
pub struct CoinbaseFetcher {
    client: Client,
    base_url: String,
    gate: RateGate,
}

impl CoinbaseFetcher {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, BASE_URL)
    }

    pub fn with_base_url(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            // Public limit is 10 req/s per IP
            gate: RateGate::per_minute(600),
        }
    }

    /// Coinbase product id, e.g. `BTC-USD`.
    pub fn product_id(base: &str, quote: &str) -> String {
        format!("{}-{}", base.to_uppercase(), quote.to_uppercase())
    }

    /// Fetch the ticker of an arbitrary product.
    pub async fn ticker(&self, base: &str, quote: &str, deadline: Instant) -> Result<f64, FetchError> {
        let url = format!(
            "{}/products/{}/ticker",
            self.base_url,
            Self::product_id(base, quote)
        );
        let body: Value = get_json(&self.client, &url, &[], &self.gate, deadline).await?;
        parse_ticker(&body)
    }
}

/// Extract the last trade price from a ticker body.
pub fn parse_ticker(body: &Value) -> Result<f64, FetchError> {
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        return Err(FetchError::Unavailable(message.to_string()));
    }
    let price = body
        .get("price")
        .ok_or_else(|| FetchError::Malformed("missing 'price'".into()))?;
    price_field(price)
}

#[async_trait]
impl PriceFetcher for CoinbaseFetcher {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip(self, deadline), fields(source = NAME, pair = %pair))]
    async fn fetch(&self, pair: &TradingPair, deadline: Instant) -> Result<f64, FetchError> {
        self.ticker(pair.base(), pair.quote(), deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ticker() {
        let body = json!({"trade_id": 1, "price": "64250.12", "size": "0.01"});
        assert_eq!(parse_ticker(&body).unwrap(), 64250.12);
    }

    #[test]
    fn test_parse_error_message() {
        let body = json!({"message": "NotFound"});
        assert_eq!(
            parse_ticker(&body),
            Err(FetchError::Unavailable("NotFound".into()))
        );
        assert!(matches!(parse_ticker(&json!({})), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn test_product_id() {
        assert_eq!(CoinbaseFetcher::product_id("rose", "usd"), "ROSE-USD");
    }
}
