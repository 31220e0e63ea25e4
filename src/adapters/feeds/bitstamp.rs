//! Bitstamp Fetcher - Public Ticker Endpoint
//!
//! `GET /api/v2/ticker/{base}{quote}/`, price in `last`. ROSE is not
//! listed.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::time::Instant;
use tracing::instrument;

use crate::domain::pair::TradingPair;
use crate::ports::price_fetcher::{FetchError, PriceFetcher};

use super::http::{RateGate, get_json, price_field};

pub const NAME: &str = "bitstamp";
const BASE_URL: &str = "https://www.bitstamp.net";

pub struct BitstampFetcher {
    client: Client,
    base_url: String,
    gate: RateGate,
}

impl BitstampFetcher {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, BASE_URL)
    }

    pub fn with_base_url(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            gate: RateGate::per_minute(600),
        }
    }
}

pub fn parse_ticker(body: &Value) -> Result<f64, FetchError> {
    let last = body
        .get("last")
        .ok_or_else(|| FetchError::Malformed("missing 'last'".into()))?;
    price_field(last)
}

#[async_trait]
impl PriceFetcher for BitstampFetcher {
    fn name(&self) -> &str {
        NAME
    }

    fn supports_pair(&self, pair: &TradingPair) -> bool {
        pair.base() != "rose"
    }

    #[instrument(skip(self, deadline), fields(source = NAME, pair = %pair))]
    async fn fetch(&self, pair: &TradingPair, deadline: Instant) -> Result<f64, FetchError> {
        let url = format!(
            "{}/api/v2/ticker/{}{}/",
            self.base_url,
            pair.base(),
            pair.quote()
        );
        let body: Value = get_json(&self.client, &url, &[], &self.gate, deadline).await?;
        parse_ticker(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ticker() {
        let body = json!({"last": "3120.44", "high": "3200.00", "volume": "1234.5"});
        assert_eq!(parse_ticker(&body).unwrap(), 3120.44);
        assert!(matches!(parse_ticker(&json!({"high": "1"})), Err(FetchError::Malformed(_))));
    }
}
