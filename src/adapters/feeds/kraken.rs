//! Kraken Fetcher - Public Ticker Endpoint
//!
//! `GET /0/public/Ticker?pair={BASE}{QUOTE}`. Kraken names bitcoin `XBT`
//! and reports failures in a non-empty `error` array. The price is the
//! last trade close `c[0]` of the first result entry. ROSE is not listed.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::time::Instant;
use tracing::instrument;

use crate::domain::pair::TradingPair;
use crate::ports::price_fetcher::{FetchError, PriceFetcher};

use super::http::{RateGate, get_json, price_field};

pub const NAME: &str = "kraken";
const BASE_URL: &str = "https://api.kraken.com";

pub struct KrakenFetcher {
    client: Client,
    base_url: String,
    gate: RateGate,
}

impl KrakenFetcher {
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

    /// Kraken pair code, e.g. `XBTUSD`.
    pub fn pair_code(pair: &TradingPair) -> String {
        let base = match pair.base() {
            "btc" => "XBT".to_string(),
            other => other.to_uppercase(),
        };
        format!("{base}{}", pair.quote().to_uppercase())
    }
}

/// Extract `result.<first>.c[0]` from a ticker body.
pub fn parse_ticker(body: &Value) -> Result<f64, FetchError> {
    if let Some(errors) = body.get("error").and_then(Value::as_array) {
        if !errors.is_empty() {
            let joined = errors
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(FetchError::Unavailable(joined));
        }
    }

    let entry = body
        .get("result")
        .and_then(Value::as_object)
        .and_then(|result| result.values().next())
        .ok_or_else(|| FetchError::Malformed("empty 'result'".into()))?;

    let close = entry
        .get("c")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| FetchError::Malformed("missing 'c[0]'".into()))?;
    price_field(close)
}

#[async_trait]
impl PriceFetcher for KrakenFetcher {
    fn name(&self) -> &str {
        NAME
    }

    fn supports_pair(&self, pair: &TradingPair) -> bool {
        pair.base() != "rose"
    }

    #[instrument(skip(self, deadline), fields(source = NAME, pair = %pair))]
    async fn fetch(&self, pair: &TradingPair, deadline: Instant) -> Result<f64, FetchError> {
        let url = format!(
            "{}/0/public/Ticker?pair={}",
            self.base_url,
            Self::pair_code(pair)
        );
        let body: Value = get_json(&self.client, &url, &[], &self.gate, deadline).await?;
        parse_ticker(&body)
    }
}
