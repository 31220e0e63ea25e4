//! CryptoCompare Fetcher - Min-API Price Endpoint
//!
//! `GET /data/price?fsym={BASE}&tsyms={QUOTE}` answers `{"QUOTE": price}`.
//! An API key is optional and sent as `authorization: Apikey <key>`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::time::Instant;
use tracing::instrument;

use crate::domain::pair::TradingPair;
use crate::ports::price_fetcher::{FetchError, PriceFetcher};

use super::http::{RateGate, get_json, price_field};

pub const NAME: &str = "cryptocompare";
const BASE_URL: &str = "https://min-api.cryptocompare.com/data";

pub struct CryptoCompareFetcher {
    client: Client,
    base_url: String,
    /// Full `authorization` header value.
    authorization: Option<String>,
    gate: RateGate,
}

impl CryptoCompareFetcher {
    pub fn new(client: Client, api_key: Option<&str>) -> Self {
        Self::with_base_url(client, BASE_URL, api_key)
    }

    pub fn with_base_url(client: Client, base_url: &str, api_key: Option<&str>) -> Self {
        let authorization = api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| format!("Apikey {k}"));
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization,
            gate: RateGate::per_minute(50),
        }
    }
}

/// Extract `body[QUOTE]`. Errors come back with HTTP 200 and
/// `"Response": "Error"`.
pub fn parse_price(body: &Value, quote: &str) -> Result<f64, FetchError> {
    if body.get("Response").and_then(Value::as_str) == Some("Error") {
        let message = body
            .get("Message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(FetchError::Unavailable(message.to_string()));
    }
    let quote = quote.to_uppercase();
    let price = body
        .get(&quote)
        .ok_or_else(|| FetchError::Malformed(format!("no {quote} price")))?;
    price_field(price)
}

#[async_trait]
impl PriceFetcher for CryptoCompareFetcher {
    fn name(&self) -> &str {
        NAME
    }

    fn supports_pair(&self, _pair: &TradingPair) -> bool {
        true
    }

    #[instrument(skip(self, deadline), fields(source = NAME, pair = %pair))]
    async fn fetch(&self, pair: &TradingPair, deadline: Instant) -> Result<f64, FetchError> {
        let url = format!(
            "{}/price?fsym={}&tsyms={}",
            self.base_url,
            pair.base().to_uppercase(),
            pair.quote().to_uppercase()
        );
        let headers: Vec<(&str, &str)> = self
            .authorization
            .as_deref()
            .map(|value| ("authorization", value))
            .into_iter()
            .collect();
        let body: Value = get_json(&self.client, &url, &headers, &self.gate, deadline).await?;
        parse_price(&body, pair.quote())
    }
}
