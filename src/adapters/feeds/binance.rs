//! Binance Fetcher - Spot Ticker with USDT to USD Conversion
//!
//! Binance lists USDT markets rather than USD ones. For `*/usd` pairs
//! the fetcher reads `{BASE}USDT` and multiplies by the USDT/USD rate:
//! the oracle's own `usdt/usd` aggregate when fresh, otherwise the
//! Coinbase `USDT-USD` ticker, cached. If USDT is off its peg by more
//! than 2% the source fails instead of converting.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::domain::pair::TradingPair;
use crate::domain::usdt_rate::{UsdtRateCache, is_pegged};
use crate::ports::price_fetcher::{FetchError, PriceFetcher};

use super::coinbase::CoinbaseFetcher;
use super::http::{RateGate, get_json, price_field};

pub const NAME: &str = "binance";
const BASE_URL: &str = "https://api.binance.com";

pub struct BinanceFetcher {
    client: Client,
    base_url: String,
    gate: RateGate,
    usdt_rate: Arc<UsdtRateCache>,
    /// Fallback USDT/USD quote when the cache is cold.
    rate_source: CoinbaseFetcher,
}

impl BinanceFetcher {
    pub fn new(client: Client, usdt_rate: Arc<UsdtRateCache>) -> Self {
        let rate_source = CoinbaseFetcher::new(client.clone());
        Self::with_parts(client, BASE_URL, usdt_rate, rate_source)
    }

    pub fn with_parts(
        client: Client,
        base_url: &str,
        usdt_rate: Arc<UsdtRateCache>,
        rate_source: CoinbaseFetcher,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            gate: RateGate::per_minute(1200),
            usdt_rate,
            rate_source,
        }
    }

    /// Binance symbol and whether the price needs USDT to USD conversion.
    pub fn symbol(pair: &TradingPair) -> (String, bool) {
        let convert = pair.quote() == "usd";
        let quote = if convert {
            "USDT".to_string()
        } else {
            pair.quote().to_uppercase()
        };
        (format!("{}{quote}", pair.base().to_uppercase()), convert)
    }

    async fn usdt_usd(&self, deadline: Instant) -> Result<f64, FetchError> {
        if let Some(rate) = self.usdt_rate.get() {
            return Ok(rate);
        }
        let rate = self.rate_source.ticker("usdt", "usd", deadline).await?;
        debug!(rate, "USDT/USD rate refreshed from fallback source");
        self.usdt_rate.set(rate);
        Ok(rate)
    }
}

pub fn parse_ticker(body: &Value) -> Result<f64, FetchError> {
    if let Some(msg) = body.get("msg").and_then(Value::as_str) {
        return Err(FetchError::Unavailable(msg.to_string()));
    }
    let price = body
        .get("price")
        .ok_or_else(|| FetchError::Malformed("missing 'price'".into()))?;
    price_field(price)
}

/// Convert a USDT price to USD, refusing when USDT is depegged.
pub fn convert_usdt(price: f64, usdt_usd: f64) -> Result<f64, FetchError> {
    if !is_pegged(usdt_usd) {
        warn!(rate = usdt_usd, "USDT depeg detected, excluding binance");
        return Err(FetchError::Unavailable(format!(
            "usdt depegged at {usdt_usd:.4}"
        )));
    }
    Ok(price * usdt_usd)
}

#[async_trait]
impl PriceFetcher for BinanceFetcher {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip(self, deadline), fields(source = NAME, pair = %pair))]
    async fn fetch(&self, pair: &TradingPair, deadline: Instant) -> Result<f64, FetchError> {
        let (symbol, convert) = Self::symbol(pair);
        let url = format!("{}/api/v3/ticker/price?symbol={symbol}", self.base_url);
        let body: Value = get_json(&self.client, &url, &[], &self.gate, deadline).await?;
        let price = parse_ticker(&body)?;
        if convert {
            convert_usdt(price, self.usdt_usd(deadline).await?)
        } else {
            Ok(price)
        }
    }
}
