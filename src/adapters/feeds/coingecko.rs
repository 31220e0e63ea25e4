//! CoinGecko Fetcher - Simple Price Endpoint
//!
//! `GET /simple/price?ids={id}&vs_currencies={quote}`. Symbols are mapped
//! to CoinGecko coin ids; unmapped bases are not supported.
//!
//! API keys:
//! - none: free host, no header
//! - `demo:<key>`: free host, `x-cg-demo-api-key`
//! - `<key>`: pro host, `x-cg-pro-api-key`

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::time::Instant;
use tracing::instrument;

use crate::domain::pair::TradingPair;
use crate::ports::price_fetcher::{FetchError, PriceFetcher};

use super::http::{RateGate, get_json, price_field};

pub const NAME: &str = "coingecko";
const FREE_URL: &str = "https://api.coingecko.com/api/v3";
const PRO_URL: &str = "https://pro-api.coingecko.com/api/v3";

/// Known base symbols and their CoinGecko ids.
const COIN_IDS: &[(&str, &str)] = &[
    ("btc", "bitcoin"),
    ("eth", "ethereum"),
    ("rose", "oasis-network"),
    ("usdt", "tether"),
    ("usdc", "usd-coin"),
    ("sol", "solana"),
    ("avax", "avalanche-2"),
    ("matic", "matic-network"),
    ("dot", "polkadot"),
    ("atom", "cosmos"),
    ("link", "chainlink"),
    ("uni", "uniswap"),
    ("aave", "aave"),
];

/// CoinGecko coin id for a base symbol.
pub fn coin_id(symbol: &str) -> Option<&'static str> {
    COIN_IDS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, id)| *id)
}

/// How the API key authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyMode {
    Anonymous,
    Demo(String),
    Pro(String),
}

impl KeyMode {
    fn from_key(api_key: Option<&str>) -> Self {
        match api_key.map(str::trim).filter(|k| !k.is_empty()) {
            None => Self::Anonymous,
            Some(key) => match key.get(..5) {
                Some(prefix) if prefix.eq_ignore_ascii_case("demo:") => {
                    Self::Demo(key[5..].to_string())
                }
                _ => Self::Pro(key.to_string()),
            },
        }
    }

    fn base_url(&self) -> &'static str {
        match self {
            Self::Pro(_) => PRO_URL,
            Self::Anonymous | Self::Demo(_) => FREE_URL,
        }
    }

    fn header(&self) -> Option<(&'static str, &str)> {
        match self {
            Self::Anonymous => None,
            Self::Demo(key) => Some(("x-cg-demo-api-key", key.as_str())),
            Self::Pro(key) => Some(("x-cg-pro-api-key", key.as_str())),
        }
    }
}

pub struct CoinGeckoFetcher {
    client: Client,
    base_url: String,
    key: KeyMode,
    gate: RateGate,
}

impl CoinGeckoFetcher {
    pub fn new(client: Client, api_key: Option<&str>) -> Self {
        let key = KeyMode::from_key(api_key);
        let per_minute = if matches!(key, KeyMode::Pro(_)) { 500 } else { 30 };
        Self {
            client,
            base_url: key.base_url().to_string(),
            key,
            gate: RateGate::per_minute(per_minute),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Extract `body[coin_id][quote]`.
pub fn parse_simple_price(body: &Value, coin_id: &str, quote: &str) -> Result<f64, FetchError> {
    let coin = body
        .get(coin_id)
        .ok_or_else(|| FetchError::Malformed(format!("coin '{coin_id}' missing")))?;
    let price = coin
        .get(quote)
        .ok_or_else(|| FetchError::Malformed(format!("quote '{quote}' missing for {coin_id}")))?;
    price_field(price)
}

#[async_trait]
impl PriceFetcher for CoinGeckoFetcher {
    fn name(&self) -> &str {
        NAME
    }

    fn supports_pair(&self, pair: &TradingPair) -> bool {
        coin_id(pair.base()).is_some()
    }

    #[instrument(skip(self, deadline), fields(source = NAME, pair = %pair))]
    async fn fetch(&self, pair: &TradingPair, deadline: Instant) -> Result<f64, FetchError> {
        let id = coin_id(pair.base()).ok_or(FetchError::UnsupportedPair)?;
        let url = format!(
            "{}/simple/price?ids={id}&vs_currencies={}",
            self.base_url,
            pair.quote()
        );
        let headers: Vec<(&str, &str)> = self.key.header().into_iter().collect();
        let body: Value = get_json(&self.client, &url, &headers, &self.gate, deadline).await?;
        parse_simple_price(&body, id, pair.quote())
    }
}
