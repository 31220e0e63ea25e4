//! Price Source Adapters - REST Spot Price Fetchers
//!
//! Provides `PriceFetcher` implementations for:
//! - Coinbase, Kraken, Bitstamp: exchange tickers
//! - Binance: USDT tickers converted to USD
//! - CoinGecko: aggregator API with optional demo/pro key
//! - Coinpaprika: keyless ticker API
//! - CryptoCompare: min-api price endpoint, optional key
//!
//! All fetchers share one `reqwest` client and enforce their own
//! client-side rate limit.

pub mod binance;
pub mod bitstamp;
pub mod coinbase;
pub mod coingecko;
pub mod coinpaprika;
pub mod cryptocompare;
pub mod http;
pub mod kraken;

use std::sync::Arc;

use anyhow::{Result, bail};
use reqwest::Client;

use crate::domain::usdt_rate::UsdtRateCache;
use crate::ports::price_fetcher::PriceFetcher;

pub use binance::BinanceFetcher;
pub use bitstamp::BitstampFetcher;
pub use coinbase::CoinbaseFetcher;
pub use coingecko::CoinGeckoFetcher;
pub use coinpaprika::CoinpaprikaFetcher;
pub use cryptocompare::CryptoCompareFetcher;
pub use kraken::KrakenFetcher;

/// Source names accepted in `[feed].sources`.
pub const AVAILABLE_SOURCES: &[&str] = &[
    binance::NAME,
    bitstamp::NAME,
    coinbase::NAME,
    coingecko::NAME,
    coinpaprika::NAME,
    cryptocompare::NAME,
    kraken::NAME,
];

/// Build the fetcher registered under `name`.
pub fn build_fetcher(
    name: &str,
    client: &Client,
    api_key: Option<&str>,
    usdt_rate: &Arc<UsdtRateCache>,
) -> Result<Arc<dyn PriceFetcher>> {
    let client = client.clone();
    let fetcher: Arc<dyn PriceFetcher> = match name {
        binance::NAME => Arc::new(BinanceFetcher::new(client, Arc::clone(usdt_rate))),
        bitstamp::NAME => Arc::new(BitstampFetcher::new(client)),
        coinbase::NAME => Arc::new(CoinbaseFetcher::new(client)),
        coingecko::NAME => Arc::new(CoinGeckoFetcher::new(client, api_key)),
        coinpaprika::NAME => Arc::new(CoinpaprikaFetcher::new(client)),
        cryptocompare::NAME => Arc::new(CryptoCompareFetcher::new(client, api_key)),
        kraken::NAME => Arc::new(KrakenFetcher::new(client)),
        other => bail!(
            "Unknown price source '{other}', available: {}",
            AVAILABLE_SOURCES.join(", ")
        ),
    };
    Ok(fetcher)
}
