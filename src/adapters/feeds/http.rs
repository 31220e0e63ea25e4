//! HTTP Plumbing - Shared Client, Deadlines and Rate Gates
//!
//! Every REST price source goes through `get_json`: it waits for a rate
//! limiter slot, applies the caller's deadline as the request timeout,
//! and maps transport, status and JSON failures into `FetchError`.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::ports::price_fetcher::FetchError;

/// Build the HTTP client shared by all sources.
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(5)
        .user_agent(concat!("aggregated-price-oracle/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// Client-side request budget for one public API.
pub struct RateGate {
    limiter: DefaultDirectRateLimiter,
}

impl RateGate {
    /// Allow `per_minute` requests per minute, bursting up to that amount.
    pub fn per_minute(per_minute: u32) -> Self {
        let n = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(n)),
        }
    }

    /// Wait for a slot, giving up with `RateLimited` at `deadline`.
    pub async fn acquire(&self, deadline: Instant) -> Result<(), FetchError> {
        tokio::time::timeout_at(deadline, self.limiter.until_ready())
            .await
            .map_err(|_| FetchError::RateLimited)
    }
}

/// GET `url` and decode the JSON body, bounded by `deadline`.
pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    headers: &[(&str, &str)],
    gate: &RateGate,
    deadline: Instant,
) -> Result<T, FetchError> {
    gate.acquire(deadline).await?;

    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(FetchError::Timeout);
    }

    let mut request = client.get(url).timeout(remaining);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    let response = request.send().await.map_err(map_reqwest)?;
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::Http {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        });
    }

    let bytes = response.bytes().await.map_err(map_reqwest)?;
    debug!(url, bytes = bytes.len(), "Price response received");
    serde_json::from_slice(&bytes).map_err(|e| FetchError::Malformed(e.to_string()))
}

fn map_reqwest(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_decode() {
        FetchError::Malformed(e.to_string())
    } else {
        FetchError::Transport(e.to_string())
    }
}

/// Read a price that APIs encode either as a JSON string or a number.
pub fn price_field(value: &Value) -> Result<f64, FetchError> {
    let price = match value {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| FetchError::Malformed(format!("unparseable price {s:?}")))?,
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| FetchError::Malformed(format!("unrepresentable price {n}")))?,
        other => return Err(FetchError::Malformed(format!("unexpected price {other}"))),
    };
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(FetchError::InvalidPrice(price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_price_field_variants() {
        assert_eq!(price_field(&json!("101.5")).unwrap(), 101.5);
        assert_eq!(price_field(&json!(42.25)).unwrap(), 42.25);
        assert_eq!(price_field(&json!("0")), Err(FetchError::InvalidPrice(0.0)));
        assert!(matches!(price_field(&json!("abc")), Err(FetchError::Malformed(_))));
        assert!(matches!(price_field(&json!(null)), Err(FetchError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_rate_gate_exhausts() {
        let gate = RateGate::per_minute(1);
        let deadline = Instant::now() + Duration::from_millis(50);
        assert!(gate.acquire(deadline).await.is_ok());
        assert_eq!(gate.acquire(deadline).await, Err(FetchError::RateLimited));
    }
}
