//! USDT/USD Rate Cache - Shared Stablecoin Conversion Rate
//!
//! Sources that only list USDT markets convert to USD with this rate.
//! The `usdt/usd` pair loop writes every accepted price here; readers
//! ignore values older than the TTL.

use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;

/// How long a cached rate stays usable.
pub const DEFAULT_USDT_RATE_TTL: Duration = Duration::from_secs(300);

/// Maximum tolerated distance of USDT from 1.0 before USD conversion is
/// refused.
pub const USDT_DEPEG_THRESHOLD: f64 = 0.02;

#[derive(Debug)]
pub struct UsdtRateCache {
    entry: RwLock<Option<(f64, Instant)>>,
    ttl: Duration,
}

impl Default for UsdtRateCache {
    fn default() -> Self {
        Self::new(DEFAULT_USDT_RATE_TTL)
    }
}

impl UsdtRateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: RwLock::new(None),
            ttl,
        }
    }

    /// Store a fresh rate. Non-positive rates are ignored.
    pub fn set(&self, rate: f64) {
        if !(rate.is_finite() && rate > 0.0) {
            return;
        }
        if let Ok(mut entry) = self.entry.write() {
            *entry = Some((rate, Instant::now()));
        }
    }

    /// The cached rate, if set within the TTL.
    pub fn get(&self) -> Option<f64> {
        let entry = self.entry.read().ok()?;
        let (rate, at) = (*entry)?;
        (at.elapsed() <= self.ttl).then_some(rate)
    }

    /// Age of the cached rate, fresh or not.
    pub fn age(&self) -> Option<Duration> {
        let entry = self.entry.read().ok()?;
        entry.map(|(_, at)| at.elapsed())
    }
}

/// Whether `rate` is within the depeg threshold of 1.0.
pub fn is_pegged(rate: f64) -> bool {
    (rate - 1.0).abs() <= USDT_DEPEG_THRESHOLD
}
