//! Observation Buffer - Accepted Prices Awaiting the Next Round
//!
//! Accepted aggregations are converted to fixed-point integers in the
//! ledger's decimal precision and appended here. The buffer is cleared
//! atomically when a round is committed.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

/// Fixed-point precision used for every pair (`10^-10`).
pub const PRICE_DECIMALS: u32 = 10;

/// Default bound on buffered observations per pair.
pub const DEFAULT_MAX_OBSERVATIONS: usize = 4096;

/// An accepted price at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Price scaled by `10^PRICE_DECIMALS`.
    pub price: u128,
    /// Capture time, Unix seconds.
    pub captured_at: i64,
}

/// Bounded FIFO of observations for one pair.
#[derive(Debug, Clone)]
pub struct ObservationBuffer {
    items: VecDeque<Observation>,
    capacity: usize,
}

impl ObservationBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(DEFAULT_MAX_OBSERVATIONS)),
            capacity,
        }
    }

    /// Append an observation. When full, the oldest entry is evicted and
    /// returned.
    pub fn push(&mut self, observation: Observation) -> Option<Observation> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(observation);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn first(&self) -> Option<&Observation> {
        self.items.front()
    }

    pub fn last(&self) -> Option<&Observation> {
        self.items.back()
    }

    /// Median of buffered prices. For an even count this is the floor of
    /// the mean of the two middle values.
    pub fn median_price(&self) -> Option<u128> {
        let mut prices: Vec<u128> = self.items.iter().map(|o| o.price).collect();
        if prices.is_empty() {
            return None;
        }
        prices.sort_unstable();
        let mid = prices.len() / 2;
        if prices.len() % 2 == 0 {
            let (lo, hi) = (prices[mid - 1], prices[mid]);
            Some(lo / 2 + hi / 2 + (lo % 2 + hi % 2) / 2)
        } else {
            Some(prices[mid])
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl Default for ObservationBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OBSERVATIONS)
    }
}

/// Scale a price to a fixed-point integer with `decimals` places, rounding
/// half away from zero. Returns `None` for non-finite, negative or
/// overflowing inputs.
pub fn to_fixed_point(price: f64, decimals: u32) -> Option<u128> {
    if !price.is_finite() || price < 0.0 {
        return None;
    }
    let value = Decimal::from_f64(price)?;
    let scale = Decimal::from_u128(10u128.checked_pow(decimals)?)?;
    value.checked_mul(scale)?.round().to_u128()
}

/// Inverse of [`to_fixed_point`], lossy above `2^53`.
pub fn from_fixed_point(value: u128, decimals: u32) -> f64 {
    let scale = 10f64.powi(i32::try_from(decimals).unwrap_or(i32::MAX));
    #[allow(clippy::cast_precision_loss)]
    let raw = value as f64;
    raw / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(price: u128, captured_at: i64) -> Observation {
        Observation { price, captured_at }
    }

    #[test]
    fn test_fixed_point_conversion() {
        assert_eq!(to_fixed_point(101.0, 10), Some(1_010_000_000_000));
        assert_eq!(to_fixed_point(0.0725, 10), Some(725_000_000));
        assert_eq!(to_fixed_point(-1.0, 10), None);
        assert_eq!(to_fixed_point(f64::NAN, 10), None);
        assert!((from_fixed_point(1_010_000_000_000, 10) - 101.0).abs() < 1e-12);
    }

    #[test]
    fn test_median_odd_even() {
        let mut buf = ObservationBuffer::new(16);
        assert_eq!(buf.median_price(), None);
        buf.push(obs(30, 1));
        buf.push(obs(10, 2));
        buf.push(obs(20, 3));
        assert_eq!(buf.median_price(), Some(20));
        buf.push(obs(25, 4));
        // (20 + 25) / 2 = 22.5 -> floor
        assert_eq!(buf.median_price(), Some(22));
    }

    #[test]
    fn test_median_no_overflow() {
        let mut buf = ObservationBuffer::new(4);
        buf.push(obs(u128::MAX, 1));
        buf.push(obs(u128::MAX - 2, 2));
        assert_eq!(buf.median_price(), Some(u128::MAX - 1));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut buf = ObservationBuffer::new(2);
        assert!(buf.push(obs(1, 1)).is_none());
        assert!(buf.push(obs(2, 2)).is_none());
        assert_eq!(buf.push(obs(3, 3)), Some(obs(1, 1)));
        assert_eq!(buf.first().unwrap().captured_at, 2);
        assert_eq!(buf.last().unwrap().captured_at, 3);
    }

    #[test]
    fn test_clear_empties() {
        let mut buf = ObservationBuffer::default();
        buf.push(obs(5, 1));
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.median_price(), None);
    }
}
