//! Round - One Committed Aggregate Observation
//!
//! A round covers the observations accepted since the previous commit and
//! carries their median price plus the window they span.

use super::observation::ObservationBuffer;

/// A round ready for submission to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Round {
    /// Strictly increasing per pair.
    pub round_id: u64,
    /// Median fixed-point price of the window.
    pub price: u128,
    /// Timestamp of the first observation (Unix seconds).
    pub window_start: i64,
    /// Timestamp of the last observation (Unix seconds).
    pub window_end: i64,
    /// Observations the round was built from.
    pub observation_count: usize,
}

impl Round {
    /// Build round `round_id` from the buffered observations. Returns
    /// `None` when the buffer is empty. The buffer is left untouched.
    pub fn from_observations(round_id: u64, buffer: &ObservationBuffer) -> Option<Self> {
        let price = buffer.median_price()?;
        let first = buffer.first()?;
        let last = buffer.last()?;
        Some(Self {
            round_id,
            price,
            window_start: first.captured_at,
            window_end: last.captured_at,
            observation_count: buffer.len(),
        })
    }
}
