//! Pair Status - Per-pair Snapshots for Health and Staleness
//!
//! Each pair loop publishes a `PairSnapshot` on a `watch` channel after
//! every cycle. The health server reads the latest snapshots through a
//! `StatusBoard` without touching loop state.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::domain::source_manager::SourceStatus;

/// Health of one source as seen by one pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceHealth {
  pub name: String,
  pub active: bool,
  pub consecutive_failures: u32,
  pub backoff_remaining_secs: u64,
  pub total_failures: u64,
  pub total_successes: u64,
}

impl From<SourceStatus> for SourceHealth {
  fn from(status: SourceStatus) -> Self {
    Self {
      name: status.name,
      active: status.active,
      consecutive_failures: status.consecutive_failures,
      backoff_remaining_secs: status.backoff_remaining.as_secs(),
      total_failures: status.total_failures,
      total_successes: status.total_successes,
    }
  }
}

/// Latest observable state of a pair loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairSnapshot {
  /// Pair as `base/quote`.
  pub pair: String,
  /// Loop start time; staleness is measured from here until the first
  /// accept/commit.
  pub started_at: DateTime<Utc>,
  /// Last accepted aggregated price.
  pub last_price: Option<f64>,
  /// Last committed round id.
  pub last_round_id: u64,
  /// Observations waiting for the next round.
  pub buffered: usize,
  pub last_accepted_at: Option<DateTime<Utc>>,
  pub last_submitted_at: Option<DateTime<Utc>>,
  /// Reason of the most recent rejection, cleared on accept.
  pub last_rejection: Option<String>,
  pub sources: Vec<SourceHealth>,
}

impl PairSnapshot {
  pub fn new(pair: String, started_at: DateTime<Utc>) -> Self {
    Self {
      pair,
      started_at,
      last_price: None,
      last_round_id: 0,
      buffered: 0,
      last_accepted_at: None,
      last_submitted_at: None,
      last_rejection: None,
      sources: Vec::new(),
    }
  }

  /// Seconds since the last accepted aggregation (or loop start).
  pub fn seconds_since_accepted(&self, now: DateTime<Utc>) -> i64 {
    (now - self.last_accepted_at.unwrap_or(self.started_at))
      .num_seconds()
      .max(0)
  }

  /// Seconds since the last committed round (or loop start).
  pub fn seconds_since_submission(&self, now: DateTime<Utc>) -> i64 {
    (now - self.last_submitted_at.unwrap_or(self.started_at))
      .num_seconds()
      .max(0)
  }

  /// Stale when either the price or the commit is older than `threshold`.
  pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
    let limit = i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX);
    self.seconds_since_accepted(now) > limit || self.seconds_since_submission(now) > limit
  }
}

/// Read side of all pair snapshots.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
  pairs: BTreeMap<String, watch::Receiver<PairSnapshot>>,
}

impl StatusBoard {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, pair: String, rx: watch::Receiver<PairSnapshot>) {
    self.pairs.insert(pair, rx);
  }

  pub fn len(&self) -> usize {
    self.pairs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pairs.is_empty()
  }

  /// Latest snapshot of every pair, ordered by pair.
  pub fn snapshots(&self) -> Vec<PairSnapshot> {
    self.pairs.values().map(|rx| rx.borrow().clone()).collect()
  }

  /// Pairs whose snapshot is stale at `now`.
  pub fn stale_pairs(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<String> {
    self
      .pairs
      .iter()
      .filter(|(_, rx)| rx.borrow().is_stale(now, threshold))
      .map(|(pair, _)| pair.clone())
      .collect()
  }
}
