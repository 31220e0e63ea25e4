//! Round Submitter - Periodic Commit of Buffered Observations
//!
//! Once per submit period, measured from the last successful commit,
//! turns the buffered observations into a round and hands it to the
//! ledger. Round ids advance only on success; on failure the buffer is
//! kept and the same id is retried on the next cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::domain::observation::ObservationBuffer;
use crate::domain::pair::TradingPair;
use crate::domain::round::Round;
use crate::ports::ledger::{Ledger, LedgerError, SubmissionReceipt};

/// What a submission check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
  /// The submit period has not elapsed yet.
  NotDue,
  /// Due, but nothing was buffered.
  Skipped,
  /// The round was committed.
  Submitted {
    round: Round,
    receipt: SubmissionReceipt,
  },
  /// The ledger refused or failed; the round will be retried.
  Failed { round_id: u64, error: LedgerError },
}

/// Per-pair round production and submission.
pub struct RoundSubmitter {
  ledger: Arc<dyn Ledger>,
  pair: TradingPair,
  submit_period: Duration,
  /// Last committed round id.
  last_round_id: u64,
  /// Last successful commit, or loop start.
  last_submission: Instant,
  /// Submit boundary for which an empty-buffer skip was already logged.
  skip_logged_for: Option<Instant>,
}

impl RoundSubmitter {
  /// `last_round_id` is read from the ledger once at startup.
  pub fn new(
    ledger: Arc<dyn Ledger>,
    pair: TradingPair,
    submit_period: Duration,
    last_round_id: u64,
    started_at: Instant,
  ) -> Self {
    Self {
      ledger,
      pair,
      submit_period,
      last_round_id,
      last_submission: started_at,
      skip_logged_for: None,
    }
  }

  pub fn last_round_id(&self) -> u64 {
    self.last_round_id
  }

  pub fn last_submission(&self) -> Instant {
    self.last_submission
  }

  /// Whether a submission is due at `now`.
  pub fn is_due(&self, now: Instant) -> bool {
    now.saturating_duration_since(self.last_submission) >= self.submit_period
  }

  /// Submit a round if one is due. The buffer is cleared only when the
  /// ledger accepted the round.
  #[instrument(skip(self, buffer), fields(pair = %self.pair, buffered = buffer.len()))]
  pub async fn maybe_submit(&mut self, buffer: &mut ObservationBuffer, now: Instant) -> SubmitOutcome {
    if !self.is_due(now) {
      return SubmitOutcome::NotDue;
    }

    let round_id = self.last_round_id + 1;
    let Some(round) = Round::from_observations(round_id, buffer) else {
      let boundary = self.last_submission + self.submit_period;
      if self.skip_logged_for != Some(boundary) {
        warn!(
          pair = %self.pair,
          round_id,
          overdue_secs = now.saturating_duration_since(boundary).as_secs(),
          "No accepted observations, skipping round"
        );
        self.skip_logged_for = Some(boundary);
      }
      return SubmitOutcome::Skipped;
    };

    match self.ledger.submit_round(&self.pair, &round).await {
      Ok(receipt) => {
        buffer.clear();
        self.last_round_id = round.round_id;
        self.last_submission = now;
        self.skip_logged_for = None;
        info!(
          pair = %self.pair,
          round_id = round.round_id,
          price = %round.price,
          observations = round.observation_count,
          window_start = round.window_start,
          window_end = round.window_end,
          tx_hash = receipt.tx_hash.as_deref().unwrap_or("-"),
          "Round submitted"
        );
        SubmitOutcome::Submitted { round, receipt }
      }
      Err(e) => {
        error!(
          pair = %self.pair,
          round_id,
          error = %e,
          buffered = buffer.len(),
          "Round submission failed, will retry"
        );
        SubmitOutcome::Failed { round_id, error: e }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  use async_trait::async_trait;

  use crate::domain::observation::Observation;
  use crate::ports::ledger::LatestRound;

  #[derive(Default)]
  struct RecordingLedger {
    fail: Mutex<bool>,
    rounds: Mutex<Vec<Round>>,
  }

  #[async_trait]
  impl Ledger for RecordingLedger {
    async fn latest_round(&self, _pair: &TradingPair) -> Result<LatestRound, LedgerError> {
      Ok(LatestRound {
        round_id: 0,
        price: 0,
        decimals: 10,
      })
    }

    async fn submit_round(
      &self,
      _pair: &TradingPair,
      round: &Round,
    ) -> Result<SubmissionReceipt, LedgerError> {
      if *self.fail.lock().unwrap() {
        return Err(LedgerError::Rpc("connection refused".into()));
      }
      self.rounds.lock().unwrap().push(*round);
      Ok(SubmissionReceipt {
        round_id: round.round_id,
        tx_hash: None,
      })
    }
  }

  fn buffer_with(prices: &[u128]) -> ObservationBuffer {
    let mut buf = ObservationBuffer::new(64);
    for (i, &price) in prices.iter().enumerate() {
      buf.push(Observation {
        price,
        captured_at: 1_000 + i as i64 * 60,
      });
    }
    buf
  }

  #[tokio::test(start_paused = true)]
  async fn test_not_due_then_submitted() {
    let ledger = Arc::new(RecordingLedger::default());
    let start = Instant::now();
    let mut sub = RoundSubmitter::new(
      ledger.clone(),
      TradingPair::new("btc", "usd"),
      Duration::from_secs(300),
      41,
      start,
    );
    let mut buf = buffer_with(&[10, 30, 20]);

    assert_eq!(
      sub.maybe_submit(&mut buf, start + Duration::from_secs(299)).await,
      SubmitOutcome::NotDue
    );

    let outcome = sub.maybe_submit(&mut buf, start + Duration::from_secs(300)).await;
    let SubmitOutcome::Submitted { round, .. } = outcome else {
      panic!("expected submission, got {outcome:?}");
    };
    assert_eq!(round.round_id, 42);
    assert_eq!(round.price, 20);
    assert_eq!(round.window_start, 1_000);
    assert_eq!(round.window_end, 1_120);
    assert!(buf.is_empty());
    assert_eq!(sub.last_round_id(), 42);
  }

  #[tokio::test(start_paused = true)]
  async fn test_empty_buffer_skips_without_reset() {
    let ledger = Arc::new(RecordingLedger::default());
    let start = Instant::now();
    let mut sub = RoundSubmitter::new(ledger.clone(), TradingPair::new("btc", "usd"), Duration::from_secs(60), 0, start);
    let mut buf = ObservationBuffer::new(8);

    let t = start + Duration::from_secs(60);
    assert_eq!(sub.maybe_submit(&mut buf, t).await, SubmitOutcome::Skipped);
    assert_eq!(sub.last_submission(), start);

    // Still due on the next cycle, so the first observation commits at once.
    buf.push(Observation {
      price: 5,
      captured_at: 1,
    });
    let outcome = sub.maybe_submit(&mut buf, t + Duration::from_secs(1)).await;
    assert!(matches!(outcome, SubmitOutcome::Submitted { .. }));
    assert!(ledger.rounds.lock().unwrap().len() == 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_keeps_buffer_and_id() {
    let ledger = Arc::new(RecordingLedger::default());
    *ledger.fail.lock().unwrap() = true;
    let start = Instant::now();
    let mut sub = RoundSubmitter::new(ledger.clone(), TradingPair::new("eth", "usd"), Duration::from_secs(60), 7, start);
    let mut buf = buffer_with(&[100, 200]);

    let t = start + Duration::from_secs(60);
    let outcome = sub.maybe_submit(&mut buf, t).await;
    assert!(matches!(outcome, SubmitOutcome::Failed { round_id: 8, .. }));
    assert_eq!(buf.len(), 2);
    assert_eq!(sub.last_round_id(), 7);

    *ledger.fail.lock().unwrap() = false;
    let outcome = sub.maybe_submit(&mut buf, t + Duration::from_secs(5)).await;
    let SubmitOutcome::Submitted { round, .. } = outcome else {
      panic!("expected retry to succeed");
    };
    assert_eq!(round.round_id, 8);
    assert_eq!(round.price, 150);
  }
}
