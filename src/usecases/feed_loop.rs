//! Feed Loop - Per-pair Fetch, Aggregate, Submit Cycle
//!
//! One loop per pair, owning all of that pair's mutable state:
//!
//! ```text
//! FETCHING -> AGGREGATING -> ACCEPTED | REJECTED -> [SUBMITTING] -> SLEEPING
//! FETCHING -> SLEEPING            (no active source)
//! ```
//!
//! `last_good_price` moves only on ACCEPTED. Shutdown is observed at the
//! top of each cycle, during the fetch fan-in, and while sleeping.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::config::AppConfig;
use crate::domain::aggregator::{
  AcceptedPrice, AggregatorConfig, PriceAggregator, Rejection, RejectionReason,
};
use crate::domain::observation::{
  DEFAULT_MAX_OBSERVATIONS, Observation, ObservationBuffer, from_fixed_point, to_fixed_point,
};
use crate::domain::pair::TradingPair;
use crate::domain::source_manager::{BackoffPolicy, SourceManager};
use crate::domain::usdt_rate::UsdtRateCache;
use crate::ports::ledger::Ledger;

use super::fetch_coordinator::{FanIn, FetchCoordinator, successful_prices};
use super::round_submitter::{RoundSubmitter, SubmitOutcome};
use super::status::{PairSnapshot, SourceHealth};

/// Timing and aggregation parameters shared by every pair loop.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
  pub fetch_period: Duration,
  pub submit_period: Duration,
  pub aggregator: AggregatorConfig,
  pub backoff: BackoffPolicy,
  pub max_observations: usize,
}

impl Default for FeedSettings {
  fn default() -> Self {
    Self {
      fetch_period: Duration::from_secs(60),
      submit_period: Duration::from_secs(300),
      aggregator: AggregatorConfig::default(),
      backoff: BackoffPolicy::default(),
      max_observations: DEFAULT_MAX_OBSERVATIONS,
    }
  }
}

impl FeedSettings {
  pub fn from_config(config: &AppConfig) -> Self {
    let drift = config.aggregation.drift_limit_percent;
    Self {
      fetch_period: Duration::from_secs(config.feed.fetch_period_seconds),
      submit_period: Duration::from_secs(config.feed.submit_period_seconds),
      aggregator: AggregatorConfig {
        min_sources: config.aggregation.min_sources,
        max_deviation_percent: config.aggregation.max_deviation_percent,
        drift_limit_percent: (drift > 0.0).then_some(drift),
        strict_cold_start: config.aggregation.strict_cold_start,
      },
      backoff: BackoffPolicy {
        base: Duration::from_secs(config.backoff.base_seconds),
        max: Duration::from_secs(config.backoff.max_seconds),
      },
      max_observations: config.aggregation.max_observations,
    }
  }
}

/// What a single cycle ended in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
  /// Every source was backing off; nothing fetched.
  NoActiveSources,
  Accepted(f64),
  Rejected(RejectionReason),
  /// Accepted by the aggregator but too large for the ledger's
  /// fixed-point precision; nothing buffered.
  Unrepresentable(f64),
  /// Shutdown arrived mid-cycle.
  Cancelled,
}

/// The per-pair state machine.
pub struct FeedLoop {
  pair: TradingPair,
  coordinator: Arc<FetchCoordinator>,
  aggregator: PriceAggregator,
  sources: SourceManager,
  buffer: ObservationBuffer,
  submitter: RoundSubmitter,
  /// Last accepted price, seeded from the ledger.
  last_good_price: Option<f64>,
  /// Fixed-point precision reported by the ledger.
  decimals: u32,
  fetch_period: Duration,
  metrics: Arc<MetricsRegistry>,
  snapshot: PairSnapshot,
  status_tx: watch::Sender<PairSnapshot>,
  /// Set on the `usdt/usd` loop; receives every accepted price.
  usdt_rate: Option<Arc<UsdtRateCache>>,
}

impl FeedLoop {
  /// Read the pair's latest committed round and build the loop.
  ///
  /// `sources` must be the sources that support this pair, and there must
  /// be enough of them to ever reach the aggregator's quorum.
  #[instrument(skip_all, fields(pair = %pair))]
  pub async fn start(
    pair: TradingPair,
    sources: Vec<String>,
    settings: &FeedSettings,
    coordinator: Arc<FetchCoordinator>,
    ledger: Arc<dyn Ledger>,
    metrics: Arc<MetricsRegistry>,
  ) -> Result<(Self, watch::Receiver<PairSnapshot>)> {
    anyhow::ensure!(!sources.is_empty(), "No source supports pair {pair}");

    let aggregator = PriceAggregator::new(settings.aggregator.clone())
      .context("Invalid aggregation settings")?;

    let latest = ledger
      .latest_round(&pair)
      .await
      .with_context(|| format!("Failed to read latest round for {pair}"))?;

    let last_good_price =
      (latest.price > 0).then(|| from_fixed_point(latest.price, latest.decimals));

    let required = aggregator.required_sources(last_good_price);
    anyhow::ensure!(
      sources.len() >= required,
      "Pair {pair} needs {required} sources to accept a price but only {} support it: {}",
      sources.len(),
      sources.join(", ")
    );

    info!(
      pair = %pair,
      round_id = latest.round_id,
      decimals = latest.decimals,
      seeded_price = ?last_good_price,
      sources = ?sources,
      "Feed loop initialised from ledger"
    );

    let submitter = RoundSubmitter::new(
      ledger,
      pair.clone(),
      settings.submit_period,
      latest.round_id,
      Instant::now(),
    );

    let mut snapshot = PairSnapshot::new(pair.to_string(), Utc::now());
    snapshot.last_price = last_good_price;
    snapshot.last_round_id = latest.round_id;
    let (status_tx, status_rx) = watch::channel(snapshot.clone());

    let feed = Self {
      sources: SourceManager::new(sources, settings.backoff),
      buffer: ObservationBuffer::new(settings.max_observations),
      pair,
      coordinator,
      aggregator,
      submitter,
      last_good_price,
      decimals: latest.decimals,
      fetch_period: settings.fetch_period,
      metrics,
      snapshot,
      status_tx,
      usdt_rate: None,
    };
    Ok((feed, status_rx))
  }

  /// Publish accepted prices of this pair as the USDT/USD rate.
  #[must_use]
  pub fn with_usdt_rate(mut self, cache: Arc<UsdtRateCache>) -> Self {
    self.usdt_rate = Some(cache);
    self
  }

  pub fn pair(&self) -> &TradingPair {
    &self.pair
  }

  pub fn last_good_price(&self) -> Option<f64> {
    self.last_good_price
  }

  pub fn last_round_id(&self) -> u64 {
    self.submitter.last_round_id()
  }

  pub fn buffer(&self) -> &ObservationBuffer {
    &self.buffer
  }

  pub fn sources(&self) -> &SourceManager {
    &self.sources
  }

  /// Run until shutdown.
  #[instrument(skip_all, fields(pair = %self.pair))]
  pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    info!(
      period_secs = self.fetch_period.as_secs(),
      "Feed loop started"
    );

    loop {
      match shutdown.try_recv() {
        Err(TryRecvError::Empty) => {}
        _ => break,
      }

      if self.run_cycle(&mut shutdown).await == CycleOutcome::Cancelled {
        break;
      }

      tokio::select! {
        biased;
        _ = shutdown.recv() => break,
        () = tokio::time::sleep(self.fetch_period) => {}
      }
    }

    info!(
      buffered = self.buffer.len(),
      round_id = self.submitter.last_round_id(),
      "Feed loop stopped"
    );
    Ok(())
  }

  /// One FETCHING -> ... -> SLEEPING pass, without the sleep.
  pub async fn run_cycle(&mut self, shutdown: &mut broadcast::Receiver<()>) -> CycleOutcome {
    if self.sources.active_sources().is_empty() {
      debug!(pair = %self.pair, "All sources backing off, skipping fetch");
      self.publish();
      return CycleOutcome::NoActiveSources;
    }

    let quotes = match self
      .coordinator
      .collect(&self.pair, &mut self.sources, shutdown)
      .await
    {
      FanIn::Settled(quotes) => quotes,
      FanIn::Cancelled => return CycleOutcome::Cancelled,
    };

    let prices = successful_prices(&quotes);
    let outcome = match self.aggregator.aggregate(&prices, self.last_good_price) {
      Ok(accepted) => self.on_accepted(&accepted),
      Err(rejection) => self.on_rejected(&rejection),
    };

    self.submit_if_due().await;
    self.publish();
    outcome
  }

  fn on_accepted(&mut self, accepted: &AcceptedPrice) -> CycleOutcome {
    let pair_label = self.pair.to_string();
    let Some(fixed) = to_fixed_point(accepted.price, self.decimals) else {
      error!(
        pair = %self.pair,
        price = accepted.price,
        decimals = self.decimals,
        "Accepted price not representable in fixed point"
      );
      self.metrics
        .aggregations
        .with_label_values(&[&pair_label, "unrepresentable"])
        .inc();
      self.snapshot.last_rejection = Some("unrepresentable".to_string());
      return CycleOutcome::Unrepresentable(accepted.price);
    };

    let captured_at = Utc::now();
    if let Some(evicted) = self.buffer.push(Observation {
      price: fixed,
      captured_at: captured_at.timestamp(),
    }) {
      warn!(
        pair = %self.pair,
        capacity = self.buffer.capacity(),
        evicted_at = evicted.captured_at,
        "Observation buffer full, evicted oldest"
      );
    }

    self.last_good_price = Some(accepted.price);
    if let Some(cache) = &self.usdt_rate {
      cache.set(accepted.price);
    }
    self.snapshot.last_price = Some(accepted.price);
    self.snapshot.last_accepted_at = Some(captured_at);
    self.snapshot.last_rejection = None;

    self.metrics
      .aggregations
      .with_label_values(&[&pair_label, "accepted"])
      .inc();
    self.metrics
      .last_price
      .with_label_values(&[&pair_label])
      .set(accepted.price);

    for (source, dropped) in &accepted.dropped {
      info!(
        pair = %self.pair,
        source = %source,
        price = dropped.price,
        deviation_pct = dropped.deviation_percent,
        "Outlier excluded"
      );
    }
    info!(
      pair = %self.pair,
      price = accepted.price,
      initial_median = accepted.initial_median,
      sources = ?accepted.sources,
      buffered = self.buffer.len(),
      "Price accepted"
    );
    CycleOutcome::Accepted(accepted.price)
  }

  fn on_rejected(&mut self, rejection: &Rejection) -> CycleOutcome {
    let reason = rejection.reason();
    self.metrics
      .aggregations
      .with_label_values(&[&self.pair.to_string(), reason.as_str()])
      .inc();
    self.snapshot.last_rejection = Some(reason.as_str().to_string());

    match rejection {
      Rejection::InsufficientSources {
        available,
        required,
        invalid,
      } => warn!(
        pair = %self.pair,
        reason = reason.as_str(),
        available,
        required,
        invalid = ?invalid,
        "Aggregation rejected, holding last value"
      ),
      Rejection::TooManyOutliers {
        remaining,
        required,
        initial_median,
        dropped,
      } => warn!(
        pair = %self.pair,
        reason = reason.as_str(),
        remaining,
        required,
        initial_median,
        dropped = ?dropped,
        "Aggregation rejected, holding last value"
      ),
      Rejection::DriftTooLarge {
        drift_percent,
        limit_percent,
        previous_price,
        candidate_price,
      } => warn!(
        pair = %self.pair,
        reason = reason.as_str(),
        drift_pct = drift_percent,
        limit_pct = limit_percent,
        previous_price,
        candidate_price,
        "Aggregation rejected, holding last value"
      ),
    }
    CycleOutcome::Rejected(reason)
  }

  async fn submit_if_due(&mut self) {
    let pair_label = self.pair.to_string();
    match self
      .submitter
      .maybe_submit(&mut self.buffer, Instant::now())
      .await
    {
      SubmitOutcome::Submitted { round, .. } => {
        self.snapshot.last_submitted_at = Some(Utc::now());
        self.snapshot.last_round_id = round.round_id;
        self.metrics
          .rounds_submitted
          .with_label_values(&[&pair_label])
          .inc();
      }
      SubmitOutcome::Failed { .. } => {
        self.metrics
          .submission_failures
          .with_label_values(&[&pair_label])
          .inc();
      }
      SubmitOutcome::NotDue | SubmitOutcome::Skipped => {}
    }
  }

  fn publish(&mut self) {
    let pair_label = self.pair.to_string();
    let now = Utc::now();

    self.snapshot.buffered = self.buffer.len();
    self.snapshot.sources = self
      .sources
      .all_status()
      .into_iter()
      .map(SourceHealth::from)
      .collect();

    #[allow(clippy::cast_precision_loss)]
    {
      self.metrics
        .observations_buffered
        .with_label_values(&[&pair_label])
        .set(i64::try_from(self.buffer.len()).unwrap_or(i64::MAX));
      self.metrics
        .seconds_since_accepted
        .with_label_values(&[&pair_label])
        .set(self.snapshot.seconds_since_accepted(now) as f64);
      self.metrics
        .seconds_since_submission
        .with_label_values(&[&pair_label])
        .set(self.snapshot.seconds_since_submission(now) as f64);
    }

    self.status_tx.send_replace(self.snapshot.clone());
  }
}
