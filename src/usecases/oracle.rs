//! Price Oracle - Spawns and Tracks One Feed Loop per Pair
//!
//! Resolves which sources serve each pair, initialises every loop from
//! the ledger, and starts them with a small stagger so the pairs do not
//! hit the price APIs in lockstep.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::adapters::metrics::MetricsRegistry;
use crate::domain::pair::TradingPair;
use crate::domain::usdt_rate::UsdtRateCache;
use crate::ports::ledger::Ledger;

use super::feed_loop::{FeedLoop, FeedSettings};
use super::fetch_coordinator::FetchCoordinator;
use super::status::StatusBoard;

/// Handles of the spawned pair loops.
pub struct RunningOracle {
  /// Read side of every pair's status.
  pub status: StatusBoard,
  /// One task per pair.
  pub handles: Vec<(TradingPair, JoinHandle<()>)>,
}

/// Top-level orchestrator.
pub struct PriceOracle {
  pairs: Vec<TradingPair>,
  settings: FeedSettings,
  coordinator: Arc<FetchCoordinator>,
  ledger: Arc<dyn Ledger>,
  metrics: Arc<MetricsRegistry>,
  startup_stagger: Duration,
  usdt_rate: Arc<UsdtRateCache>,
}

impl PriceOracle {
  pub fn new(
    pairs: Vec<TradingPair>,
    settings: FeedSettings,
    coordinator: Arc<FetchCoordinator>,
    ledger: Arc<dyn Ledger>,
    metrics: Arc<MetricsRegistry>,
    startup_stagger: Duration,
    usdt_rate: Arc<UsdtRateCache>,
  ) -> Self {
    Self {
      pairs,
      settings,
      coordinator,
      ledger,
      metrics,
      startup_stagger,
      usdt_rate,
    }
  }

  /// Start every pair loop. Fails if any pair has too few supporting
  /// sources to reach quorum or its ledger state cannot be read.
  #[instrument(skip_all, fields(pairs = self.pairs.len()))]
  pub async fn spawn(self, shutdown_tx: &broadcast::Sender<()>) -> Result<RunningOracle> {
    let mut status = StatusBoard::new();
    let mut handles = Vec::with_capacity(self.pairs.len());

    for (i, pair) in self.pairs.iter().enumerate() {
      if i > 0 && !self.startup_stagger.is_zero() {
        tokio::time::sleep(self.startup_stagger).await;
      }

      let supported = self.coordinator.supported_sources(pair);
      let excluded: Vec<String> = self
        .coordinator
        .source_names()
        .into_iter()
        .filter(|s| !supported.contains(s))
        .collect();
      if !excluded.is_empty() {
        info!(pair = %pair, excluded = ?excluded, "Sources without this pair excluded");
      }

      let (feed, status_rx) = FeedLoop::start(
        pair.clone(),
        supported,
        &self.settings,
        Arc::clone(&self.coordinator),
        Arc::clone(&self.ledger),
        Arc::clone(&self.metrics),
      )
      .await?;
      let feed = if pair.base() == "usdt" && pair.quote() == "usd" {
        feed.with_usdt_rate(Arc::clone(&self.usdt_rate))
      } else {
        feed
      };
      status.insert(pair.to_string(), status_rx);

      let shutdown_rx = shutdown_tx.subscribe();
      let task_pair = pair.clone();
      let handle = tokio::spawn(async move {
        if let Err(e) = feed.run(shutdown_rx).await {
          error!(pair = %task_pair, error = %e, "Feed loop failed");
        }
      });
      handles.push((pair.clone(), handle));
    }

    info!(pairs = handles.len(), "All feed loops spawned");
    Ok(RunningOracle { status, handles })
  }
}
