//! Fetch Coordinator - Concurrent Bounded-time Source Fan-out
//!
//! Polls every active source of a pair at once, each under the same
//! deadline. A slow or failing source only fails itself; the fan-in
//! returns as soon as every source settled or the deadline passed.
//! Every outcome is reported to the pair's `SourceManager` before the
//! quotes are handed to aggregation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::domain::pair::TradingPair;
use crate::domain::source_manager::SourceManager;
use crate::ports::price_fetcher::{FetchError, PriceFetcher};

/// Outcome of one source fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
  pub source: String,
  pub outcome: Result<f64, FetchError>,
  pub latency: Duration,
}

/// Result of a fan-out round.
#[derive(Debug, Clone, PartialEq)]
pub enum FanIn {
  /// Every polled source produced a quote or failure.
  Settled(Vec<Quote>),
  /// Shutdown arrived while waiting; nothing was recorded.
  Cancelled,
}

/// Fans a pair's price request out to its sources.
pub struct FetchCoordinator {
  /// Fetchers keyed by source name.
  fetchers: BTreeMap<String, Arc<dyn PriceFetcher>>,
  /// Per-fetch deadline.
  timeout: Duration,
  metrics: Arc<MetricsRegistry>,
}

impl FetchCoordinator {
  /// Create a coordinator over `fetchers`. Later duplicates of a name win.
  pub fn new(
    fetchers: impl IntoIterator<Item = Arc<dyn PriceFetcher>>,
    timeout: Duration,
    metrics: Arc<MetricsRegistry>,
  ) -> Self {
    let fetchers = fetchers
      .into_iter()
      .map(|f| (f.name().to_string(), f))
      .collect();
    Self {
      fetchers,
      timeout,
      metrics,
    }
  }

  /// Names of every source this coordinator can poll.
  pub fn source_names(&self) -> Vec<String> {
    self.fetchers.keys().cloned().collect()
  }

  /// Sources that can quote `pair`.
  pub fn supported_sources(&self, pair: &TradingPair) -> Vec<String> {
    self
      .fetchers
      .iter()
      .filter(|(_, f)| f.supports_pair(pair))
      .map(|(name, _)| name.clone())
      .collect()
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  /// Poll all sources active in `sources`, record each outcome, and return
  /// the quotes. Returns [`FanIn::Cancelled`] if `shutdown` fires first.
  pub async fn collect(
    &self,
    pair: &TradingPair,
    sources: &mut SourceManager,
    shutdown: &mut broadcast::Receiver<()>,
  ) -> FanIn {
    let active = sources.active_sources();
    let deadline = Instant::now() + self.timeout;

    let fetches = active.iter().filter_map(|name| {
      let fetcher = Arc::clone(self.fetchers.get(name)?);
      Some(async move {
        let started = Instant::now();
        let outcome = match timeout_at(deadline, fetcher.fetch(pair, deadline)).await {
          Ok(Ok(price)) if price.is_finite() && price > 0.0 => Ok(price),
          Ok(Ok(price)) => Err(FetchError::InvalidPrice(price)),
          Ok(Err(e)) => Err(e),
          Err(_) => Err(FetchError::Timeout),
        };
        Quote {
          source: name.clone(),
          outcome,
          latency: started.elapsed(),
        }
      })
    });

    let quotes = tokio::select! {
      biased;
      _ = shutdown.recv() => return FanIn::Cancelled,
      quotes = join_all(fetches) => quotes,
    };

    for quote in &quotes {
      self.record(pair, sources, quote);
    }
    FanIn::Settled(quotes)
  }

  fn record(&self, pair: &TradingPair, sources: &mut SourceManager, quote: &Quote) {
    let pair_label = pair.to_string();
    self
      .metrics
      .source_fetch_latency
      .with_label_values(&[&quote.source])
      .observe(quote.latency.as_secs_f64());

    match &quote.outcome {
      Ok(price) => {
        sources.record_success(&quote.source);
        self
          .metrics
          .source_fetches
          .with_label_values(&[&pair_label, &quote.source, "ok"])
          .inc();
        self
          .metrics
          .source_backoff_seconds
          .with_label_values(&[&pair_label, &quote.source])
          .set(0.0);
        debug!(
          pair = %pair,
          source = %quote.source,
          price,
          latency_ms = quote.latency.as_millis() as u64,
          "Source quote"
        );
      }
      Err(e) => {
        let backoff = sources.record_failure(&quote.source);
        self
          .metrics
          .source_fetches
          .with_label_values(&[&pair_label, &quote.source, e.kind()])
          .inc();
        self
          .metrics
          .source_backoff_seconds
          .with_label_values(&[&pair_label, &quote.source])
          .set(backoff.as_secs_f64());
        warn!(
          pair = %pair,
          source = %quote.source,
          error = %e,
          backoff_secs = backoff.as_secs(),
          "Source fetch failed, backing off"
        );
      }
    }
  }
}

/// Successful quotes keyed by source, ready for aggregation.
pub fn successful_prices(quotes: &[Quote]) -> BTreeMap<String, f64> {
  quotes
    .iter()
    .filter_map(|q| q.outcome.as_ref().ok().map(|p| (q.source.clone(), *p)))
    .collect()
}
