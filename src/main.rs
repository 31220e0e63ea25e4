//! Aggregated Price Oracle - Entry Point
//!
//! Initializes configuration, logging, price sources and the round
//! ledger, then runs one feed loop per pair until SIGINT/SIGTERM.
//!
//! Wiring sequence:
//! 1. Load config.toml (or the path given as first argument) + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Build the shared HTTP client and price fetchers
//! 4. Build the ledger: dry-run, or aggregator contracts signed with
//!    ORACLE_PRIVATE_KEY
//! 5. Spawn Prometheus metrics server on :9090
//! 6. Spawn one feed loop per pair (staggered)
//! 7. Spawn health server on :8080 (/live, /ready, /status)
//! 8. Wait for SIGINT/SIGTERM, broadcast shutdown, join loops

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use aggregated_price_oracle::adapters::chain::{AggregatorLedger, ChainProvider, DryRunLedger};
use aggregated_price_oracle::adapters::feeds::{build_fetcher, http::build_client};
use aggregated_price_oracle::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use aggregated_price_oracle::config::{self, AppConfig};
use aggregated_price_oracle::domain::pair::TradingPair;
use aggregated_price_oracle::domain::usdt_rate::UsdtRateCache;
use aggregated_price_oracle::ports::ledger::Ledger;
use aggregated_price_oracle::usecases::feed_loop::FeedSettings;
use aggregated_price_oracle::usecases::fetch_coordinator::FetchCoordinator;
use aggregated_price_oracle::usecases::oracle::PriceOracle;

/// How long each pair loop gets to finish its cycle after shutdown.
const LOOP_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".into());
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.oracle.log_level)),
        )
        .json()
        .init();

    let pairs = config::loader::parse_pairs(&config)?;

    info!(
        name = %config.oracle.name,
        version = env!("CARGO_PKG_VERSION"),
        dry_run = config.oracle.dry_run,
        pairs = pairs.len(),
        sources = ?config.feed.sources,
        "Starting aggregated price oracle"
    );

    // ── 3. Shutdown and health channels ─────────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let (health_tx, health_rx) = watch::channel(true);

    // ── 4. Price sources ────────────────────────────────────
    let fetch_timeout = Duration::from_secs(config.feed.fetch_timeout_seconds);
    let client = build_client(fetch_timeout)?;
    let usdt_rate = Arc::new(UsdtRateCache::default());
    let fetchers = config
        .feed
        .sources
        .iter()
        .map(|name| {
            let key = config.api_key(name);
            build_fetcher(name, &client, key.as_deref(), &usdt_rate)
        })
        .collect::<Result<Vec<_>>>()?;

    let metrics = Arc::new(MetricsRegistry::new()?);
    let coordinator = Arc::new(FetchCoordinator::new(
        fetchers,
        fetch_timeout,
        Arc::clone(&metrics),
    ));

    // ── 5. Ledger ───────────────────────────────────────────
    let ledger = build_ledger(&config, &pairs).await?;

    // ── 6. Metrics server ───────────────────────────────────
    let metrics_handle = if config.metrics.enabled {
        let server = Arc::clone(&metrics);
        let address = config.metrics.bind_address.clone();
        let shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = server.serve(address, shutdown).await {
                error!(error = %e, "Metrics server failed");
            }
        }))
    } else {
        None
    };

    // ── 7. Feed loops ───────────────────────────────────────
    let oracle = PriceOracle::new(
        pairs,
        FeedSettings::from_config(&config),
        coordinator,
        ledger,
        metrics,
        Duration::from_millis(config.feed.startup_stagger_ms),
        usdt_rate,
    );
    let running = oracle.spawn(&shutdown_tx).await?;

    // ── 8. Health server ────────────────────────────────────
    let health = HealthServer::new(
        HealthState::new(
            health_rx,
            running.status.clone(),
            Duration::from_secs(config.health.stale_after_seconds),
        ),
        config.health.bind_address.clone(),
    );
    let health_shutdown = shutdown_tx.subscribe();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health.run(health_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });

    info!("All tasks spawned, oracle is running");

    // ── 9. Wait for SIGINT or SIGTERM ───────────────────────
    wait_for_signal().await;

    // 1. Mark health as unhealthy (readiness probe → 503)
    let _ = health_tx.send(false);

    // 2. Signal all tasks to stop
    let _ = shutdown_tx.send(());
    info!("Shutdown signal broadcast to all tasks");

    // 3. Let every pair loop finish its cycle
    for (pair, handle) in running.handles {
        match tokio::time::timeout(LOOP_SHUTDOWN_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(pair = %pair, error = %e, "Feed loop panicked"),
            Err(_) => warn!(pair = %pair, "Feed loop did not stop in time"),
        }
    }

    // 4. Stop servers
    if let Some(handle) = metrics_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;

    info!("Shutdown complete");
    Ok(())
}

/// Dry-run ledger, or aggregator contracts behind a signing provider.
async fn build_ledger(config: &AppConfig, pairs: &[TradingPair]) -> Result<Arc<dyn Ledger>> {
    if config.oracle.dry_run {
        warn!("Dry-run mode: rounds are logged, NOT submitted");
        return Ok(Arc::new(DryRunLedger::new()));
    }

    let provider = Arc::new(ChainProvider::connect(&config.chain).await?);
    let ledger = AggregatorLedger::resolve(
        provider,
        pairs,
        config.chain.price_feed_directory.as_deref(),
        config.chain.app_id.as_deref(),
        &config.chain.aggregator_addresses,
        Duration::from_secs(config.chain.receipt_timeout_seconds),
    )
    .await?;
    Ok(Arc::new(ledger))
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGINT received, initiating graceful shutdown"),
                _ = term.recv() => info!("SIGTERM received, initiating graceful shutdown"),
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            info!("SIGINT received, initiating graceful shutdown");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("SIGINT received, initiating graceful shutdown");
}
