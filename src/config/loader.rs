//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;
use crate::adapters::feeds::AVAILABLE_SOURCES;
use crate::domain::pair::TradingPair;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    pairs = config.feed.pairs.len(),
    sources = config.feed.sources.len(),
    min_sources = config.aggregation.min_sources,
    dry_run = config.oracle.dry_run,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig =
    toml::from_str(content).with_context(|| "Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Configured pairs, parsed.
pub fn parse_pairs(config: &AppConfig) -> Result<Vec<TradingPair>> {
  config
    .feed
    .pairs
    .iter()
    .map(|p| {
      p.parse::<TradingPair>()
        .with_context(|| format!("Invalid pair in [feed].pairs: {p}"))
    })
    .collect()
}

/// Validate all configuration parameters.
fn validate_config(config: &AppConfig) -> Result<()> {
  // Pair validation
  anyhow::ensure!(
    !config.feed.pairs.is_empty(),
    "At least one pair must be configured"
  );
  let pairs = parse_pairs(config)?;
  let unique: HashSet<&TradingPair> = pairs.iter().collect();
  anyhow::ensure!(
    unique.len() == pairs.len(),
    "Duplicate pairs in [feed].pairs"
  );

  // Source validation
  anyhow::ensure!(
    !config.feed.sources.is_empty(),
    "At least one source must be configured"
  );
  for source in &config.feed.sources {
    anyhow::ensure!(
      AVAILABLE_SOURCES.contains(&source.as_str()),
      "Unknown source '{}', available: {}",
      source,
      AVAILABLE_SOURCES.join(", ")
    );
  }
  let unique: HashSet<&String> = config.feed.sources.iter().collect();
  anyhow::ensure!(
    unique.len() == config.feed.sources.len(),
    "Duplicate sources in [feed].sources"
  );

  // Timing validation
  anyhow::ensure!(
    config.feed.fetch_period_seconds >= 1,
    "fetch_period_seconds must be at least 1, got {}",
    config.feed.fetch_period_seconds
  );
  anyhow::ensure!(
    config.feed.submit_period_seconds >= 6,
    "submit_period_seconds must be at least 6, got {}",
    config.feed.submit_period_seconds
  );
  anyhow::ensure!(
    config.feed.submit_period_seconds >= config.feed.fetch_period_seconds,
    "submit_period_seconds ({}) must not be shorter than fetch_period_seconds ({})",
    config.feed.submit_period_seconds,
    config.feed.fetch_period_seconds
  );
  anyhow::ensure!(
    config.feed.fetch_timeout_seconds >= 1,
    "fetch_timeout_seconds must be at least 1"
  );

  // Aggregation validation
  let agg = &config.aggregation;
  anyhow::ensure!(agg.min_sources >= 1, "min_sources must be at least 1");
  anyhow::ensure!(
    agg.min_sources <= config.feed.sources.len(),
    "min_sources ({}) exceeds configured sources ({})",
    agg.min_sources,
    config.feed.sources.len()
  );
  anyhow::ensure!(
    agg.max_deviation_percent > 0.0 && agg.max_deviation_percent.is_finite(),
    "max_deviation_percent must be positive, got {}",
    agg.max_deviation_percent
  );
  anyhow::ensure!(
    agg.drift_limit_percent >= 0.0 && agg.drift_limit_percent.is_finite(),
    "drift_limit_percent must be >= 0 (0 disables), got {}",
    agg.drift_limit_percent
  );
  anyhow::ensure!(
    agg.max_observations >= 1,
    "max_observations must be at least 1"
  );

  // Backoff validation
  anyhow::ensure!(
    config.backoff.base_seconds >= 1,
    "backoff base_seconds must be at least 1"
  );
  anyhow::ensure!(
    config.backoff.max_seconds >= config.backoff.base_seconds,
    "backoff max_seconds ({}) must be >= base_seconds ({})",
    config.backoff.max_seconds,
    config.backoff.base_seconds
  );

  // Health validation
  anyhow::ensure!(
    config.health.stale_after_seconds >= config.feed.submit_period_seconds,
    "stale_after_seconds ({}) must be >= submit_period_seconds ({})",
    config.health.stale_after_seconds,
    config.feed.submit_period_seconds
  );

  // Chain validation
  anyhow::ensure!(
    config.chain.receipt_timeout_seconds >= 1,
    "receipt_timeout_seconds must be at least 1"
  );
  if !config.oracle.dry_run {
    anyhow::ensure!(
      !config.chain.rpc_url.is_empty(),
      "Chain RPC URL must not be empty"
    );
    let needs_directory = pairs
      .iter()
      .any(|p| !config.chain.aggregator_addresses.contains_key(&p.to_string()));
    if needs_directory {
      anyhow::ensure!(
        config.chain.price_feed_directory.is_some(),
        "price_feed_directory is required unless every pair has an aggregator_addresses entry"
      );
      anyhow::ensure!(
        config.chain.app_id.as_deref().is_some_and(|id| !id.is_empty()),
        "app_id is required to resolve feeds from the directory"
      );
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const MINIMAL: &str = r#"
    [oracle]
    name = "test-oracle"
    dry_run = true

    [feed]
    pairs = ["btc/usd", "ETH/USD"]
    sources = ["coinbase", "kraken", "bitstamp"]

    [chain]
    rpc_url = "http://localhost:8545"
  "#;

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_defaults_applied() {
    let config = parse_config(MINIMAL).unwrap();
    assert_eq!(config.feed.fetch_period_seconds, 60);
    assert_eq!(config.feed.submit_period_seconds, 300);
    assert_eq!(config.feed.fetch_timeout_seconds, 10);
    assert_eq!(config.aggregation.min_sources, 2);
    assert!((config.aggregation.drift_limit_percent - 10.0).abs() < f64::EPSILON);
    assert_eq!(config.backoff.max_seconds, 300);
    assert_eq!(config.health.bind_address, "0.0.0.0:8080");
    assert_eq!(config.health.stale_after_seconds, 900);
    assert_eq!(config.chain.receipt_timeout_seconds, 120);

    let pairs = parse_pairs(&config).unwrap();
    assert_eq!(pairs[1], TradingPair::new("eth", "usd"));
  }

  #[test]
  fn test_rejects_unknown_source() {
    let toml = MINIMAL.replace("\"bitstamp\"", "\"mtgox\"");
    let err = parse_config(&toml).unwrap_err();
    assert!(format!("{err:#}").contains("Unknown source 'mtgox'"));
  }

  #[test]
  fn test_rejects_malformed_pair() {
    let toml = MINIMAL.replace("\"btc/usd\"", "\"btcusd\"");
    assert!(parse_config(&toml).is_err());
  }

  #[test]
  fn test_rejects_short_submit_period() {
    let toml = MINIMAL.replace(
      "sources = [",
      "submit_period_seconds = 5\n    sources = [",
    );
    assert!(parse_config(&toml).is_err());
  }

  #[test]
  fn test_rejects_zero_receipt_timeout() {
    let toml = format!("{MINIMAL}\n    receipt_timeout_seconds = 0\n");
    let err = parse_config(&toml).unwrap_err();
    assert!(format!("{err:#}").contains("receipt_timeout_seconds"));
  }

  #[test]
  fn test_live_mode_requires_directory() {
    let toml = MINIMAL.replace("dry_run = true", "dry_run = false");
    let err = parse_config(&toml).unwrap_err();
    assert!(format!("{err:#}").contains("price_feed_directory"));

    let with_dir = format!(
      "{toml}\n    price_feed_directory = \"0x0000000000000000000000000000000000001000\"\n    app_id = \"0x01\"\n"
    );
    assert!(parse_config(&with_dir).is_ok());
  }
}
