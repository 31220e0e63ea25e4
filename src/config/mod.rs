//! Configuration Module - TOML-based Oracle Configuration
//!
//! Loads and validates configuration from `config.toml`. API keys may be
//! overridden from the environment; the signing key is only ever read
//! from the environment. Contract addresses and pairs are externalized
//! here - nothing is hardcoded in the domain layer.

pub mod loader;

use std::collections::HashMap;

use serde::Deserialize;

/// Environment variable holding the submitter's private key.
pub const PRIVATE_KEY_ENV: &str = "ORACLE_PRIVATE_KEY";

/// Prefix of per-source API key overrides, e.g. `API_KEY_COINGECKO`.
pub const API_KEY_ENV_PREFIX: &str = "API_KEY_";

/// Top-level oracle configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before any loop starts.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Oracle identity and run mode.
  pub oracle: OracleConfig,
  /// Pairs, sources and timing.
  pub feed: FeedConfig,
  /// Aggregation thresholds.
  #[serde(default)]
  pub aggregation: AggregationConfig,
  /// Per-source failure backoff.
  #[serde(default)]
  pub backoff: BackoffConfig,
  /// Chain connection and contract addresses.
  pub chain: ChainConfig,
  /// Source API keys by source name.
  #[serde(default)]
  pub api_keys: HashMap<String, String>,
  /// Health server.
  #[serde(default)]
  pub health: HealthConfig,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsConfig,
}

/// Oracle identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
  /// Human-readable instance name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// Log rounds instead of sending transactions.
  #[serde(default)]
  pub dry_run: bool,
}

/// Pair and polling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
  /// Pairs as `base/quote`.
  pub pairs: Vec<String>,
  /// Source names, see `adapters::feeds::AVAILABLE_SOURCES`.
  pub sources: Vec<String>,
  /// Seconds between fetch cycles (min 1).
  #[serde(default = "default_fetch_period")]
  pub fetch_period_seconds: u64,
  /// Seconds between round submissions (min 6).
  #[serde(default = "default_submit_period")]
  pub submit_period_seconds: u64,
  /// Per-source fetch deadline.
  #[serde(default = "default_fetch_timeout")]
  pub fetch_timeout_seconds: u64,
  /// Delay between starting consecutive pair loops.
  #[serde(default = "default_startup_stagger")]
  pub startup_stagger_ms: u64,
}

/// Aggregation thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
  /// Minimum contributing sources.
  #[serde(default = "default_min_sources")]
  pub min_sources: usize,
  /// Outlier band around the initial median (percent).
  #[serde(default = "default_max_deviation")]
  pub max_deviation_percent: f64,
  /// Max move vs the last accepted price (percent, 0 disables).
  #[serde(default = "default_drift_limit")]
  pub drift_limit_percent: f64,
  /// Require one extra source while no previous price is known.
  #[serde(default = "default_true")]
  pub strict_cold_start: bool,
  /// Bound on buffered observations per pair.
  #[serde(default = "default_max_observations")]
  pub max_observations: usize,
}

impl Default for AggregationConfig {
  fn default() -> Self {
    Self {
      min_sources: default_min_sources(),
      max_deviation_percent: default_max_deviation(),
      drift_limit_percent: default_drift_limit(),
      strict_cold_start: true,
      max_observations: default_max_observations(),
    }
  }
}

/// Per-source backoff configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
  #[serde(default = "default_backoff_base")]
  pub base_seconds: u64,
  #[serde(default = "default_backoff_max")]
  pub max_seconds: u64,
}

impl Default for BackoffConfig {
  fn default() -> Self {
    Self {
      base_seconds: default_backoff_base(),
      max_seconds: default_backoff_max(),
    }
  }
}

/// Chain configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
  /// JSON-RPC endpoint.
  pub rpc_url: String,
  /// Expected chain id, checked at startup when set.
  pub chain_id: Option<u64>,
  /// PriceFeedDirectory contract address.
  #[serde(default)]
  pub price_feed_directory: Option<String>,
  /// Application id (hex) used to derive feed hashes.
  #[serde(default)]
  pub app_id: Option<String>,
  /// Explicit aggregator addresses by pair, bypassing the directory.
  #[serde(default)]
  pub aggregator_addresses: HashMap<String, String>,
  /// Give up waiting for a submission receipt after this long.
  #[serde(default = "default_receipt_timeout")]
  pub receipt_timeout_seconds: u64,
}

/// Health server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
  #[serde(default = "default_health_addr")]
  pub bind_address: String,
  /// A pair is stale when no price was accepted or committed for this
  /// long.
  #[serde(default = "default_stale_after")]
  pub stale_after_seconds: u64,
}

impl Default for HealthConfig {
  fn default() -> Self {
    Self {
      bind_address: default_health_addr(),
      stale_after_seconds: default_stale_after(),
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
    }
  }
}

impl AppConfig {
  /// API key for `source`: `API_KEY_<SOURCE>` wins over the file.
  pub fn api_key(&self, source: &str) -> Option<String> {
    let env_name = format!("{API_KEY_ENV_PREFIX}{}", source.to_uppercase());
    std::env::var(env_name)
      .ok()
      .filter(|k| !k.is_empty())
      .or_else(|| self.api_keys.get(source).cloned())
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_fetch_period() -> u64 {
  60
}

fn default_submit_period() -> u64 {
  300
}

fn default_fetch_timeout() -> u64 {
  10
}

fn default_startup_stagger() -> u64 {
  1000
}

fn default_min_sources() -> usize {
  2
}

fn default_max_deviation() -> f64 {
  5.0
}

fn default_drift_limit() -> f64 {
  10.0
}

fn default_max_observations() -> usize {
  4096
}

fn default_backoff_base() -> u64 {
  5
}

fn default_backoff_max() -> u64 {
  300
}

fn default_receipt_timeout() -> u64 {
  120
}

fn default_health_addr() -> String {
  "0.0.0.0:8080".to_string()
}

fn default_stale_after() -> u64 {
  900
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}
