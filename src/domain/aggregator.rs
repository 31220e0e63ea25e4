//! Price Aggregator - Two-pass Median with Outlier and Drift Guards
//!
//! Algorithm:
//! 1. Drop non-finite and non-positive quotes.
//! 2. Reject with `insufficient_sources` below the required source count.
//! 3. Initial median over every valid quote.
//! 4. Drop quotes deviating more than `max_deviation_percent` from it.
//! 5. Reject with `too_many_outliers` if too few quotes survive.
//! 6. Final median over the survivors.
//! 7. Reject with `drift_too_large` if the final median moved more than
//!    `drift_limit_percent` away from the previous accepted price.
//!
//! The aggregator is pure: same inputs, same result, no side effects.

use std::collections::BTreeMap;

use thiserror::Error;

/// Tag identifying why an aggregation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    /// Fewer valid quotes than required.
    InsufficientSources,
    /// Outlier exclusion left fewer quotes than required.
    TooManyOutliers,
    /// Candidate price moved too far from the previous accepted price.
    DriftTooLarge,
}

impl RejectionReason {
    /// Stable snake_case label for logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientSources => "insufficient_sources",
            Self::TooManyOutliers => "too_many_outliers",
            Self::DriftTooLarge => "drift_too_large",
        }
    }
}

/// A rejected aggregation together with its diagnostics.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("insufficient_sources: {available} valid quotes, {required} required")]
    InsufficientSources {
        /// Valid quotes after filtering.
        available: usize,
        /// Sources required this cycle.
        required: usize,
        /// Quotes discarded as non-positive or non-finite.
        invalid: BTreeMap<String, f64>,
    },

    #[error("too_many_outliers: {remaining} quotes within band, {required} required")]
    TooManyOutliers {
        /// Quotes within the deviation band.
        remaining: usize,
        /// Sources required this cycle.
        required: usize,
        /// Median the deviation was measured against.
        initial_median: f64,
        /// Dropped sources.
        dropped: BTreeMap<String, DroppedQuote>,
    },

    #[error(
        "drift_too_large: {drift_percent:.4}% vs limit {limit_percent}% \
         (previous {previous_price}, candidate {candidate_price})"
    )]
    DriftTooLarge {
        /// Observed drift in percent.
        drift_percent: f64,
        /// Configured drift limit in percent.
        limit_percent: f64,
        /// Previous accepted price.
        previous_price: f64,
        /// Rejected final median.
        candidate_price: f64,
    },
}

impl Rejection {
    /// The reason tag for this rejection.
    pub const fn reason(&self) -> RejectionReason {
        match self {
            Self::InsufficientSources { .. } => RejectionReason::InsufficientSources,
            Self::TooManyOutliers { .. } => RejectionReason::TooManyOutliers,
            Self::DriftTooLarge { .. } => RejectionReason::DriftTooLarge,
        }
    }
}

/// A quote excluded as an outlier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DroppedQuote {
    /// Quoted price.
    pub price: f64,
    /// Absolute deviation from the initial median, in percent.
    pub deviation_percent: f64,
}

/// An accepted aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedPrice {
    /// The accepted price (equal to `final_median`).
    pub price: f64,
    /// Sources that contributed to the final median, sorted by name.
    pub sources: Vec<String>,
    /// Sources excluded as outliers.
    pub dropped: BTreeMap<String, DroppedQuote>,
    /// Median before outlier exclusion.
    pub initial_median: f64,
    /// Median after outlier exclusion.
    pub final_median: f64,
}

/// Outcome of one aggregation.
pub type AggregationResult = Result<AcceptedPrice, Rejection>;

/// Invalid aggregator parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregatorConfigError {
    #[error("min_sources must be at least 1")]
    MinSources,
    #[error("max_deviation_percent must be positive, got {0}")]
    MaxDeviation(f64),
    #[error("drift_limit_percent must be positive when enabled, got {0}")]
    DriftLimit(f64),
}

/// Aggregation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    /// Minimum contributing sources.
    pub min_sources: usize,
    /// Outlier band around the initial median, in percent.
    pub max_deviation_percent: f64,
    /// Maximum move vs the previous accepted price; `None` disables.
    pub drift_limit_percent: Option<f64>,
    /// Require one extra source while no previous price is known.
    pub strict_cold_start: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            min_sources: 2,
            max_deviation_percent: 5.0,
            drift_limit_percent: Some(10.0),
            strict_cold_start: true,
        }
    }
}

/// Stateless price aggregator.
#[derive(Debug, Clone)]
pub struct PriceAggregator {
    config: AggregatorConfig,
}

impl PriceAggregator {
    /// Create an aggregator after validating its parameters.
    pub fn new(config: AggregatorConfig) -> Result<Self, AggregatorConfigError> {
        if config.min_sources < 1 {
            return Err(AggregatorConfigError::MinSources);
        }
        if !(config.max_deviation_percent > 0.0) {
            return Err(AggregatorConfigError::MaxDeviation(
                config.max_deviation_percent,
            ));
        }
        if let Some(limit) = config.drift_limit_percent {
            if !(limit > 0.0) {
                return Err(AggregatorConfigError::DriftLimit(limit));
            }
        }
        Ok(Self { config })
    }

    /// The active configuration.
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Sources required for a cycle. Without a previous price there is no
    /// drift check, so a strict cold start asks for one more source.
    pub fn required_sources(&self, previous_price: Option<f64>) -> usize {
        let cold = usable_previous(previous_price).is_none();
        if cold && self.config.strict_cold_start {
            self.config.min_sources + 1
        } else {
            self.config.min_sources
        }
    }

    /// Aggregate per-source quotes into a single price.
    ///
    /// `previous_price` is the last accepted price for the pair; a missing
    /// or non-positive value skips the drift check.
    pub fn aggregate(
        &self,
        prices: &BTreeMap<String, f64>,
        previous_price: Option<f64>,
    ) -> AggregationResult {
        let required = self.required_sources(previous_price);

        let (valid, invalid): (BTreeMap<_, _>, BTreeMap<_, _>) = prices
            .iter()
            .map(|(source, &price)| (source.clone(), price))
            .partition(|(_, price)| price.is_finite() && *price > 0.0);

        if valid.len() < required {
            return Err(Rejection::InsufficientSources {
                available: valid.len(),
                required,
                invalid,
            });
        }

        let mut values: Vec<f64> = valid.values().copied().collect();
        let Some(initial_median) = median(&mut values) else {
            return Err(Rejection::InsufficientSources {
                available: 0,
                required,
                invalid,
            });
        };

        let mut filtered: BTreeMap<String, f64> = BTreeMap::new();
        let mut dropped: BTreeMap<String, DroppedQuote> = BTreeMap::new();
        for (source, price) in valid {
            let deviation_percent = (price - initial_median).abs() / initial_median * 100.0;
            if deviation_percent <= self.config.max_deviation_percent {
                filtered.insert(source, price);
            } else {
                dropped.insert(
                    source,
                    DroppedQuote {
                        price,
                        deviation_percent,
                    },
                );
            }
        }

        if filtered.len() < required {
            return Err(Rejection::TooManyOutliers {
                remaining: filtered.len(),
                required,
                initial_median,
                dropped,
            });
        }

        let mut values: Vec<f64> = filtered.values().copied().collect();
        let Some(final_median) = median(&mut values) else {
            return Err(Rejection::TooManyOutliers {
                remaining: 0,
                required,
                initial_median,
                dropped,
            });
        };

        if let (Some(previous), Some(limit)) = (
            usable_previous(previous_price),
            self.config.drift_limit_percent,
        ) {
            let drift_percent = (final_median - previous).abs() / previous * 100.0;
            if drift_percent > limit {
                return Err(Rejection::DriftTooLarge {
                    drift_percent,
                    limit_percent: limit,
                    previous_price: previous,
                    candidate_price: final_median,
                });
            }
        }

        Ok(AcceptedPrice {
            price: final_median,
            sources: filtered.into_keys().collect(),
            dropped,
            initial_median,
            final_median,
        })
    }
}

/// Standard median: middle element for odd counts, mean of the two middle
/// elements for even counts. Sorts `values` in place.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn usable_previous(previous_price: Option<f64>) -> Option<f64> {
    previous_price.filter(|p| p.is_finite() && *p > 0.0)
}
