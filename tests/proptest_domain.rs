//! Property-Based Tests - Domain Layer Invariants
//!
//! Uses `proptest` to verify that the aggregation, median and backoff
//! rules hold across random inputs.

use std::collections::BTreeMap;
use std::time::Duration;

use proptest::prelude::*;

use aggregated_price_oracle::domain::aggregator::{
    AggregatorConfig, PriceAggregator, Rejection, median,
};
use aggregated_price_oracle::domain::observation::{
    Observation, ObservationBuffer, from_fixed_point, to_fixed_point,
};
use aggregated_price_oracle::domain::source_manager::BackoffPolicy;

fn quotes(prices: &[f64]) -> BTreeMap<String, f64> {
    prices
        .iter()
        .enumerate()
        .map(|(i, p)| (format!("source{i}"), *p))
        .collect()
}

fn aggregator(min_sources: usize, deviation: f64, drift: Option<f64>) -> PriceAggregator {
    PriceAggregator::new(AggregatorConfig {
        min_sources,
        max_deviation_percent: deviation,
        drift_limit_percent: drift,
        strict_cold_start: false,
    })
    .unwrap()
}

// ── Median Properties ───────────────────────────────────────

proptest! {
    /// The median lies within the range of its inputs.
    #[test]
    fn median_within_bounds(mut values in prop::collection::vec(0.0001f64..1e9, 1..20)) {
        let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let m = median(&mut values).unwrap();
        prop_assert!(m >= lo && m <= hi, "median {m} outside [{lo}, {hi}]");
    }

    /// Input order does not matter.
    #[test]
    fn median_order_independent(values in prop::collection::vec(0.0001f64..1e9, 1..20)) {
        let mut forward = values.clone();
        let mut reversed: Vec<f64> = values.into_iter().rev().collect();
        prop_assert_eq!(median(&mut forward), median(&mut reversed));
    }

    /// The integer round median never overflows and stays in range.
    #[test]
    fn buffer_median_within_bounds(prices in prop::collection::vec(any::<u128>(), 1..32)) {
        let mut buffer = ObservationBuffer::new(64);
        for (i, price) in prices.iter().enumerate() {
            buffer.push(Observation { price: *price, captured_at: i64::try_from(i).unwrap() });
        }
        let m = buffer.median_price().unwrap();
        prop_assert!(m >= *prices.iter().min().unwrap());
        prop_assert!(m <= *prices.iter().max().unwrap());
    }
}

// ── Aggregator Properties ───────────────────────────────────

proptest! {
    /// Every accepted source is within the deviation limit of the initial
    /// median, and every dropped one is outside it.
    #[test]
    fn accepted_sources_respect_deviation(
        prices in prop::collection::vec(1.0f64..1000.0, 1..10),
        deviation in 0.5f64..20.0,
    ) {
        let agg = aggregator(1, deviation, None);
        if let Ok(accepted) = agg.aggregate(&quotes(&prices), None) {
            let initial = accepted.initial_median;
            for source in &accepted.sources {
                let p = quotes(&prices)[source];
                prop_assert!((p - initial).abs() / initial * 100.0 <= deviation);
            }
            for dropped in accepted.dropped.values() {
                prop_assert!(dropped.deviation_percent > deviation);
            }
            prop_assert_eq!(accepted.sources.len() + accepted.dropped.len(), prices.len());
        }
    }

    /// With every quote inside the band the price is exactly the median
    /// of all inputs.
    #[test]
    fn no_outliers_gives_median_of_inputs(
        center in 0.01f64..100_000.0,
        spread in prop::collection::vec(0.99f64..1.01, 1..12),
    ) {
        let prices: Vec<f64> = spread.iter().map(|f| center * f).collect();
        let agg = aggregator(1, 5.0, None);
        let accepted = agg.aggregate(&quotes(&prices), None).unwrap();

        let mut inputs = prices.clone();
        prop_assert_eq!(accepted.price, median(&mut inputs).unwrap());
        prop_assert!(accepted.dropped.is_empty());
        prop_assert_eq!(accepted.sources.len(), prices.len());
    }

    /// A single quote far outside a tight cluster is dropped and the
    /// final median is the cluster's own median.
    #[test]
    fn single_outlier_excluded(
        center in 0.01f64..100_000.0,
        min_sources in 1usize..4,
        extra in 0usize..5,
        spread in prop::collection::vec(0.99f64..1.01, 8),
        outlier_factor in prop_oneof![0.01f64..0.5, 2.0f64..10.0],
    ) {
        let cluster_len = (min_sources + extra).max(2);
        let mut cluster: Vec<f64> = spread[..cluster_len].iter().map(|f| center * f).collect();
        let mut prices = cluster.clone();
        prices.push(center * outlier_factor);

        let agg = aggregator(min_sources, 5.0, None);
        let accepted = agg.aggregate(&quotes(&prices), None).unwrap();

        let outlier = format!("source{cluster_len}");
        prop_assert_eq!(accepted.dropped.keys().collect::<Vec<_>>(), vec![&outlier]);
        prop_assert_eq!(accepted.final_median, median(&mut cluster).unwrap());
        prop_assert_eq!(accepted.price, accepted.final_median);
    }

    /// Fewer valid quotes than required is always rejected.
    #[test]
    fn too_few_sources_rejected(
        prices in prop::collection::vec(1.0f64..1000.0, 0..3),
        min_sources in 3usize..6,
    ) {
        let agg = aggregator(min_sources, 5.0, None);
        let rejected = matches!(
            agg.aggregate(&quotes(&prices), None),
            Err(Rejection::InsufficientSources { .. })
        );
        prop_assert!(rejected);
    }

    /// An accepted price never moves further than the drift limit.
    #[test]
    fn accepted_price_respects_drift(
        previous in 1.0f64..1000.0,
        factor in 0.5f64..1.5,
        limit in 1.0f64..20.0,
    ) {
        let candidate = previous * factor;
        let agg = aggregator(2, 5.0, Some(limit));
        match agg.aggregate(&quotes(&[candidate, candidate]), Some(previous)) {
            Ok(accepted) => {
                prop_assert!((accepted.price - previous).abs() / previous * 100.0 <= limit);
            }
            Err(Rejection::DriftTooLarge { drift_percent, .. }) => {
                prop_assert!(drift_percent > limit);
            }
            Err(other) => prop_assert!(false, "unexpected rejection {other:?}"),
        }
    }

    /// Fixed-point conversion is accurate to one unit in the last place.
    #[test]
    fn fixed_point_close(price in 0.000_001f64..100_000.0, decimals in 2u32..12) {
        let fixed = to_fixed_point(price, decimals).unwrap();
        let back = from_fixed_point(fixed, decimals);
        prop_assert!((back - price).abs() <= 10f64.powi(-i32::try_from(decimals).unwrap()) * 1.01 + price * 1e-12);
    }
}

// ── Backoff Properties ──────────────────────────────────────

proptest! {
    /// Backoff never decreases with more failures and never exceeds max.
    #[test]
    fn backoff_monotonic_and_capped(
        base in 1u64..60,
        max in 60u64..3600,
        failures in 1u32..200,
    ) {
        let policy = BackoffPolicy {
            base: Duration::from_secs(base),
            max: Duration::from_secs(max),
        };
        let now = policy.delay(failures);
        let next = policy.delay(failures + 1);
        prop_assert!(next >= now);
        prop_assert!(next <= policy.max);
        prop_assert!(policy.delay(1) == Duration::from_secs(base));
    }
}
