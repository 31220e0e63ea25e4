//! Aggregation Benchmarks - Per-cycle Hot Path
//!
//! Benchmarks the domain work done on every fetch cycle and every round:
//! outlier filtering over a handful of quotes, and the integer median
//! over a full observation buffer.
//!
//! Run with: cargo bench --bench aggregation_bench

use std::collections::BTreeMap;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use aggregated_price_oracle::domain::aggregator::{AggregatorConfig, PriceAggregator};
use aggregated_price_oracle::domain::observation::{
    DEFAULT_MAX_OBSERVATIONS, Observation, ObservationBuffer, to_fixed_point,
};

fn quotes() -> BTreeMap<String, f64> {
    [
        ("binance", 0.07251),
        ("bitstamp", 0.07248),
        ("coinbase", 0.07255),
        ("coingecko", 0.07302),
        ("kraken", 0.09120),
    ]
    .into_iter()
    .map(|(s, p)| (s.to_string(), p))
    .collect()
}

/// Benchmark a five-source aggregation with one outlier.
fn bench_aggregate(c: &mut Criterion) {
    let aggregator = PriceAggregator::new(AggregatorConfig::default()).unwrap();
    let quotes = quotes();

    c.bench_function("aggregate_5_sources", |b| {
        b.iter(|| {
            let _ = aggregator.aggregate(black_box(&quotes), black_box(Some(0.0725)));
        });
    });
}

/// Benchmark the round median over a full buffer.
fn bench_round_median(c: &mut Criterion) {
    let mut buffer = ObservationBuffer::default();
    for i in 0..DEFAULT_MAX_OBSERVATIONS {
        #[allow(clippy::cast_precision_loss)]
        let price = 0.07 + (i % 97) as f64 * 1e-5;
        buffer.push(Observation {
            price: to_fixed_point(price, 10).unwrap(),
            captured_at: i64::try_from(i).unwrap(),
        });
    }

    c.bench_function("round_median_full_buffer", |b| {
        b.iter(|| {
            let _ = black_box(&buffer).median_price();
        });
    });
}

/// Benchmark price scaling to fixed point.
fn bench_fixed_point(c: &mut Criterion) {
    c.bench_function("to_fixed_point_10dp", |b| {
        b.iter(|| {
            let _ = to_fixed_point(black_box(64_123.456_789), black_box(10));
        });
    });
}

criterion_group!(benches, bench_aggregate, bench_round_median, bench_fixed_point);
criterion_main!(benches);
