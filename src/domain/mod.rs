//! Domain layer - Core aggregation logic and models.
//!
//! Pure logic for the aggregated price oracle: pair identity, source
//! backoff bookkeeping, the median aggregator, and round construction.
//! Nothing here performs I/O (hexagonal architecture inner ring).

pub mod aggregator;
pub mod observation;
pub mod pair;
pub mod round;
pub mod source_manager;
pub mod usdt_rate;

// Re-export core types for convenience
pub use aggregator::{
    AcceptedPrice, AggregationResult, AggregatorConfig, PriceAggregator, Rejection,
    RejectionReason,
};
pub use observation::{Observation, ObservationBuffer, PRICE_DECIMALS};
pub use pair::TradingPair;
pub use round::Round;
pub use source_manager::{BackoffPolicy, SourceManager, SourceState, SourceStatus};
pub use usdt_rate::UsdtRateCache;
