//! Dry-run Ledger - In-memory Round Log
//!
//! Stands in for the chain when `oracle.dry_run = true`. Rounds are
//! logged and counted per pair, nothing is signed or sent.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::observation::{PRICE_DECIMALS, from_fixed_point};
use crate::domain::pair::TradingPair;
use crate::domain::round::Round;
use crate::ports::ledger::{LatestRound, Ledger, LedgerError, SubmissionReceipt};

#[derive(Default)]
pub struct DryRunLedger {
    latest: Mutex<HashMap<TradingPair, LatestRound>>,
}

impl DryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for DryRunLedger {
    async fn latest_round(&self, pair: &TradingPair) -> Result<LatestRound, LedgerError> {
        Ok(self
            .latest
            .lock()
            .await
            .get(pair)
            .copied()
            .unwrap_or(LatestRound {
                round_id: 0,
                price: 0,
                decimals: PRICE_DECIMALS,
            }))
    }

    async fn submit_round(
        &self,
        pair: &TradingPair,
        round: &Round,
    ) -> Result<SubmissionReceipt, LedgerError> {
        let mut latest = self.latest.lock().await;
        let previous = latest.get(pair).map_or(0, |r| r.round_id);
        if round.round_id <= previous {
            return Err(LedgerError::Rejected(format!(
                "round {} not after {previous}",
                round.round_id
            )));
        }

        info!(
            pair = %pair,
            round_id = round.round_id,
            price = from_fixed_point(round.price, PRICE_DECIMALS),
            observations = round.observation_count,
            window_start = round.window_start,
            window_end = round.window_end,
            "[DRY RUN] Round not submitted"
        );

        latest.insert(
            pair.clone(),
            LatestRound {
                round_id: round.round_id,
                price: round.price,
                decimals: PRICE_DECIMALS,
            },
        );
        Ok(SubmissionReceipt {
            round_id: round.round_id,
            tx_hash: None,
        })
    }
}
