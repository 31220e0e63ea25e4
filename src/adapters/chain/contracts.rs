//! Aggregator Contracts - On-chain Ledger via alloy-rs 0.9
//!
//! Implements the `Ledger` port on top of per-pair aggregator contracts.
//! Each pair's contract is found in the `PriceFeedDirectory` under
//! `keccak256("{app_id_hex}/aggregated/{base}/{quote}")` unless an
//! explicit address is configured. A zero address means the feed is not
//! registered and aborts startup.
//!
//! A submission waits at most `receipt_timeout` for its receipt. When it
//! fails after the transaction may have gone out, the aggregator's latest
//! round id decides whether the round was committed anyway.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::aliases::U80;
use alloy::primitives::{Address, B256, Bytes, I256, U256, keccak256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::domain::pair::TradingPair;
use crate::domain::round::Round;
use crate::ports::ledger::{LatestRound, Ledger, LedgerError, SubmissionReceipt};

use super::provider::ChainProvider;

sol! {
    interface ISimpleAggregator {
        function decimals() external view returns (uint8);
        function latestRoundData() external view returns (
            uint80 roundId,
            int256 answer,
            uint256 startedAt,
            uint256 updatedAt,
            uint80 answeredInRound
        );
        function submitObservation(
            uint80 roundId,
            int256 answer,
            uint256 startedAt,
            uint256 updatedAt
        ) external;
    }

    interface IPriceFeedDirectory {
        function feeds(bytes32 feedHash) external view returns (address);
    }
}

/// Directory key of a pair's feed.
pub fn feed_hash(app_id_hex: &str, pair: &TradingPair) -> B256 {
    let app_id = app_id_hex.trim().trim_start_matches("0x").to_lowercase();
    keccak256(format!("{app_id}/{}", pair.feed_path()))
}

/// Encode a round as `submitObservation` arguments.
pub fn encode_submission(round: &Round) -> Result<ISimpleAggregator::submitObservationCall, LedgerError> {
    let answer = I256::try_from(U256::from(round.price))
        .map_err(|e| LedgerError::Encoding(format!("price {}: {e}", round.price)))?;
    let started = u64::try_from(round.window_start)
        .map_err(|_| LedgerError::Encoding(format!("window_start {}", round.window_start)))?;
    let updated = u64::try_from(round.window_end)
        .map_err(|_| LedgerError::Encoding(format!("window_end {}", round.window_end)))?;
    Ok(ISimpleAggregator::submitObservationCall {
        roundId: U80::from(round.round_id),
        answer,
        startedAt: U256::from(started),
        updatedAt: U256::from(updated),
    })
}

/// Bound a chain round trip by `limit`; expiry is an RPC failure.
async fn within<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, LedgerError>>,
) -> Result<T, LedgerError> {
    tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
        Err(LedgerError::Rpc(format!(
            "no response within {}s",
            limit.as_secs()
        )))
    })
}

/// Outcome of a failed submission given the aggregator's latest round id.
///
/// Round `round_id` counts as committed when the aggregator already holds
/// it or a later one, so a retry of a mined round is not sent again.
fn settle(
    round_id: u64,
    error: LedgerError,
    committed: Option<u64>,
) -> Result<SubmissionReceipt, LedgerError> {
    match committed {
        Some(latest) if latest >= round_id => Ok(SubmissionReceipt {
            round_id,
            tx_hash: None,
        }),
        _ => Err(error),
    }
}

/// `Ledger` backed by aggregator contracts.
pub struct AggregatorLedger {
    provider: Arc<ChainProvider>,
    /// Aggregator contract per pair.
    aggregators: HashMap<TradingPair, Address>,
    receipt_timeout: Duration,
}

impl AggregatorLedger {
    /// Resolve every pair's aggregator address.
    ///
    /// `overrides` maps `base/quote` to an address and bypasses the
    /// directory for that pair.
    #[instrument(skip_all, fields(pairs = pairs.len()))]
    pub async fn resolve(
        provider: Arc<ChainProvider>,
        pairs: &[TradingPair],
        directory: Option<&str>,
        app_id: Option<&str>,
        overrides: &HashMap<String, String>,
        receipt_timeout: Duration,
    ) -> Result<Self> {
        let mut aggregators = HashMap::with_capacity(pairs.len());

        for pair in pairs {
            let address = if let Some(raw) = overrides.get(&pair.to_string()) {
                raw.parse::<Address>()
                    .with_context(|| format!("Invalid aggregator address for {pair}: {raw}"))?
            } else {
                let directory: Address = directory
                    .context("price_feed_directory not configured")?
                    .parse()
                    .context("Invalid price_feed_directory address")?;
                let app_id = app_id.context("app_id not configured")?;
                let hash = feed_hash(app_id, pair);
                let call = IPriceFeedDirectory::feedsCall { feedHash: hash };
                let raw = eth_call(&provider, directory, call.abi_encode())
                    .await
                    .with_context(|| format!("Directory lookup failed for {pair}"))?;
                IPriceFeedDirectory::feedsCall::abi_decode_returns(&raw, true)
                    .context("Malformed directory response")?
                    ._0
            };

            if address == Address::ZERO {
                bail!("No aggregator registered for {pair} (feed {})", pair.feed_path());
            }
            info!(pair = %pair, aggregator = %address, "Aggregator resolved");
            aggregators.insert(pair.clone(), address);
        }

        Ok(Self {
            provider,
            aggregators,
            receipt_timeout,
        })
    }

    fn aggregator(&self, pair: &TradingPair) -> Result<Address, LedgerError> {
        self.aggregators
            .get(pair)
            .copied()
            .ok_or_else(|| LedgerError::UnknownFeed(pair.to_string()))
    }

    async fn latest_round_data(
        &self,
        to: Address,
    ) -> Result<ISimpleAggregator::latestRoundDataReturn, LedgerError> {
        let raw = eth_call(
            &self.provider,
            to,
            ISimpleAggregator::latestRoundDataCall {}.abi_encode(),
        )
        .await?;
        ISimpleAggregator::latestRoundDataCall::abi_decode_returns(&raw, true)
            .map_err(|e| LedgerError::Encoding(e.to_string()))
    }

    /// Send `input` to `to` and wait for a successful receipt.
    async fn send(
        &self,
        to: Address,
        input: Vec<u8>,
        round_id: u64,
    ) -> Result<SubmissionReceipt, LedgerError> {
        let tx = TransactionRequest::default()
            .to(to)
            .input(Bytes::from(input).into());

        let pending = self
            .provider
            .inner()
            .send_transaction(tx)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        let tx_hash = format!("{:#x}", receipt.transaction_hash);
        if !receipt.status() {
            return Err(LedgerError::Reverted { tx_hash });
        }

        Ok(SubmissionReceipt {
            round_id,
            tx_hash: Some(tx_hash),
        })
    }
}

async fn eth_call(provider: &ChainProvider, to: Address, input: Vec<u8>) -> Result<Vec<u8>, LedgerError> {
    let tx = TransactionRequest::default()
        .to(to)
        .input(Bytes::from(input).into());
    provider
        .inner()
        .call(&tx)
        .await
        .map(|bytes| bytes.to_vec())
        .map_err(|e| LedgerError::Rpc(e.to_string()))
}

#[async_trait]
impl Ledger for AggregatorLedger {
    #[instrument(skip(self), fields(pair = %pair))]
    async fn latest_round(&self, pair: &TradingPair) -> Result<LatestRound, LedgerError> {
        let to = self.aggregator(pair)?;

        let raw = eth_call(&self.provider, to, ISimpleAggregator::decimalsCall {}.abi_encode()).await?;
        let decimals = ISimpleAggregator::decimalsCall::abi_decode_returns(&raw, true)
            .map_err(|e| LedgerError::Encoding(e.to_string()))?
            ._0;
        if decimals == 0 {
            return Err(LedgerError::Rejected(format!(
                "aggregator for {pair} has no decimals set"
            )));
        }

        let data = self.latest_round_data(to).await?;
        let round_id = u64::try_from(data.roundId)
            .map_err(|e| LedgerError::Encoding(format!("round id: {e}")))?;
        // Negative answers are treated as "no usable price".
        let price = if data.answer.is_negative() {
            0
        } else {
            u128::try_from(data.answer.into_raw())
                .map_err(|e| LedgerError::Encoding(format!("answer: {e}")))?
        };

        Ok(LatestRound {
            round_id,
            price,
            decimals: u32::from(decimals),
        })
    }

    #[instrument(skip(self, round), fields(pair = %pair, round_id = round.round_id))]
    async fn submit_round(
        &self,
        pair: &TradingPair,
        round: &Round,
    ) -> Result<SubmissionReceipt, LedgerError> {
        let to = self.aggregator(pair)?;
        let call = encode_submission(round)?;

        let sent = self.send(to, call.abi_encode(), round.round_id);
        let error = match within(self.receipt_timeout, sent).await {
            Ok(receipt) => return Ok(receipt),
            Err(e @ (LedgerError::Rpc(_) | LedgerError::Reverted { .. })) => e,
            Err(e) => return Err(e),
        };

        let committed = within(self.receipt_timeout, self.latest_round_data(to))
            .await
            .ok()
            .and_then(|data| u64::try_from(data.roundId).ok());
        let settled = settle(round.round_id, error, committed);
        if settled.is_ok() {
            warn!(
                committed = ?committed,
                "Submission failed but the aggregator already holds this round"
            );
        }
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_hash_normalizes_app_id() {
        let pair = TradingPair::new("rose", "usd");
        let expected = keccak256("005a216eb7f450bcc1f534a7575fb33d611b463fa2/aggregated/rose/usd");
        assert_eq!(
            feed_hash("0x005A216EB7F450BCC1F534A7575FB33D611B463FA2", &pair),
            expected
        );
    }

    #[test]
    fn test_encode_submission() {
        let round = Round {
            round_id: 12,
            price: 1_010_000_000_000,
            window_start: 1_700_000_000,
            window_end: 1_700_000_300,
            observation_count: 5,
        };
        let call = encode_submission(&round).unwrap();
        assert_eq!(call.roundId, U80::from(12u64));
        assert_eq!(call.answer, I256::try_from(1_010_000_000_000i128).unwrap());
        assert_eq!(call.updatedAt, U256::from(1_700_000_300u64));

        let decoded = ISimpleAggregator::submitObservationCall::abi_decode(&call.abi_encode(), true).unwrap();
        assert_eq!(decoded.startedAt, U256::from(1_700_000_000u64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_call_times_out() {
        let never = std::future::pending::<Result<SubmissionReceipt, LedgerError>>();
        let result = within(Duration::from_secs(120), never).await;
        assert!(matches!(result, Err(LedgerError::Rpc(msg)) if msg.contains("120s")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answered_call_passes_through() {
        let answer = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(7u64)
        };
        assert_eq!(within(Duration::from_secs(120), answer).await, Ok(7));
    }

    #[test]
    fn test_settle_treats_committed_round_as_success() {
        let lost = LedgerError::Rpc("connection reset".into());
        let receipt = settle(5, lost, Some(5)).unwrap();
        assert_eq!(receipt.round_id, 5);
        assert_eq!(receipt.tx_hash, None);

        let duplicate = LedgerError::Reverted { tx_hash: "0xab".into() };
        assert!(settle(5, duplicate, Some(9)).is_ok());
    }

    #[test]
    fn test_settle_keeps_error_when_round_missing() {
        let lost = LedgerError::Rpc("connection reset".into());
        assert_eq!(settle(5, lost.clone(), Some(4)), Err(lost.clone()));
        assert_eq!(settle(5, lost.clone(), None), Err(lost));
    }

    #[test]
    fn test_encode_rejects_negative_window() {
        let round = Round {
            round_id: 1,
            price: 1,
            window_start: -1,
            window_end: 0,
            observation_count: 1,
        };
        assert!(matches!(encode_submission(&round), Err(LedgerError::Encoding(_))));
    }
}
