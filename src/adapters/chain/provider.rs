//! RPC Provider - alloy-rs 0.9 Connection with Local Signer
//!
//! Connects to the configured JSON-RPC endpoint with the recommended
//! fillers (nonce, gas, chain id) and a local wallet, so round
//! submissions are signed and filled in one place. The signing key is
//! read from `ORACLE_PRIVATE_KEY`, never from the config file.
//!
//! `on_builtin` yields a provider over `BoxTransport`, which lets the
//! adapter layer hold it as a type-erased `dyn Provider`.

use std::sync::Arc;

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::config::{ChainConfig, PRIVATE_KEY_ENV};

/// Shared signing RPC provider.
pub struct ChainProvider {
    /// Type-erased alloy provider with fillers and wallet.
    provider: Arc<dyn Provider + Send + Sync>,
    /// Address rounds are submitted from.
    signer_address: Address,
}

impl ChainProvider {
    /// Connect, load the signer from the environment, and check the chain
    /// id when one is configured.
    #[instrument(skip_all)]
    pub async fn connect(config: &ChainConfig) -> Result<Self> {
        let key = std::env::var(PRIVATE_KEY_ENV)
            .with_context(|| format!("{PRIVATE_KEY_ENV} not set"))?;
        let signer: PrivateKeySigner = key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .context("Invalid signing key")?;
        let signer_address = signer.address();

        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(EthereumWallet::from(signer))
            .on_builtin(&config.rpc_url)
            .await
            .context("Failed to connect to RPC endpoint")?;
        let provider: Arc<dyn Provider + Send + Sync> = Arc::new(provider);

        let chain_id = provider
            .get_chain_id()
            .await
            .context("Failed to query chain ID")?;

        if let Some(expected) = config.chain_id {
            anyhow::ensure!(
                chain_id == expected,
                "Expected chain_id={expected}, RPC reports {chain_id}"
            );
        }

        info!(chain_id, signer = %signer_address, "Connected to RPC");

        Ok(Self {
            provider,
            signer_address,
        })
    }

    /// Get a shared reference to the alloy provider (type-erased).
    pub fn inner(&self) -> Arc<dyn Provider + Send + Sync> {
        Arc::clone(&self.provider)
    }

    pub fn signer_address(&self) -> Address {
        self.signer_address
    }
}
