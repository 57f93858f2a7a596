//! Alloy-backed [`SponsorClient`] and [`TokenTransferClient`].
//!
//! - **Sponsor**: one provider with the sponsor key as wallet; its nonce filler orders the
//!   sponsor's transactions, which the executor submits one at a time.
//! - **Recovered wallets**: a short-lived provider is built per token transfer from the recovered
//!   wallet's signer and dropped afterwards.
//!
//! The node's chain id is checked against the selected network on connect.

use alloy::hex;
use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{Panic, Revert, SolError};
use async_trait::async_trait;
use std::fmt::{Debug, Display};
use std::time::Duration;
use tracing::{Instrument, instrument};
use url::Url;

use crate::chain::{MetaTransaction, SponsorClient, TokenTransferClient, TransactionOutcome};
use crate::config::{ExecutionConfig, ResolvedNetworkConfig};
use crate::contract;
use crate::error::RecoveryError;
use crate::network::{Network, RpcMode};

/// JSON-RPC client for one network.
pub struct EvmClient {
    provider: DynProvider,
    network: Network,
    rpc_url: Url,
    sponsor: Address,
    /// BSC networks price gas the legacy way.
    eip1559: bool,
    confirmations: u64,
    receipt_timeout: Duration,
}

impl EvmClient {
    /// Connects to the resolved endpoint with `sponsor` as the paying wallet.
    pub async fn connect(
        resolved: &ResolvedNetworkConfig,
        sponsor: PrivateKeySigner,
        execution: &ExecutionConfig,
    ) -> Result<Self, RecoveryError> {
        let network = resolved.network;
        let sponsor_address = sponsor.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(sponsor))
            .connect_http(resolved.rpc_url.clone())
            .erased();

        ensure_chain_id(&provider, network).await?;

        let rpc = match resolved.mode {
            RpcMode::Private => "private",
            RpcMode::Public => "public",
        };
        tracing::info!(
            %network,
            testnet = network.is_testnet(),
            rpc,
            url = %resolved.rpc_url,
            sponsor = %sponsor_address,
            "connected to network"
        );

        Ok(Self {
            provider,
            network,
            rpc_url: resolved.rpc_url.clone(),
            sponsor: sponsor_address,
            eip1559: !matches!(network, Network::Bsc | Network::BscTestnet),
            confirmations: execution.confirmations.max(1),
            receipt_timeout: execution.receipt_timeout(),
        })
    }

    /// Provider signing with a recovered wallet's key. Not cached.
    fn wallet_provider(&self, owner: &PrivateKeySigner) -> DynProvider {
        ProviderBuilder::new()
            .wallet(EthereumWallet::from(owner.clone()))
            .connect_http(self.rpc_url.clone())
            .erased()
    }

    async fn with_legacy_gas_price(
        &self,
        provider: &DynProvider,
        txr: TransactionRequest,
    ) -> Result<TransactionRequest, RecoveryError> {
        if self.eip1559 {
            return Ok(txr);
        }
        let gas_price = provider
            .get_gas_price()
            .instrument(tracing::info_span!("get_gas_price"))
            .await
            .map_err(|e| RecoveryError::Rpc(describe_rpc_error(&e)))?;
        Ok(txr.with_gas_price(gas_price))
    }

    /// Submits `txr` through `provider` and waits for the receipt.
    async fn submit_and_confirm(
        &self,
        provider: &DynProvider,
        txr: TransactionRequest,
    ) -> Result<TransactionOutcome, RecoveryError> {
        let txr = self.with_legacy_gas_price(provider, txr).await?;

        let send_start = std::time::Instant::now();
        let pending = provider
            .send_transaction(txr)
            .await
            .map_err(|e| RecoveryError::TransactionFailure(describe_rpc_error(&e)))?;
        let tx_hash = *pending.tx_hash();
        let send_elapsed = send_start.elapsed();
        tracing::info!(
            network = %self.network,
            %tx_hash,
            send_tx_ms = send_elapsed.as_millis() as u64,
            "transaction submitted"
        );

        let receipt_start = std::time::Instant::now();
        let receipt = pending
            .with_required_confirmations(self.confirmations)
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| {
                tracing::warn!(
                    network = %self.network,
                    %tx_hash,
                    receipt_wait_ms = receipt_start.elapsed().as_millis() as u64,
                    error = %e,
                    "receipt fetch failed"
                );
                RecoveryError::TransactionFailure(format!("{tx_hash}: {}", describe_rpc_error(&e)))
            })?;
        let receipt_elapsed = receipt_start.elapsed();
        tracing::info!(
            network = %self.network,
            %tx_hash,
            status = receipt.status(),
            receipt_wait_ms = receipt_elapsed.as_millis() as u64,
            total_ms = (send_elapsed + receipt_elapsed).as_millis() as u64,
            "transaction confirmed"
        );

        Ok(TransactionOutcome {
            tx_hash: receipt.transaction_hash,
            success: receipt.status(),
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
        })
    }
}

#[async_trait]
impl SponsorClient for EvmClient {
    fn sponsor_address(&self) -> Address {
        self.sponsor
    }

    fn network(&self) -> Network {
        self.network
    }

    #[instrument(skip_all, fields(network = %self.network, to = %tx.to))]
    async fn estimate_gas(&self, tx: &MetaTransaction) -> Result<u64, RecoveryError> {
        let txr = TransactionRequest::default()
            .with_from(self.sponsor)
            .with_to(tx.to)
            .with_input(tx.calldata.clone())
            .with_value(tx.value);
        self.provider
            .estimate_gas(txr)
            .await
            .map_err(|e| RecoveryError::EstimationFailure(describe_rpc_error(&e)))
    }

    async fn max_fee_per_gas(&self) -> Result<Option<u128>, RecoveryError> {
        if self.eip1559 {
            match self.provider.estimate_eip1559_fees().await {
                Ok(estimate) => Ok(Some(estimate.max_fee_per_gas)),
                Err(e) => {
                    tracing::debug!(network = %self.network, error = %e, "no EIP-1559 fee data");
                    Ok(None)
                }
            }
        } else {
            let gas_price = self
                .provider
                .get_gas_price()
                .await
                .map_err(|e| RecoveryError::Rpc(describe_rpc_error(&e)))?;
            Ok(Some(gas_price))
        }
    }

    async fn sponsor_balance(&self) -> Result<U256, RecoveryError> {
        self.provider
            .get_balance(self.sponsor)
            .await
            .map_err(|e| RecoveryError::Rpc(describe_rpc_error(&e)))
    }

    #[instrument(skip_all, fields(network = %self.network, to = %tx.to))]
    async fn send_transaction(&self, tx: MetaTransaction) -> Result<TransactionOutcome, RecoveryError> {
        let mut txr = TransactionRequest::default()
            .with_from(self.sponsor)
            .with_to(tx.to)
            .with_input(tx.calldata)
            .with_value(tx.value);
        if let Some(gas_limit) = tx.gas_limit {
            txr = txr.with_gas_limit(gas_limit);
        }
        self.submit_and_confirm(&self.provider, txr).await
    }
}

#[async_trait]
impl TokenTransferClient for EvmClient {
    #[instrument(skip_all, fields(network = %self.network, owner = %owner.address(), %token, %to))]
    async fn transfer_token(
        &self,
        owner: &PrivateKeySigner,
        token: Address,
        to: Address,
        amount: U256,
    ) -> Result<TransactionOutcome, RecoveryError> {
        let provider = self.wallet_provider(owner);
        let txr = TransactionRequest::default()
            .with_from(owner.address())
            .with_to(token)
            .with_input(contract::transfer_calldata(to, amount));
        self.submit_and_confirm(&provider, txr).await
    }
}

async fn ensure_chain_id(provider: &DynProvider, network: Network) -> Result<(), RecoveryError> {
    let chain_id = provider
        .get_chain_id()
        .instrument(tracing::info_span!("get_chain_id", %network))
        .await
        .map_err(|e| RecoveryError::Rpc(describe_rpc_error(&e)))?;
    if chain_id != network.chain_id() {
        tracing::error!(%network, expected = network.chain_id(), got = chain_id, "chainId mismatch");
        return Err(RecoveryError::Config(format!(
            "RPC endpoint serves chain {chain_id}, expected {} for {network}",
            network.chain_id()
        )));
    }
    Ok(())
}

/// Error message with the revert reason decoded, when the error carries revert data.
fn describe_rpc_error<E: Debug + Display>(err: &E) -> String {
    match extract_revert_reason(&format!("{err:?}")) {
        Some(reason) => format!("{err} ({reason})"),
        None => err.to_string(),
    }
}

/// Reason carried by revert data: the `require` message, the panic code, or the custom error
/// selector. `None` when the data is not hex or shorter than a selector.
fn decode_revert_reason(data: &str) -> Option<String> {
    let bytes = hex::decode(data).ok()?;
    let selector: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    if selector == Revert::SELECTOR {
        Revert::abi_decode(&bytes).ok().map(|revert| revert.reason)
    } else if selector == Panic::SELECTOR {
        Panic::abi_decode(&bytes).ok().map(|panic| format!("Panic({:#x})", panic.code))
    } else {
        Some(format!("UnknownError({})", hex::encode_prefixed(selector)))
    }
}

/// Finds `data: Some(RawValue("0x..."))` in an error's debug output and decodes it.
fn extract_revert_reason(err_str: &str) -> Option<String> {
    // plain quotes
    if let Some(idx) = err_str.find("data: Some(RawValue(\"") {
        let start = idx + 21;
        if let Some(end) = err_str[start..].find('"') {
            return decode_revert_reason(&err_str[start..start + end]);
        }
    }

    // escaped quotes, from nested Debug formatting
    if let Some(idx) = err_str.find(r#"data: Some(RawValue(\""#) {
        let start = idx + 22;
        if let Some(end) = err_str[start..].find(r#"\""#) {
            return decode_revert_reason(&err_str[start..start + end]);
        }
    }

    None
}
