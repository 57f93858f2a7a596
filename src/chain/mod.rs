//! Chain access used by the executor and the distributor.
//!
//! The traits here are the only way the rest of the crate talks to a node, so the pipeline can be
//! driven against an in-process mock in tests. [`evm::EvmClient`] is the alloy-backed implementation.

use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;

use crate::error::RecoveryError;
use crate::network::Network;

pub mod evm;

/// Transaction sent from the sponsor: target, calldata, value and an optional fixed gas limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaTransaction {
    pub to: Address,
    pub calldata: Bytes,
    pub value: U256,
    /// `None` lets the node estimate.
    pub gas_limit: Option<u64>,
}

/// A mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub tx_hash: B256,
    /// Receipt status.
    pub success: bool,
    pub gas_used: u64,
    pub effective_gas_price: u128,
}

impl TransactionOutcome {
    /// Gas fee paid, in Wei.
    pub fn fee_paid(&self) -> U256 {
        U256::from(self.gas_used) * U256::from(self.effective_gas_price)
    }
}

/// Node operations performed on behalf of the sponsor wallet.
#[async_trait]
pub trait SponsorClient: Send + Sync {
    fn sponsor_address(&self) -> Address;

    fn network(&self) -> Network;

    /// Gas units the node expects `tx` to consume.
    async fn estimate_gas(&self, tx: &MetaTransaction) -> Result<u64, RecoveryError>;

    /// Current max fee per gas, `None` when the node reports no fee data.
    async fn max_fee_per_gas(&self) -> Result<Option<u128>, RecoveryError>;

    async fn sponsor_balance(&self) -> Result<U256, RecoveryError>;

    /// Signs `tx` with the sponsor key, submits it and waits for its receipt.
    ///
    /// A reverted transaction is an `Ok` outcome with `success == false`.
    async fn send_transaction(&self, tx: MetaTransaction) -> Result<TransactionOutcome, RecoveryError>;
}

/// ERC-20 transfers signed by a recovered wallet.
#[async_trait]
pub trait TokenTransferClient: Send + Sync {
    /// Sends `amount` of `token` from `owner` to `to` and waits for the receipt.
    async fn transfer_token(
        &self,
        owner: &PrivateKeySigner,
        token: Address,
        to: Address,
        amount: U256,
    ) -> Result<TransactionOutcome, RecoveryError>;
}
