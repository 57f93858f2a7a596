//! Batch operation builder.
//!
//! [`build_operation`] joins a wallet, its delegation grant and the fee settings into one
//! [`BatchOperation`]. It is pure, and both gas estimation and execution derive their transaction
//! from the same value through [`BatchOperation::to_transaction`].

use alloy::primitives::{Address, Bytes, U256};
use std::collections::HashMap;

use crate::amount;
use crate::chain::MetaTransaction;
use crate::contract::{self, DelegatedOperation, DelegationProof};
use crate::delegation::{CLAIM_FUNCTION, DelegationAuthority, DelegationInfo, TRANSFER_FUNCTION};
use crate::error::RecoveryError;
use crate::fee::FeeConfig;
use crate::network::Network;
use crate::timestamp::UnixTimestamp;
use crate::wallet::{OperationType, RecoveryAction, WalletConfig};

/// Function list embedded in every execution-time delegation proof.
///
/// This is always the full list, whatever the grant whitelisted when it was signed. A claim-only
/// grant is therefore presented to the contract with a list it did not sign.
pub const EXECUTION_FUNCTIONS: [&str; 2] = [CLAIM_FUNCTION, TRANSFER_FUNCTION];

/// The delegation proof part of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationPayload {
    pub delegator: Address,
    pub delegatee: Address,
    pub authority: Address,
    pub expiry: u64,
    pub nonce: u64,
    pub functions: Vec<String>,
    pub signature: Bytes,
}

impl DelegationPayload {
    fn from_grant(grant: &DelegationInfo) -> Self {
        Self {
            delegator: grant.wallet_address,
            delegatee: grant.batch_contract_address,
            authority: grant.batch_contract_address,
            expiry: grant.expiry,
            nonce: grant.nonce,
            functions: EXECUTION_FUNCTIONS.iter().map(|f| f.to_string()).collect(),
            signature: grant.signature.clone(),
        }
    }

    /// ABI encoding of the proof tuple.
    pub fn calldata(&self) -> Bytes {
        contract::delegation_calldata(&DelegationProof {
            delegator: self.delegator,
            delegatee: self.delegatee,
            authority: self.authority,
            expiry: U256::from(self.expiry),
            nonce: U256::from(self.nonce),
            functions: self.functions.clone(),
            signature: self.signature.clone(),
        })
    }
}

/// One wallet's recovery, ready to be submitted by the sponsor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOperation {
    pub wallet_id: String,
    pub network: Network,
    pub operation_type: OperationType,
    pub wallet_address: Address,
    /// Batch contract the transaction is sent to.
    pub delegatee_address: Address,
    pub airdrop_contract: Address,
    pub token_contract: Option<Address>,
    pub receiver_address: Address,
    pub claim_calldata: Bytes,
    pub claim_value: U256,
    pub transfer_amount: U256,
    pub service_fee_amount: U256,
    pub delegation: DelegationPayload,
}

impl BatchOperation {
    pub fn claim_value_hex(&self) -> String {
        amount::format_hex(self.claim_value)
    }

    pub fn transfer_amount_hex(&self) -> String {
        amount::format_hex(self.transfer_amount)
    }

    pub fn service_fee_hex(&self) -> String {
        amount::format_hex(self.service_fee_amount)
    }

    /// ERC-20 `transfer(receiver, transferAmount)`, or empty when there is nothing to transfer.
    pub fn transfer_calldata(&self) -> Bytes {
        match self.token_contract {
            Some(_) if !self.transfer_amount.is_zero() => {
                contract::transfer_calldata(self.receiver_address, self.transfer_amount)
            }
            _ => Bytes::new(),
        }
    }

    /// The 8-tuple the batch contract expects.
    pub fn to_contract_operation(&self) -> DelegatedOperation {
        DelegatedOperation {
            walletAddress: self.wallet_address,
            delegateeAddress: self.delegatee_address,
            airdropContract: self.airdrop_contract,
            tokenContract: self.token_contract.unwrap_or(Address::ZERO),
            receiverAddress: self.receiver_address,
            claimCalldata: self.claim_calldata.clone(),
            transferCalldata: self.transfer_calldata(),
            delegationCalldata: self.delegation.calldata(),
        }
    }

    /// `executeDelegatedOperations([self])`.
    pub fn calldata(&self) -> Bytes {
        contract::execute_calldata(vec![self.to_contract_operation()])
    }

    /// Native value attached to the transaction.
    pub fn value(&self) -> U256 {
        self.claim_value
    }

    pub fn to_transaction(&self, gas_limit: Option<u64>) -> MetaTransaction {
        MetaTransaction {
            to: self.delegatee_address,
            calldata: self.calldata(),
            value: self.value(),
            gas_limit,
        }
    }
}

/// Builds the operation for `wallet`, checking every precondition against the current time.
pub fn build_operation(
    wallet: &WalletConfig,
    grant: &DelegationInfo,
    fees: &FeeConfig,
) -> Result<BatchOperation, RecoveryError> {
    build_operation_at(wallet, grant, fees, UnixTimestamp::try_now()?)
}

/// Same as [`build_operation`] with an explicit clock.
pub fn build_operation_at(
    wallet: &WalletConfig,
    grant: &DelegationInfo,
    fees: &FeeConfig,
    now: UnixTimestamp,
) -> Result<BatchOperation, RecoveryError> {
    if !grant.is_ready_at(now) {
        return Err(RecoveryError::DelegationNotReady(grant.wallet_address));
    }
    let fields = WalletFields::parse(wallet)?;
    if fields.wallet_address != grant.wallet_address {
        return Err(RecoveryError::InvalidWallet(format!(
            "delegation was granted by {}, wallet key is {}",
            grant.wallet_address, fields.wallet_address
        )));
    }

    Ok(BatchOperation {
        wallet_id: wallet.id.clone(),
        network: wallet.network,
        operation_type: fields.action.operation_type(),
        wallet_address: fields.wallet_address,
        delegatee_address: grant.batch_contract_address,
        airdrop_contract: fields.airdrop_contract,
        token_contract: fields.action.token_contract(),
        receiver_address: fields.receiver_address,
        claim_calldata: fields.action.claim_data().cloned().unwrap_or_default(),
        claim_value: fields.claim_value,
        transfer_amount: fields.transfer_amount,
        service_fee_amount: fees.service_fee(fields.claim_value.max(fields.transfer_amount)),
        delegation: DelegationPayload::from_grant(grant),
    })
}

/// Everything an operation takes from the wallet itself, parsed.
struct WalletFields {
    wallet_address: Address,
    airdrop_contract: Address,
    receiver_address: Address,
    action: RecoveryAction,
    claim_value: U256,
    transfer_amount: U256,
}

impl WalletFields {
    fn parse(wallet: &WalletConfig) -> Result<Self, RecoveryError> {
        Ok(Self {
            wallet_address: wallet.address()?,
            airdrop_contract: wallet.airdrop_contract()?,
            receiver_address: wallet.receiver_address()?,
            action: wallet.action()?,
            claim_value: wallet.claim_value()?,
            transfer_amount: wallet.transfer_amount()?,
        })
    }
}

/// Checks every wallet field an operation needs without touching a grant, and returns the
/// wallet's address. Runs before anything is signed for the wallet.
pub fn check_wallet(wallet: &WalletConfig) -> Result<Address, RecoveryError> {
    WalletFields::parse(wallet).map(|fields| fields.wallet_address)
}

/// Makes sure every wallet on `network` that passes [`check_wallet`] holds a ready grant for
/// `batch_contract`, signing a new one only where the stored grant cannot be reused.
///
/// Wallets that fail the check, or whose signing fails, are returned as excluded and get no
/// grant or nonce. A missing batch contract fails the whole call before anything is signed.
pub fn prepare_grants(
    authority: &DelegationAuthority,
    wallets: &[WalletConfig],
    network: Network,
    batch_contract: Option<Address>,
    grants: &mut HashMap<String, DelegationInfo>,
) -> Result<Vec<ExcludedWallet>, RecoveryError> {
    let batch_contract = batch_contract.ok_or(RecoveryError::MissingAuthorityContract(network))?;
    let mut excluded = Vec::new();
    for wallet in wallets.iter().filter(|w| w.network == network) {
        let signed = check_wallet(wallet).and_then(|address| {
            let reusable = grants.get(&wallet.id).is_some_and(|grant| {
                grant.is_ready()
                    && grant.wallet_address == address
                    && grant.network == network
                    && grant.batch_contract_address == batch_contract
            });
            if reusable {
                tracing::debug!(wallet_id = %wallet.id, "reusing stored delegation");
                return Ok(None);
            }
            authority.create(wallet, Some(batch_contract), network).map(Some)
        });
        match signed {
            Ok(Some(grant)) => {
                grants.insert(wallet.id.clone(), grant);
            }
            Ok(None) => {}
            Err(reason) => {
                tracing::warn!(wallet_id = %wallet.id, reason = %reason, "wallet not delegated");
                excluded.push(ExcludedWallet {
                    wallet_id: wallet.id.clone(),
                    reason,
                });
            }
        }
    }
    Ok(excluded)
}

/// A wallet left out of a batch and why.
#[derive(Debug)]
pub struct ExcludedWallet {
    pub wallet_id: String,
    pub reason: RecoveryError,
}

/// Operations for every wallet that passed, in wallet order, plus the ones that did not.
#[derive(Debug, Default)]
pub struct PreparedBatch {
    pub operations: Vec<BatchOperation>,
    pub excluded: Vec<ExcludedWallet>,
}

/// Builds one operation per wallet. `grants` is keyed by wallet id; a wallet without a grant is
/// excluded as not ready.
pub fn build_batch(
    wallets: &[WalletConfig],
    grants: &HashMap<String, DelegationInfo>,
    fees: &FeeConfig,
) -> Result<PreparedBatch, RecoveryError> {
    Ok(build_batch_at(wallets, grants, fees, UnixTimestamp::try_now()?))
}

pub fn build_batch_at(
    wallets: &[WalletConfig],
    grants: &HashMap<String, DelegationInfo>,
    fees: &FeeConfig,
    now: UnixTimestamp,
) -> PreparedBatch {
    let mut batch = PreparedBatch::default();
    for wallet in wallets {
        let result = match grants.get(&wallet.id) {
            Some(grant) => build_operation_at(wallet, grant, fees, now),
            None => Err(RecoveryError::DelegationNotReady(
                wallet.address().unwrap_or(Address::ZERO),
            )),
        };
        match result {
            Ok(operation) => batch.operations.push(operation),
            Err(reason) => {
                tracing::warn!(wallet_id = %wallet.id, reason = %reason, "wallet excluded from batch");
                batch.excluded.push(ExcludedWallet {
                    wallet_id: wallet.id.clone(),
                    reason,
                });
            }
        }
    }
    batch
}
