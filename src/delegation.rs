//! Time-boxed, function-scoped delegation grants.
//!
//! A grant is an EIP-712 signed [`Delegation`] record from the compromised wallet to the batch
//! contract. The domain carries the network's chain id, so a signature made for one network never
//! verifies on another. Every signature (grant or revocation) consumes a fresh per-delegator nonce
//! from the [`NonceStore`].
//!
//! Lifecycle per nonce: unsigned, delegated, revoked. A revoked grant is never reactivated; a new
//! [`DelegationAuthority::create`] call produces a new grant with a new nonce.

use alloy::primitives::{Address, B256, Bytes, Signature, U256};
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolStruct, eip712_domain};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::contract;
use crate::error::RecoveryError;
use crate::network::Network;
use crate::timestamp::UnixTimestamp;
use crate::wallet::{OperationType, WalletConfig};

sol! {
    /// EIP-712 typed structure signed by the delegator.
    #[derive(Debug, PartialEq, Eq)]
    struct Delegation {
        address delegator;
        address delegatee;
        address authority;
        uint256 expiry;
        uint256 nonce;
        string[] functions;
    }
}

/// Lifetime of a grant. Fixed policy.
pub const DELEGATION_VALIDITY_SECS: u64 = 24 * 60 * 60;

pub const CLAIM_FUNCTION: &str = "claim()";
pub const TRANSFER_FUNCTION: &str = "transfer(address,uint256)";

/// EIP-712 domain for delegation signatures on `chain_id`.
pub fn delegation_domain(chain_id: u64) -> Eip712Domain {
    eip712_domain! {
        name: "EIP7702Delegation",
        version: "1",
        chain_id: chain_id,
        verifying_contract: Address::ZERO,
    }
}

/// Functions a grant for `operation_type` whitelists. `claim()` is always present.
pub fn allowed_functions(operation_type: OperationType) -> Vec<String> {
    let mut functions = vec![CLAIM_FUNCTION.to_string()];
    if operation_type.includes_transfer() {
        functions.push(TRANSFER_FUNCTION.to_string());
    }
    functions
}

/// Monotonic nonce counter per delegator address.
///
/// Optionally backed by a JSON file (`{"0xAbc...": 3}`) so nonces are never reused across runs.
/// A nonce is always incremented before use; the first one handed out for an address is 1.
#[derive(Debug, Default)]
pub struct NonceStore {
    nonces: DashMap<Address, u64>,
    path: Option<PathBuf>,
    /// Held across increment and persist so the file never goes back to an older snapshot.
    write_lock: Mutex<()>,
}

impl NonceStore {
    /// Volatile store. Nonces restart from zero on every process start.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed store. A missing file starts empty and is created on the first allocation.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RecoveryError> {
        let path = path.into();
        let nonces = DashMap::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let persisted: BTreeMap<String, u64> = serde_json::from_str(&raw)
                .map_err(|e| RecoveryError::NonceStore(format!("{}: {e}", path.display())))?;
            for (address, nonce) in persisted {
                let address = address.parse::<Address>().map_err(|e| {
                    RecoveryError::NonceStore(format!("bad address {address:?} in {}: {e}", path.display()))
                })?;
                nonces.insert(address, nonce);
            }
            tracing::debug!(path = %path.display(), entries = nonces.len(), "loaded delegation nonces");
        }
        Ok(Self {
            nonces,
            path: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    /// Last nonce handed out for `address`, 0 if none.
    pub fn current(&self, address: Address) -> u64 {
        self.nonces.get(&address).map(|n| *n).unwrap_or(0)
    }

    /// Increments and returns the nonce for `address`, persisting before it is used.
    pub fn next(&self, address: Address) -> Result<u64, RecoveryError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| RecoveryError::NonceStore("nonce store lock poisoned".to_string()))?;
        let nonce = {
            let mut entry = self.nonces.entry(address).or_insert(0);
            *entry += 1;
            *entry
        };
        self.persist()?;
        Ok(nonce)
    }

    fn persist(&self) -> Result<(), RecoveryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot: BTreeMap<String, u64> = self
            .nonces
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect();
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| RecoveryError::NonceStore(e.to_string()))?;
        write_atomically(path, json.as_bytes())
    }
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), RecoveryError> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Signed revocation of a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revocation {
    pub nonce: u64,
    pub signature: Bytes,
    pub timestamp: UnixTimestamp,
}

/// A delegation grant for one wallet, together with its revocation if it has been revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationInfo {
    pub wallet_address: Address,
    /// Delegatee and authority; the batch contract of the network.
    pub batch_contract_address: Address,
    pub delegated: bool,
    pub signature: Bytes,
    /// Unix seconds. 0 means no expiry was tracked.
    pub expiry: u64,
    pub nonce: u64,
    pub functions: Vec<String>,
    pub timestamp: UnixTimestamp,
    pub network: Network,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation: Option<Revocation>,
}

impl DelegationInfo {
    /// Whether the grant may be used right now. A clock failure counts as not ready.
    pub fn is_ready(&self) -> bool {
        match UnixTimestamp::try_now() {
            Ok(now) => self.is_ready_at(now),
            Err(_) => false,
        }
    }

    /// Delegated, and either no expiry was tracked or `now` is before the expiry.
    pub fn is_ready_at(&self, now: UnixTimestamp) -> bool {
        self.delegated && (self.expiry == 0 || self.expiry > now.seconds_since_epoch())
    }

    /// The typed record this grant's signature covers.
    pub fn record(&self) -> Delegation {
        Delegation {
            delegator: self.wallet_address,
            delegatee: self.batch_contract_address,
            authority: self.batch_contract_address,
            expiry: U256::from(self.expiry),
            nonce: U256::from(self.nonce),
            functions: self.functions.clone(),
        }
    }

    /// The typed record a revocation signature covers.
    fn revocation_record(&self, nonce: u64) -> Delegation {
        revocation_record(self.wallet_address, self.batch_contract_address, nonce)
    }

    /// `delegate(...)` calldata registering this grant on the authority contract.
    pub fn delegate_calldata(&self) -> Bytes {
        contract::delegate_calldata(
            self.wallet_address,
            self.batch_contract_address,
            self.expiry,
            self.nonce,
            self.functions.clone(),
            self.signature.clone(),
        )
    }

    /// `revokeDelegation(...)` calldata, once the grant has been revoked.
    pub fn revocation_calldata(&self) -> Option<Bytes> {
        self.revocation
            .as_ref()
            .map(|r| contract::revoke_calldata(self.wallet_address, r.nonce, r.signature.clone()))
    }
}

fn revocation_record(delegator: Address, batch_contract: Address, nonce: u64) -> Delegation {
    Delegation {
        delegator,
        delegatee: batch_contract,
        authority: batch_contract,
        expiry: U256::ZERO,
        nonce: U256::from(nonce),
        functions: Vec::new(),
    }
}

/// Creates, revokes and verifies delegation grants.
#[derive(Debug)]
pub struct DelegationAuthority {
    nonces: NonceStore,
}

impl DelegationAuthority {
    pub fn new(nonces: NonceStore) -> Self {
        Self { nonces }
    }

    pub fn nonces(&self) -> &NonceStore {
        &self.nonces
    }

    /// Signs a fresh 24-hour grant from `wallet` to `authority` on `network`.
    ///
    /// Fails with [`RecoveryError::MissingAuthorityContract`] before touching the key when no
    /// authority contract is known, and with [`RecoveryError::SignatureMismatch`] when the signature
    /// does not recover to the wallet's address.
    pub fn create(
        &self,
        wallet: &WalletConfig,
        authority: Option<Address>,
        network: Network,
    ) -> Result<DelegationInfo, RecoveryError> {
        let authority = authority.ok_or(RecoveryError::MissingAuthorityContract(network))?;
        let signer = wallet.private_key.signer()?;
        let delegator = signer.address();
        let now = UnixTimestamp::try_now()?;

        let nonce = self.nonces.next(delegator)?;
        let expiry = now + DELEGATION_VALIDITY_SECS;
        let record = Delegation {
            delegator,
            delegatee: authority,
            authority,
            expiry: U256::from(expiry.seconds_since_epoch()),
            nonce: U256::from(nonce),
            functions: allowed_functions(wallet.operation_type),
        };
        let signature = sign_record(&signer, &record, network.chain_id())?;

        tracing::info!(
            wallet = %delegator,
            %authority,
            %network,
            nonce,
            expiry = %expiry,
            "delegation signed"
        );

        Ok(DelegationInfo {
            wallet_address: delegator,
            batch_contract_address: authority,
            delegated: true,
            signature,
            expiry: expiry.seconds_since_epoch(),
            nonce,
            functions: record.functions,
            timestamp: now,
            network,
            revocation: None,
        })
    }

    /// Signs a revocation of `existing` and returns the grant marked as not delegated.
    ///
    /// The original grant fields are kept; the signed revocation is attached alongside.
    pub fn revoke(
        &self,
        wallet: &WalletConfig,
        existing: &DelegationInfo,
    ) -> Result<DelegationInfo, RecoveryError> {
        let signer = wallet.private_key.signer()?;
        if signer.address() != existing.wallet_address {
            return Err(RecoveryError::SignatureMismatch {
                expected: existing.wallet_address,
                recovered: signer.address(),
            });
        }
        let now = UnixTimestamp::try_now()?;
        let nonce = self.nonces.next(existing.wallet_address)?;
        let record = existing.revocation_record(nonce);
        let signature = sign_record(&signer, &record, existing.network.chain_id())?;

        tracing::info!(
            wallet = %existing.wallet_address,
            network = %existing.network,
            nonce,
            "delegation revoked"
        );

        Ok(DelegationInfo {
            delegated: false,
            revocation: Some(Revocation {
                nonce,
                signature,
                timestamp: now,
            }),
            ..existing.clone()
        })
    }

    /// Checks that the grant (and its revocation, if any) were signed by the delegator for the
    /// grant's network.
    pub fn verify(info: &DelegationInfo) -> Result<(), RecoveryError> {
        let chain_id = info.network.chain_id();
        verify_record(&info.record(), &info.signature, chain_id)?;
        if let Some(revocation) = &info.revocation {
            verify_record(
                &info.revocation_record(revocation.nonce),
                &revocation.signature,
                chain_id,
            )?;
        }
        Ok(())
    }
}

fn signing_hash(record: &Delegation, chain_id: u64) -> B256 {
    record.eip712_signing_hash(&delegation_domain(chain_id))
}

fn sign_record(
    signer: &PrivateKeySigner,
    record: &Delegation,
    chain_id: u64,
) -> Result<Bytes, RecoveryError> {
    let hash = signing_hash(record, chain_id);
    let signature = signer
        .sign_hash_sync(&hash)
        .map_err(|e| RecoveryError::Signing(e.to_string()))?;
    let recovered = signature
        .recover_address_from_prehash(&hash)
        .map_err(|e| RecoveryError::Signing(e.to_string()))?;
    if recovered != record.delegator {
        return Err(RecoveryError::SignatureMismatch {
            expected: record.delegator,
            recovered,
        });
    }
    Ok(Bytes::from(signature.as_bytes().to_vec()))
}

fn verify_record(record: &Delegation, signature: &Bytes, chain_id: u64) -> Result<(), RecoveryError> {
    let signature = Signature::try_from(signature.as_ref())
        .map_err(|e| RecoveryError::Signing(format!("malformed signature: {e}")))?;
    let recovered = signature
        .recover_address_from_prehash(&signing_hash(record, chain_id))
        .map_err(|e| RecoveryError::Signing(e.to_string()))?;
    if recovered != record.delegator {
        return Err(RecoveryError::SignatureMismatch {
            expected: record.delegator,
            recovered,
        });
    }
    Ok(())
}
