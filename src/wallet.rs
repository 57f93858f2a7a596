//! Per-wallet recovery configuration.
//!
//! A [`WalletConfig`] holds what the user typed for one compromised wallet: raw strings, exactly as
//! entered. [`WalletConfig::action`] turns the operation-specific fields into a [`RecoveryAction`],
//! which can only be constructed when the fields its operation type needs are present.
//!
//! Each wallet is bound to the fee settings of the [`WalletStore`] holding it. The service fee is
//! derived from the current amounts and those settings whenever it is read, so editing an amount
//! field directly can never leave it stale.

use alloy::primitives::{Address, Bytes, U256};
use alloy::signers::local::PrivateKeySigner;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::str::FromStr;

use crate::amount;
use crate::error::RecoveryError;
use crate::fee::FeeConfig;
use crate::network::Network;
use crate::timestamp::UnixTimestamp;

/// Maximum number of wallets recovered in one session.
pub const MAX_WALLETS: usize = 5;

/// Raw private key of a compromised wallet.
///
/// Held in memory only. `Debug` is redacted and [`WalletConfig`] never serializes it; the only
/// way out is an explicit [`WalletBackup`].
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct WalletSecret(String);

impl WalletSecret {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Builds a fresh signer. Callers keep it only as long as one operation needs it.
    pub fn signer(&self) -> Result<PrivateKeySigner, RecoveryError> {
        if self.is_empty() {
            return Err(RecoveryError::InvalidPrivateKey("private key is empty".to_string()));
        }
        PrivateKeySigner::from_str(self.0.trim())
            .map_err(|e| RecoveryError::InvalidPrivateKey(e.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for WalletSecret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "WalletSecret(<empty>)")
        } else {
            write!(f, "WalletSecret(<redacted>)")
        }
    }
}

/// Which calls a recovery performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    #[default]
    Claim,
    Transfer,
    Both,
}

impl OperationType {
    pub fn includes_claim(&self) -> bool {
        matches!(self, OperationType::Claim | OperationType::Both)
    }

    pub fn includes_transfer(&self) -> bool {
        matches!(self, OperationType::Transfer | OperationType::Both)
    }
}

/// Operation-specific data, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Claim only. A token contract may still be set so the claimed tokens can be distributed.
    Claim {
        claim_data: Bytes,
        token_contract: Option<Address>,
    },
    Transfer {
        token_contract: Address,
    },
    Both {
        claim_data: Bytes,
        token_contract: Address,
    },
}

impl RecoveryAction {
    pub fn operation_type(&self) -> OperationType {
        match self {
            RecoveryAction::Claim { .. } => OperationType::Claim,
            RecoveryAction::Transfer { .. } => OperationType::Transfer,
            RecoveryAction::Both { .. } => OperationType::Both,
        }
    }

    pub fn claim_data(&self) -> Option<&Bytes> {
        match self {
            RecoveryAction::Claim { claim_data, .. } | RecoveryAction::Both { claim_data, .. } => {
                Some(claim_data)
            }
            RecoveryAction::Transfer { .. } => None,
        }
    }

    pub fn token_contract(&self) -> Option<Address> {
        match self {
            RecoveryAction::Claim { token_contract, .. } => *token_contract,
            RecoveryAction::Transfer { token_contract }
            | RecoveryAction::Both { token_contract, .. } => Some(*token_contract),
        }
    }
}

/// One compromised wallet being recovered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletConfig {
    pub id: String,
    pub name: String,
    pub network: Network,
    #[serde(skip_serializing)]
    pub private_key: WalletSecret,
    pub operation_type: OperationType,
    /// Contract whose `claim()` releases the airdrop.
    pub airdrop_contract: String,
    /// ERC-20 token being recovered. Required for `transfer` and `both`.
    pub token_contract: String,
    /// Hex calldata of the claim call. Required for `claim` and `both`.
    pub claim_data: String,
    pub receiver_address: String,
    /// Wei, hex or decimal. Blank means zero.
    pub claim_value: String,
    /// Wei, hex or decimal. Blank means zero.
    pub transfer_amount: String,
    #[serde(skip)]
    fees: FeeConfig,
}

impl WalletConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, network: Network) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            network,
            ..Default::default()
        }
    }

    /// Service fee as `0x`-prefixed hex Wei: `floor(fee_base * numerator / 1000)` under the bound
    /// fee settings.
    pub fn service_fee_amount(&self) -> String {
        amount::format_hex(self.fees.service_fee(self.fee_base()))
    }

    /// Larger of claim value and transfer amount. Unparseable input counts as zero here.
    pub fn fee_base(&self) -> U256 {
        amount::parse_or_zero(&self.claim_value).max(amount::parse_or_zero(&self.transfer_amount))
    }

    /// Binds the wallet to `fees` for later [`service_fee_amount`](Self::service_fee_amount) reads.
    ///
    /// Idempotent: unchanged inputs produce the same fee.
    pub fn recompute_service_fee(&mut self, fees: &FeeConfig) {
        self.fees = *fees;
    }

    pub fn fees(&self) -> &FeeConfig {
        &self.fees
    }

    /// Public address derived from the private key.
    pub fn address(&self) -> Result<Address, RecoveryError> {
        Ok(self.private_key.signer()?.address())
    }

    pub fn airdrop_contract(&self) -> Result<Address, RecoveryError> {
        parse_required_address("airdrop contract", &self.airdrop_contract)
    }

    pub fn receiver_address(&self) -> Result<Address, RecoveryError> {
        parse_required_address("receiver", &self.receiver_address)
    }

    /// Token contract, if one is set.
    pub fn token_contract(&self) -> Result<Option<Address>, RecoveryError> {
        if self.token_contract.trim().is_empty() {
            return Ok(None);
        }
        parse_required_address("token contract", &self.token_contract).map(Some)
    }

    pub fn claim_value(&self) -> Result<U256, RecoveryError> {
        amount::parse(&self.claim_value)
    }

    pub fn transfer_amount(&self) -> Result<U256, RecoveryError> {
        amount::parse(&self.transfer_amount)
    }

    /// Validates the operation-specific fields and returns them as a [`RecoveryAction`].
    pub fn action(&self) -> Result<RecoveryAction, RecoveryError> {
        let token_contract = self.token_contract()?;
        let claim_data = if self.operation_type.includes_claim() {
            Some(parse_claim_data(&self.claim_data)?)
        } else {
            None
        };

        match (self.operation_type, claim_data, token_contract) {
            (OperationType::Claim, Some(claim_data), token_contract) => Ok(RecoveryAction::Claim {
                claim_data,
                token_contract,
            }),
            (OperationType::Transfer, _, Some(token_contract)) => {
                Ok(RecoveryAction::Transfer { token_contract })
            }
            (OperationType::Both, Some(claim_data), Some(token_contract)) => {
                Ok(RecoveryAction::Both {
                    claim_data,
                    token_contract,
                })
            }
            (operation_type, _, _) => Err(RecoveryError::InvalidWallet(format!(
                "token contract is required for operation type {operation_type:?}"
            ))),
        }
    }
}

fn parse_required_address(field: &'static str, value: &str) -> Result<Address, RecoveryError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RecoveryError::InvalidWallet(format!("{field} address is required")));
    }
    Address::from_str(trimmed).map_err(|_| RecoveryError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

fn parse_claim_data(value: &str) -> Result<Bytes, RecoveryError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "0x" {
        return Err(RecoveryError::InvalidWallet("claim data is required".to_string()));
    }
    Bytes::from_str(trimmed)
        .map_err(|e| RecoveryError::InvalidWallet(format!("claim data is not valid hex: {e}")))
}

/// Partial update of a [`WalletConfig`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct WalletUpdate {
    pub name: Option<String>,
    pub network: Option<Network>,
    pub private_key: Option<WalletSecret>,
    pub operation_type: Option<OperationType>,
    pub airdrop_contract: Option<String>,
    pub token_contract: Option<String>,
    pub claim_data: Option<String>,
    pub receiver_address: Option<String>,
    pub claim_value: Option<String>,
    pub transfer_amount: Option<String>,
}

impl WalletUpdate {
    fn apply(self, wallet: &mut WalletConfig) {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *slot = value;
            }
        }
        set(&mut wallet.name, self.name);
        set(&mut wallet.network, self.network);
        set(&mut wallet.private_key, self.private_key);
        set(&mut wallet.operation_type, self.operation_type);
        set(&mut wallet.airdrop_contract, self.airdrop_contract);
        set(&mut wallet.token_contract, self.token_contract);
        set(&mut wallet.claim_data, self.claim_data);
        set(&mut wallet.receiver_address, self.receiver_address);
        set(&mut wallet.claim_value, self.claim_value);
        set(&mut wallet.transfer_amount, self.transfer_amount);
    }
}

/// The set of wallets being recovered, plus the fee settings their service fees derive from.
#[derive(Debug, Clone)]
pub struct WalletStore {
    wallets: Vec<WalletConfig>,
    fees: FeeConfig,
    next_id: u64,
}

impl WalletStore {
    pub fn new(fees: FeeConfig) -> Self {
        Self {
            wallets: Vec::new(),
            fees,
            next_id: 1,
        }
    }

    pub fn fees(&self) -> &FeeConfig {
        &self.fees
    }

    /// Replaces the fee settings and rebinds every wallet to them.
    pub fn set_fees(&mut self, fees: FeeConfig) {
        self.fees = fees;
        for wallet in &mut self.wallets {
            wallet.recompute_service_fee(&self.fees);
        }
    }

    pub fn wallets(&self) -> &[WalletConfig] {
        &self.wallets
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&WalletConfig> {
        self.wallets.iter().find(|w| w.id == id)
    }

    /// Adds an empty wallet and returns it.
    pub fn add(&mut self, name: impl Into<String>, network: Network) -> Result<&WalletConfig, RecoveryError> {
        let id = self.allocate_id();
        self.insert(WalletConfig::new(id, name, network))
    }

    /// Adds a fully populated wallet (e.g. loaded from a file). A blank id is replaced by a
    /// fresh one; an id already in use is rejected.
    pub fn insert(&mut self, mut wallet: WalletConfig) -> Result<&WalletConfig, RecoveryError> {
        if self.wallets.len() >= MAX_WALLETS {
            return Err(RecoveryError::WalletLimitReached(MAX_WALLETS));
        }
        if wallet.id.trim().is_empty() {
            wallet.id = self.allocate_id();
        } else if self.get(&wallet.id).is_some() {
            return Err(RecoveryError::InvalidWallet(format!("duplicate wallet id {}", wallet.id)));
        }
        wallet.recompute_service_fee(&self.fees);
        tracing::debug!(wallet_id = %wallet.id, name = %wallet.name, "wallet added");
        self.wallets.push(wallet);
        Ok(&self.wallets[self.wallets.len() - 1])
    }

    /// Copies a wallet, including its key, under a new id.
    pub fn duplicate(&mut self, id: &str) -> Result<&WalletConfig, RecoveryError> {
        let mut copy = self
            .get(id)
            .cloned()
            .ok_or_else(|| RecoveryError::WalletNotFound(id.to_string()))?;
        copy.id = String::new();
        copy.name = format!("{} (copy)", copy.name);
        self.insert(copy)
    }

    pub fn update(&mut self, id: &str, update: WalletUpdate) -> Result<&WalletConfig, RecoveryError> {
        let index = self.position(id)?;
        let wallet = &mut self.wallets[index];
        update.apply(wallet);
        wallet.recompute_service_fee(&self.fees);
        Ok(&self.wallets[index])
    }

    pub fn remove(&mut self, id: &str) -> Result<WalletConfig, RecoveryError> {
        let index = self.position(id)?;
        Ok(self.wallets.remove(index))
    }

    fn position(&self, id: &str) -> Result<usize, RecoveryError> {
        self.wallets
            .iter()
            .position(|w| w.id == id)
            .ok_or_else(|| RecoveryError::WalletNotFound(id.to_string()))
    }

    fn allocate_id(&mut self) -> String {
        loop {
            let id = format!("wallet-{}", self.next_id);
            self.next_id += 1;
            if self.get(&id).is_none() {
                return id;
            }
        }
    }
}

const BACKUP_WARNING: &str =
    "This file contains a private key in cleartext. Anyone holding it controls the wallet. Store it offline.";

/// User-requested cleartext export of a wallet's key material.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBackup {
    pub address: Address,
    pub private_key: String,
    /// Keys are imported, not generated here, so there is usually no mnemonic.
    pub mnemonic: Option<String>,
    pub created_at: UnixTimestamp,
    pub warning: String,
}

impl WalletBackup {
    pub fn from_wallet(wallet: &WalletConfig) -> Result<Self, RecoveryError> {
        Ok(Self {
            address: wallet.address()?,
            private_key: wallet.private_key.expose().trim().to_string(),
            mnemonic: None,
            created_at: UnixTimestamp::try_now()?,
            warning: BACKUP_WARNING.to_string(),
        })
    }

    /// Writes `backups` as pretty JSON to `path`.
    pub fn write_all(backups: &[WalletBackup], path: impl AsRef<Path>) -> Result<(), RecoveryError> {
        let json = serde_json::to_string_pretty(backups)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
