//! Error taxonomy for the recovery pipeline.
//!
//! Validation errors surface before any signing or network call. Chain errors raised while a batch
//! is running are caught at the per-operation boundary and turned into a [`crate::executor::BatchResult`]
//! instead of being propagated.

use alloy::primitives::Address;

use crate::network::Network;

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// A raw amount string is not a valid non-negative hex or decimal integer.
    #[error("invalid amount: {0:?}")]
    InvalidAmount(String),
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("invalid {field} address: {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    /// A wallet configuration is missing data its operation type requires.
    #[error("invalid wallet configuration: {0}")]
    InvalidWallet(String),
    /// The signer recovered from a delegation signature is not the delegator.
    #[error("signature mismatch: expected {expected}, recovered {recovered}")]
    SignatureMismatch { expected: Address, recovered: Address },
    #[error("signing failed: {0}")]
    Signing(String),
    /// Expired, revoked or missing delegation. Excludes the wallet from a batch.
    #[error("delegation for {0} is not ready")]
    DelegationNotReady(Address),
    #[error("no authority contract configured for network {0}")]
    MissingAuthorityContract(Network),
    #[error("gas estimation failed: {0}")]
    EstimationFailure(String),
    #[error("transaction failed: {0}")]
    TransactionFailure(String),
    #[error("token distribution failed: {0}")]
    DistributionFailure(String),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("no sponsor wallet configured")]
    NoSponsorWallet,
    #[error("no wallet is ready for batch execution")]
    NoReadyWallets,
    #[error("a batch is already running for this sponsor")]
    BatchInProgress,
    #[error("wallet limit reached ({0} wallets)")]
    WalletLimitReached(usize),
    #[error("wallet not found: {0}")]
    WalletNotFound(String),
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),
    #[error("nonce store error: {0}")]
    NonceStore(String),
    #[error("configuration error: {0}")]
    Config(String),
    /// JSON encoding or decoding of a file the runner reads or writes.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("system clock error: {0}")]
    Clock(#[from] std::time::SystemTimeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for RecoveryError {
    fn from(value: config::ConfigError) -> Self {
        RecoveryError::Config(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_errors_are_not_nonce_store_errors() {
        let error: RecoveryError = serde_json::from_str::<u64>("not a number").unwrap_err().into();
        assert!(matches!(error, RecoveryError::Serialization(_)));
        assert!(error.to_string().starts_with("serialization error"));
    }
}
