//! Configuration file parsing for the recovery runner.
//!
//! Loads `config.toml` (or the file named by `CONFIG_FILE`). Every section is optional and
//! falls back to defaults, so an absent file yields a usable configuration as long as the
//! selected network has an authority contract configured.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::RecoveryError;
use crate::fee::FeeConfig;
use crate::network::{Network, RpcMode};

/// Complete runner configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub fees: FeeConfig,
    pub execution: ExecutionConfig,
    pub delegation: DelegationConfig,
    /// Per-network overrides keyed by network name (e.g. "sepolia", "bsc").
    pub networks: HashMap<String, NetworkConfig>,
}

impl RecoveryConfig {
    /// Load configuration from a TOML file.
    ///
    /// If the file doesn't exist, returns the default configuration.
    /// If the file exists but is malformed, returns an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RecoveryError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let config: Self = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variable CONFIG_FILE or default path.
    pub fn from_env() -> Result<Self, RecoveryError> {
        let config_path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::from_file(config_path)
    }

    pub fn validate(&self) -> Result<(), RecoveryError> {
        self.fees.validate()?;
        let mut seen = HashSet::new();
        for name in self.networks.keys() {
            let network = name.parse::<Network>()?;
            if !seen.insert(network) {
                return Err(RecoveryError::Config(format!(
                    "network {network} is configured more than once"
                )));
            }
        }
        Ok(())
    }

    /// Override section for `network`. Keys match the way [`Network`] parses them, so
    /// `[networks.Sepolia]` applies to Sepolia.
    fn network_override(&self, network: Network) -> Option<&NetworkConfig> {
        self.networks
            .iter()
            .find(|(name, _)| name.parse::<Network>().ok() == Some(network))
            .map(|(_, config)| config)
    }

    /// Effective settings for `network`, with overrides applied on top of built-in defaults.
    pub fn for_network(&self, network: Network) -> Result<ResolvedNetworkConfig, RecoveryError> {
        let network_override = self.network_override(network);

        let mode = match network_override.and_then(|n| n.use_private_rpc) {
            Some(true) => RpcMode::Private,
            _ => RpcMode::Public,
        };
        let override_url = network_override.and_then(|n| match mode {
            RpcMode::Private => n.private_rpc_url.clone(),
            RpcMode::Public => n.rpc_url.clone(),
        });
        let rpc_url = match override_url {
            Some(url) => url,
            None => Url::parse(network.default_rpc_url(mode))
                .map_err(|e| RecoveryError::Config(format!("invalid default RPC URL: {e}")))?,
        };

        Ok(ResolvedNetworkConfig {
            network,
            rpc_url,
            mode,
            batch_contract: network_override.and_then(|n| n.batch_contract),
        })
    }
}

/// Batch execution tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Pause between consecutive operations, in milliseconds.
    /// Default: 2000
    pub inter_operation_delay_ms: u64,
    /// Gas units assumed for an operation whose estimate fails.
    /// Default: 300000
    pub fallback_gas_units: u64,
    /// Gas price used when the node reports no fee data, in Wei.
    /// Default: 20 gwei
    pub default_gas_price_wei: u128,
    /// Fixed gas limit set on every submitted recovery transaction.
    /// Default: 1000000
    pub gas_limit_ceiling: u64,
    /// How long to wait for a receipt before recording the operation as failed.
    /// Default: 120 seconds
    pub receipt_timeout_seconds: u64,
    /// Block confirmations to wait for.
    /// Default: 1
    pub confirmations: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            inter_operation_delay_ms: 2000,
            fallback_gas_units: 300_000,
            default_gas_price_wei: 20_000_000_000,
            gas_limit_ceiling: 1_000_000,
            receipt_timeout_seconds: 120,
            confirmations: 1,
        }
    }
}

impl ExecutionConfig {
    pub fn inter_operation_delay(&self) -> Duration {
        Duration::from_millis(self.inter_operation_delay_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_seconds)
    }
}

/// Delegation bookkeeping.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DelegationConfig {
    /// JSON file holding the per-delegator nonce counters. Empty disables persistence.
    pub nonce_store_path: String,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            nonce_store_path: "delegation-nonces.json".to_string(),
        }
    }
}

impl DelegationConfig {
    pub fn nonce_store_path(&self) -> Option<PathBuf> {
        let trimmed = self.nonce_store_path.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

/// Per-network overrides.
///
/// All fields are optional - only specified fields override the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Override the public RPC endpoint.
    pub rpc_url: Option<Url>,
    /// Override the private (MEV-protected) RPC endpoint.
    pub private_rpc_url: Option<Url>,
    /// Send through the private endpoint.
    pub use_private_rpc: Option<bool>,
    /// Address of the delegation authority / batch executor contract.
    pub batch_contract: Option<Address>,
}

/// Network settings after applying overrides.
#[derive(Debug, Clone)]
pub struct ResolvedNetworkConfig {
    pub network: Network,
    pub rpc_url: Url,
    pub mode: RpcMode,
    pub batch_contract: Option<Address>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn test_default_config() {
        let config = RecoveryConfig::default();
        assert!(config.fees.enabled);
        assert_eq!(config.fees.numerator(), 200);
        assert_eq!(config.execution.inter_operation_delay(), Duration::from_secs(2));
        assert_eq!(config.execution.fallback_gas_units, 300_000);
        assert_eq!(
            config.delegation.nonce_store_path(),
            Some(PathBuf::from("delegation-nonces.json"))
        );
    }

    #[test]
    fn test_parse_fee_section() {
        let config_str = r#"
[fees]
enabled = false
fee_percentage = 0.05
fee_collector = "0x00000000000000000000000000000000000000fe"
"#;
        let config: RecoveryConfig = toml::from_str(config_str).unwrap();
        assert!(!config.fees.enabled);
        assert_eq!(config.fees.numerator(), 50);
        assert_eq!(
            config.fees.fee_collector,
            Some(address!("00000000000000000000000000000000000000fe"))
        );
        // Untouched sections keep their defaults
        assert_eq!(config.execution.gas_limit_ceiling, 1_000_000);
    }

    #[test]
    fn test_network_override_resolution() {
        let config_str = r#"
[networks.sepolia]
batch_contract = "0x1111111111111111111111111111111111111111"
use_private_rpc = true

[networks.base]
rpc_url = "http://localhost:8545"
"#;
        let config: RecoveryConfig = toml::from_str(config_str).unwrap();
        config.validate().unwrap();

        let sepolia = config.for_network(Network::Sepolia).unwrap();
        assert_eq!(sepolia.mode, RpcMode::Private);
        assert_eq!(sepolia.rpc_url.as_str(), "https://rpc-sepolia.flashbots.net/");
        assert_eq!(
            sepolia.batch_contract,
            Some(address!("1111111111111111111111111111111111111111"))
        );

        let base = config.for_network(Network::Base).unwrap();
        assert_eq!(base.mode, RpcMode::Public);
        assert_eq!(base.rpc_url.as_str(), "http://localhost:8545/");
        assert_eq!(base.batch_contract, None);
    }

    #[test]
    fn test_unknown_network_key_rejected() {
        let config_str = r#"
[networks.solana]
use_private_rpc = true
"#;
        let config: RecoveryConfig = toml::from_str(config_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_network_keys_match_case_insensitively() {
        let config_str = r#"
[networks.Sepolia]
batch_contract = "0x1111111111111111111111111111111111111111"
"#;
        let config: RecoveryConfig = toml::from_str(config_str).unwrap();
        config.validate().unwrap();
        assert_eq!(
            config.for_network(Network::Sepolia).unwrap().batch_contract,
            Some(address!("1111111111111111111111111111111111111111"))
        );
    }

    #[test]
    fn test_same_network_twice_rejected() {
        let config_str = r#"
[networks.sepolia]
use_private_rpc = true

[networks.SEPOLIA]
use_private_rpc = false
"#;
        let config: RecoveryConfig = toml::from_str(config_str).unwrap();
        assert!(matches!(config.validate(), Err(RecoveryError::Config(_))));
    }

    #[test]
    fn test_empty_nonce_store_path_disables_persistence() {
        let config_str = r#"
[delegation]
nonce_store_path = ""
"#;
        let config: RecoveryConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.delegation.nonce_store_path(), None);
    }
}
