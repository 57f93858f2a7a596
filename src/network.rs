//! Supported networks, their chain IDs and default RPC endpoints.
//!
//! The set is intentionally small and fixed. Each network has a public endpoint and, where one
//! exists, a private (MEV-protected) endpoint that keeps recovery transactions out of the public
//! mempool. Both can be overridden from configuration.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::RecoveryError;

/// Supported EVM networks.
#[derive(Debug, Default, Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Network {
    /// Ethereum mainnet (chain ID 1).
    #[serde(rename = "ethereum")]
    Ethereum,
    /// Ethereum Sepolia testnet (chain ID 11155111).
    #[default]
    #[serde(rename = "sepolia")]
    Sepolia,
    /// Base mainnet (chain ID 8453).
    #[serde(rename = "base")]
    Base,
    /// Base Sepolia testnet (chain ID 84532).
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
    /// BSC mainnet (chain ID 56).
    #[serde(rename = "bsc")]
    Bsc,
    /// BSC testnet (chain ID 97).
    #[serde(rename = "bsc-testnet")]
    BscTestnet,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Ethereum => write!(f, "ethereum"),
            Network::Sepolia => write!(f, "sepolia"),
            Network::Base => write!(f, "base"),
            Network::BaseSepolia => write!(f, "base-sepolia"),
            Network::Bsc => write!(f, "bsc"),
            Network::BscTestnet => write!(f, "bsc-testnet"),
        }
    }
}

impl FromStr for Network {
    type Err = RecoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Network::variants()
            .iter()
            .copied()
            .find(|network| network.to_string() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| RecoveryError::UnsupportedNetwork(s.to_string()))
    }
}

/// Which endpoint to send traffic through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcMode {
    #[default]
    Public,
    Private,
}

/// Default endpoints for a network.
#[derive(Debug, Clone, Copy)]
pub struct RpcEndpoints {
    pub public: &'static str,
    pub private: Option<&'static str>,
}

static DEFAULT_ENDPOINTS: Lazy<HashMap<Network, RpcEndpoints>> = Lazy::new(|| {
    HashMap::from([
        (
            Network::Ethereum,
            RpcEndpoints {
                public: "https://ethereum-rpc.publicnode.com",
                private: Some("https://rpc.flashbots.net/fast"),
            },
        ),
        (
            Network::Sepolia,
            RpcEndpoints {
                public: "https://ethereum-sepolia-rpc.publicnode.com",
                private: Some("https://rpc-sepolia.flashbots.net"),
            },
        ),
        (
            Network::Base,
            RpcEndpoints {
                public: "https://mainnet.base.org",
                private: None,
            },
        ),
        (
            Network::BaseSepolia,
            RpcEndpoints {
                public: "https://sepolia.base.org",
                private: None,
            },
        ),
        (
            Network::Bsc,
            RpcEndpoints {
                public: "https://bsc-dataseed.bnbchain.org",
                private: Some("https://rpc-bsc.48.club"),
            },
        ),
        (
            Network::BscTestnet,
            RpcEndpoints {
                public: "https://bsc-testnet-dataseed.bnbchain.org",
                private: None,
            },
        ),
    ])
});

impl Network {
    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Ethereum,
            Network::Sepolia,
            Network::Base,
            Network::BaseSepolia,
            Network::Bsc,
            Network::BscTestnet,
        ]
    }

    /// EVM chain ID, used for EIP-155 transactions and the delegation EIP-712 domain.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Sepolia => 11155111,
            Network::Base => 8453,
            Network::BaseSepolia => 84532,
            Network::Bsc => 56,
            Network::BscTestnet => 97,
        }
    }

    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        Network::variants()
            .iter()
            .copied()
            .find(|network| network.chain_id() == chain_id)
    }

    pub fn is_testnet(&self) -> bool {
        matches!(
            self,
            Network::Sepolia | Network::BaseSepolia | Network::BscTestnet
        )
    }

    /// Native currency symbol, for log output.
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Network::Bsc | Network::BscTestnet => "BNB",
            _ => "ETH",
        }
    }

    pub fn default_endpoints(&self) -> RpcEndpoints {
        DEFAULT_ENDPOINTS
            .get(self)
            .copied()
            .unwrap_or(RpcEndpoints {
                public: "https://ethereum-rpc.publicnode.com",
                private: None,
            })
    }

    /// Default endpoint for `mode`. Falls back to the public endpoint when the network has no
    /// private one.
    pub fn default_rpc_url(&self, mode: RpcMode) -> &'static str {
        let endpoints = self.default_endpoints();
        match mode {
            RpcMode::Private => endpoints.private.unwrap_or(endpoints.public),
            RpcMode::Public => endpoints.public,
        }
    }

    pub fn has_private_rpc(&self) -> bool {
        self.default_endpoints().private.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_ids_round_trip() {
        for network in Network::variants() {
            assert_eq!(Network::from_chain_id(network.chain_id()), Some(*network));
        }
        assert_eq!(Network::from_chain_id(424242), None);
    }

    #[test]
    fn test_display_matches_serde_name() {
        for network in Network::variants() {
            let json = serde_json::to_string(network).unwrap();
            assert_eq!(json, format!("\"{network}\""));
            assert_eq!(network.to_string().parse::<Network>().unwrap(), *network);
        }
    }

    #[test]
    fn test_unknown_network_rejected() {
        assert!(matches!(
            "solana".parse::<Network>(),
            Err(RecoveryError::UnsupportedNetwork(_))
        ));
    }

    #[test]
    fn test_private_rpc_falls_back_to_public() {
        assert_eq!(
            Network::Base.default_rpc_url(RpcMode::Private),
            Network::Base.default_rpc_url(RpcMode::Public)
        );
        assert!(Network::Ethereum.has_private_rpc());
        assert_ne!(
            Network::Ethereum.default_rpc_url(RpcMode::Private),
            Network::Ethereum.default_rpc_url(RpcMode::Public)
        );
    }
}
