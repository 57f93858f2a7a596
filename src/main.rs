//! Recovery runner.
//!
//! Loads the wallets to recover, signs (or reuses) a delegation per wallet, and submits one
//! sponsored operation per wallet on the selected network. Successful operations are followed by
//! the token split between fee collector and receiver.
//!
//! Commands:
//! - `run` (default) – delegate, estimate, execute, distribute
//! - `estimate` – delegate and estimate gas only
//! - `revoke` – sign revocations for every stored delegation
//! - `backup <path>` – export wallet keys to a JSON file
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG_FILE` (default `config.toml`)
//! - `SPONSOR_PRIVATE_KEY` – key of the wallet paying gas
//! - `NETWORK` (default `sepolia`)
//! - `WALLETS_FILE` (default `wallets.json`) – JSON array of wallet configurations
//! - `DELEGATIONS_FILE` (default `delegations.json`) – signed grants keyed by wallet id
//! - `EXECUTION_LOG_FILE` (default `execution-log.json`)

use dotenvy::dotenv;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use delegated_recovery::batch::{build_batch, prepare_grants};
use delegated_recovery::chain::evm::EvmClient;
use delegated_recovery::config::RecoveryConfig;
use delegated_recovery::delegation::{DelegationAuthority, DelegationInfo, NonceStore};
use delegated_recovery::distributor::Distributor;
use delegated_recovery::error::RecoveryError;
use delegated_recovery::executor::{BatchExecutor, ExecutionLog, ExecutorSettings};
use delegated_recovery::network::Network;
use delegated_recovery::sig_down::SigDown;
use delegated_recovery::telemetry::Telemetry;
use delegated_recovery::wallet::{WalletBackup, WalletConfig, WalletSecret, WalletStore};

enum Command {
    Run,
    Estimate,
    Revoke,
    Backup(PathBuf),
}

impl Command {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, RecoveryError> {
        match args.next().as_deref() {
            None | Some("run") => Ok(Command::Run),
            Some("estimate") => Ok(Command::Estimate),
            Some("revoke") => Ok(Command::Revoke),
            Some("backup") => args
                .next()
                .map(|path| Command::Backup(PathBuf::from(path)))
                .ok_or_else(|| RecoveryError::Config("usage: backup <path>".to_string())),
            Some(other) => Err(RecoveryError::Config(format!(
                "unknown command {other:?}, expected run, estimate, revoke or backup <path>"
            ))),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn load_wallets(path: &Path, store: &mut WalletStore) -> Result<(), RecoveryError> {
    let raw = std::fs::read_to_string(path)?;
    let wallets: Vec<WalletConfig> = serde_json::from_str(&raw)
        .map_err(|e| RecoveryError::Config(format!("{}: {e}", path.display())))?;
    for wallet in wallets {
        store.insert(wallet)?;
    }
    tracing::info!(path = %path.display(), wallets = store.len(), "wallets loaded");
    Ok(())
}

fn load_delegations(path: &Path) -> Result<HashMap<String, DelegationInfo>, RecoveryError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| RecoveryError::Config(format!("{}: {e}", path.display())))
}

fn save_delegations(path: &Path, grants: &HashMap<String, DelegationInfo>) -> Result<(), RecoveryError> {
    let json = serde_json::to_string_pretty(grants)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let command = Command::parse(std::env::args().skip(1))?;
    let config = RecoveryConfig::from_env()?;
    let network: Network = env_or("NETWORK", "sepolia").parse()?;

    let mut store = WalletStore::new(config.fees);
    load_wallets(Path::new(&env_or("WALLETS_FILE", "wallets.json")), &mut store)?;

    if let Command::Backup(path) = &command {
        let backups = store
            .wallets()
            .iter()
            .map(WalletBackup::from_wallet)
            .collect::<Result<Vec<_>, _>>()?;
        WalletBackup::write_all(&backups, path)?;
        tracing::warn!(path = %path.display(), wallets = backups.len(), "cleartext key backup written");
        return Ok(());
    }

    let nonces = match config.delegation.nonce_store_path() {
        Some(path) => NonceStore::open(path)?,
        None => NonceStore::in_memory(),
    };
    let authority = DelegationAuthority::new(nonces);
    let delegations_path = PathBuf::from(env_or("DELEGATIONS_FILE", "delegations.json"));
    let mut grants = load_delegations(&delegations_path)?;

    if let Command::Revoke = command {
        for wallet in store.wallets() {
            let Some(grant) = grants.get(&wallet.id).filter(|g| g.delegated) else {
                continue;
            };
            let revoked = authority.revoke(wallet, grant)?;
            if let Some(calldata) = revoked.revocation_calldata() {
                tracing::info!(
                    wallet_id = %wallet.id,
                    contract = %revoked.batch_contract_address,
                    calldata = %calldata,
                    "revokeDelegation calldata"
                );
            }
            grants.insert(wallet.id.clone(), revoked);
        }
        save_delegations(&delegations_path, &grants)?;
        return Ok(());
    }

    let sponsor_key = std::env::var("SPONSOR_PRIVATE_KEY")
        .map(WalletSecret::new)
        .ok()
        .filter(|key| !key.is_empty())
        .ok_or(RecoveryError::NoSponsorWallet)?;
    let sponsor = sponsor_key.signer()?;

    let resolved = config.for_network(network)?;
    let unsigned = prepare_grants(
        &authority,
        store.wallets(),
        network,
        resolved.batch_contract,
        &mut grants,
    )?;
    if !unsigned.is_empty() {
        tracing::warn!(wallets = unsigned.len(), "wallets left without a delegation");
    }
    save_delegations(&delegations_path, &grants)?;

    let network_wallets: Vec<WalletConfig> = store
        .wallets()
        .iter()
        .filter(|w| w.network == network)
        .cloned()
        .collect();
    let prepared = build_batch(&network_wallets, &grants, store.fees())?;
    if prepared.operations.is_empty() {
        return Err(RecoveryError::NoReadyWallets.into());
    }

    let client = Arc::new(EvmClient::connect(&resolved, sponsor, &config.execution).await?);
    let executor = BatchExecutor::new(Arc::clone(&client), ExecutorSettings::from(&config.execution));
    let estimate = executor.estimate_gas(&prepared.operations).await?;
    executor.sponsor_covers(&estimate).await?;

    if let Command::Estimate = command {
        tracing::info!(
            operations = prepared.operations.len(),
            excluded = prepared.excluded.len(),
            total_gas = estimate.total_gas,
            total_fee = %estimate.total_fee,
            symbol = network.native_symbol(),
            "estimate only, nothing submitted"
        );
        return Ok(());
    }

    let sig_down = SigDown::try_new()?;
    let cancel = sig_down.cancellation_token();
    let total = prepared.operations.len();
    let results = executor
        .execute_batch(
            &prepared.operations,
            |index, result| {
                tracing::info!(
                    progress = %format!("{}/{}", index + 1, total),
                    wallet_id = %result.wallet_id,
                    status = ?result.status,
                    "operation finished"
                );
            },
            Some(&cancel),
        )
        .await?;

    let distributor = Distributor::new(Arc::clone(&client), *store.fees());
    distributor
        .distribute_successful(&network_wallets, &results)
        .await;

    let mut log = ExecutionLog::new();
    log.append(results);
    let log_path = env_or("EXECUTION_LOG_FILE", "execution-log.json");
    log.write_json(&log_path)?;
    tracing::info!(path = %log_path, entries = log.len(), "execution log written");

    Ok(())
}
