//! Post-execution token distribution.
//!
//! After a wallet's operation succeeds, the recovered ERC-20 balance is split: the service fee goes
//! to the fee collector, the rest to the wallet's receiver. Both transfers are signed by the
//! recovered wallet itself and run one after the other.

use alloy::primitives::{Address, B256, U256};
use std::sync::Arc;

use crate::amount;
use crate::chain::{TokenTransferClient, TransactionOutcome};
use crate::error::RecoveryError;
use crate::executor::BatchResult;
use crate::fee::{FeeConfig, apply_ratio};
use crate::wallet::WalletConfig;

/// What to transfer for one wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionPlan {
    pub token: Address,
    pub total: U256,
    /// Collector and amount, when a fee is due.
    pub fee: Option<(Address, U256)>,
    pub receiver: Address,
    pub net: U256,
}

impl DistributionPlan {
    /// Plan for `wallet`, or `None` when there is no token or nothing to distribute.
    ///
    /// The total is the transfer amount when one was entered, otherwise the claim value.
    pub fn for_wallet(wallet: &WalletConfig, fees: &FeeConfig) -> Result<Option<Self>, RecoveryError> {
        let raw_total = if wallet.transfer_amount.trim().is_empty() {
            &wallet.claim_value
        } else {
            &wallet.transfer_amount
        };
        let total = amount::parse(raw_total)?;
        let Some(token) = wallet.token_contract()? else {
            return Ok(None);
        };
        if total.is_zero() {
            return Ok(None);
        }
        let receiver = wallet.receiver_address()?;

        let fee = match (fees.enabled, fees.fee_collector) {
            (true, Some(collector)) => Some((collector, apply_ratio(total, fees.numerator()))),
            _ => None,
        };
        let fee_amount = fee.map(|(_, amount)| amount).unwrap_or(U256::ZERO);

        Ok(Some(Self {
            token,
            total,
            fee,
            receiver,
            net: total.saturating_sub(fee_amount),
        }))
    }
}

/// Transfers made for one wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionReport {
    pub fee_tx: Option<B256>,
    pub net_tx: Option<B256>,
}

/// Result of distributing for one wallet of a batch.
#[derive(Debug)]
pub struct WalletDistribution {
    pub wallet_id: String,
    pub result: Result<DistributionReport, RecoveryError>,
}

pub struct Distributor<T> {
    client: Arc<T>,
    fees: FeeConfig,
}

impl<T: TokenTransferClient> Distributor<T> {
    pub fn new(client: Arc<T>, fees: FeeConfig) -> Self {
        Self { client, fees }
    }

    /// Splits the recovered balance of `wallet`. The net transfer is not attempted if the fee
    /// transfer fails.
    pub async fn distribute(&self, wallet: &WalletConfig) -> Result<DistributionReport, RecoveryError> {
        let Some(plan) = DistributionPlan::for_wallet(wallet, &self.fees)? else {
            tracing::debug!(wallet_id = %wallet.id, "nothing to distribute");
            return Ok(DistributionReport::default());
        };
        let owner = wallet.private_key.signer()?;
        let mut report = DistributionReport::default();

        if let Some((collector, fee)) = plan.fee.filter(|(_, fee)| !fee.is_zero()) {
            let outcome = self.transfer(&owner, plan.token, collector, fee).await?;
            tracing::info!(
                wallet = %owner.address(),
                collector = %collector,
                amount = %fee,
                tx_hash = %outcome.tx_hash,
                "service fee transferred"
            );
            report.fee_tx = Some(outcome.tx_hash);
        }

        if !plan.net.is_zero() {
            let outcome = self.transfer(&owner, plan.token, plan.receiver, plan.net).await?;
            tracing::info!(
                wallet = %owner.address(),
                receiver = %plan.receiver,
                amount = %plan.net,
                tx_hash = %outcome.tx_hash,
                "recovered tokens transferred"
            );
            report.net_tx = Some(outcome.tx_hash);
        }

        Ok(report)
    }

    async fn transfer(
        &self,
        owner: &alloy::signers::local::PrivateKeySigner,
        token: Address,
        to: Address,
        amount: U256,
    ) -> Result<TransactionOutcome, RecoveryError> {
        let outcome = self
            .client
            .transfer_token(owner, token, to, amount)
            .await
            .map_err(|e| RecoveryError::DistributionFailure(e.to_string()))?;
        if !outcome.success {
            return Err(RecoveryError::DistributionFailure(format!(
                "token transfer to {to} reverted in {}",
                outcome.tx_hash
            )));
        }
        Ok(outcome)
    }

    /// Distributes for every wallet whose result is a success, in result order. A failure is
    /// logged and recorded for that wallet only.
    pub async fn distribute_successful(
        &self,
        wallets: &[WalletConfig],
        results: &[BatchResult],
    ) -> Vec<WalletDistribution> {
        let mut distributions = Vec::new();
        for result in results.iter().filter(|r| r.is_success()) {
            let Some(wallet) = wallets.iter().find(|w| w.id == result.wallet_id) else {
                continue;
            };
            let outcome = self.distribute(wallet).await;
            if let Err(e) = &outcome {
                tracing::error!(wallet_id = %wallet.id, error = %e, "token distribution failed");
            }
            distributions.push(WalletDistribution {
                wallet_id: wallet.id.clone(),
                result: outcome,
            });
        }
        distributions
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::executor::BatchStatus;
    use crate::timestamp::UnixTimestamp;
    use crate::wallet::tests::{TEST_ADDRESS, both_wallet};
    use alloy::primitives::address;
    use alloy::signers::local::PrivateKeySigner;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    const COLLECTOR: Address = address!("FEEFEEFEEFEEFEEFEEFEEFEEFEEFEEFEEFEEFEE0");
    const RECEIVER: Address = address!("CCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC");
    const TOKEN: Address = address!("BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB");

    #[derive(Default)]
    pub(crate) struct MockTokens {
        pub failing_recipients: HashSet<Address>,
        pub transfers: Mutex<Vec<(Address, Address, Address, U256)>>,
    }

    #[async_trait]
    impl TokenTransferClient for MockTokens {
        async fn transfer_token(
            &self,
            owner: &PrivateKeySigner,
            token: Address,
            to: Address,
            amount: U256,
        ) -> Result<TransactionOutcome, RecoveryError> {
            if self.failing_recipients.contains(&to) {
                return Err(RecoveryError::Rpc("insufficient funds for gas".to_string()));
            }
            let mut transfers = self.transfers.lock().unwrap();
            transfers.push((owner.address(), token, to, amount));
            Ok(TransactionOutcome {
                tx_hash: B256::with_last_byte(transfers.len() as u8),
                success: true,
                gas_used: 50_000,
                effective_gas_price: 1,
            })
        }
    }

    fn fees_with_collector() -> FeeConfig {
        FeeConfig {
            enabled: true,
            fee_percentage: 0.2,
            fee_collector: Some(COLLECTOR),
        }
    }

    fn success(wallet_id: &str) -> BatchResult {
        BatchResult {
            wallet_id: wallet_id.to_string(),
            wallet_address: TEST_ADDRESS,
            status: BatchStatus::Success,
            tx_hash: Some(B256::ZERO),
            error: None,
            timestamp: UnixTimestamp(0),
            gas_used: None,
            fee_paid: None,
        }
    }

    #[test]
    fn test_plan_prefers_transfer_amount() {
        let mut wallet = both_wallet();
        wallet.transfer_amount = "5000".to_string();
        let plan = DistributionPlan::for_wallet(&wallet, &fees_with_collector())
            .unwrap()
            .unwrap();
        assert_eq!(plan.total, U256::from(5000));
        assert_eq!(plan.fee, Some((COLLECTOR, U256::from(1000))));
        assert_eq!(plan.net, U256::from(4000));
        assert_eq!(plan.receiver, RECEIVER);
    }

    #[test]
    fn test_plan_falls_back_to_claim_value() {
        let mut wallet = both_wallet();
        wallet.transfer_amount = String::new();
        let plan = DistributionPlan::for_wallet(&wallet, &fees_with_collector())
            .unwrap()
            .unwrap();
        assert_eq!(plan.total, U256::from(1000));
        assert_eq!(plan.net, U256::from(800));
    }

    #[test]
    fn test_nothing_to_plan() {
        // transferAmount "0" is entered, so it wins over claimValue
        assert_eq!(
            DistributionPlan::for_wallet(&both_wallet(), &fees_with_collector()).unwrap(),
            None
        );

        let mut no_token = both_wallet();
        no_token.transfer_amount = String::new();
        no_token.token_contract = String::new();
        assert_eq!(
            DistributionPlan::for_wallet(&no_token, &fees_with_collector()).unwrap(),
            None
        );
    }

    #[test]
    fn test_plan_without_collector_sends_everything() {
        let mut wallet = both_wallet();
        wallet.transfer_amount = "5000".to_string();
        let fees = FeeConfig {
            fee_collector: None,
            ..fees_with_collector()
        };
        let plan = DistributionPlan::for_wallet(&wallet, &fees).unwrap().unwrap();
        assert_eq!(plan.fee, None);
        assert_eq!(plan.net, U256::from(5000));
    }

    #[tokio::test]
    async fn test_fee_then_net_from_recovered_wallet() {
        let client = Arc::new(MockTokens::default());
        let distributor = Distributor::new(Arc::clone(&client), fees_with_collector());
        let mut wallet = both_wallet();
        wallet.transfer_amount = "5000".to_string();

        let report = distributor.distribute(&wallet).await.unwrap();
        assert!(report.fee_tx.is_some());
        assert!(report.net_tx.is_some());

        let transfers = client.transfers.lock().unwrap();
        assert_eq!(
            *transfers,
            vec![
                (TEST_ADDRESS, TOKEN, COLLECTOR, U256::from(1000)),
                (TEST_ADDRESS, TOKEN, RECEIVER, U256::from(4000)),
            ]
        );
    }

    #[tokio::test]
    async fn test_fee_failure_skips_net_transfer() {
        let client = Arc::new(MockTokens {
            failing_recipients: HashSet::from([COLLECTOR]),
            ..Default::default()
        });
        let distributor = Distributor::new(Arc::clone(&client), fees_with_collector());
        let mut wallet = both_wallet();
        wallet.transfer_amount = "5000".to_string();

        assert!(matches!(
            distributor.distribute(&wallet).await,
            Err(RecoveryError::DistributionFailure(_))
        ));
        assert!(client.transfers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_successful_wallets_are_distributed() {
        let client = Arc::new(MockTokens {
            failing_recipients: HashSet::from([address!("DDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDD")]),
            ..Default::default()
        });
        let distributor = Distributor::new(Arc::clone(&client), fees_with_collector());

        let mut first = both_wallet();
        first.transfer_amount = "1000".to_string();
        let mut broken = first.clone();
        broken.id = "wallet-2".to_string();
        broken.receiver_address = "0xDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDD".to_string();
        let mut skipped = first.clone();
        skipped.id = "wallet-3".to_string();

        let mut failed = success("wallet-3");
        failed.status = BatchStatus::Error;
        let results = vec![success("wallet-1"), success("wallet-2"), failed];

        let distributions = distributor
            .distribute_successful(&[first, broken, skipped], &results)
            .await;
        assert_eq!(distributions.len(), 2);
        assert!(distributions[0].result.is_ok());
        assert_eq!(distributions[1].wallet_id, "wallet-2");
        assert!(matches!(
            distributions[1].result,
            Err(RecoveryError::DistributionFailure(_))
        ));
        // wallet-1 fee + net, wallet-2 fee only
        assert_eq!(client.transfers.lock().unwrap().len(), 3);
    }
}
