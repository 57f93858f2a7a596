//! Sequential batch executor.
//!
//! All operations of a batch are paid for by one sponsor account, so they are submitted strictly
//! one after another with a fixed pause in between. Each operation produces exactly one
//! [`BatchResult`]; a failing operation is recorded and the batch moves on.

use alloy::primitives::{Address, B256, U256};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::batch::BatchOperation;
use crate::chain::{SponsorClient, TransactionOutcome};
use crate::config::ExecutionConfig;
use crate::error::RecoveryError;
use crate::timestamp::UnixTimestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Success,
    Error,
}

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub wallet_id: String,
    pub wallet_address: Address,
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: UnixTimestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    /// Gas fee paid by the sponsor, in Wei.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_paid: Option<U256>,
}

impl BatchResult {
    fn pending(operation: &BatchOperation) -> Self {
        Self {
            wallet_id: operation.wallet_id.clone(),
            wallet_address: operation.wallet_address,
            status: BatchStatus::Pending,
            tx_hash: None,
            error: None,
            timestamp: UnixTimestamp::try_now().unwrap_or_default(),
            gas_used: None,
            fee_paid: None,
        }
    }

    fn mined(operation: &BatchOperation, outcome: &TransactionOutcome) -> Self {
        let (status, error) = if outcome.success {
            (BatchStatus::Success, None)
        } else {
            (BatchStatus::Error, Some("transaction reverted".to_string()))
        };
        Self {
            status,
            error,
            tx_hash: Some(outcome.tx_hash),
            gas_used: Some(outcome.gas_used),
            fee_paid: Some(outcome.fee_paid()),
            ..Self::pending(operation)
        }
    }

    fn failed(operation: &BatchOperation, message: impl Into<String>) -> Self {
        Self {
            status: BatchStatus::Error,
            error: Some(message.into()),
            ..Self::pending(operation)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Success
    }
}

/// Gas estimate for a whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub total_gas: u64,
    pub max_fee_per_gas: u128,
    pub total_fee: U256,
    /// Operations whose estimate failed and were counted at the fallback gas amount.
    pub fallback_operations: usize,
}

/// Executor tuning, taken from `[execution]`.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub inter_operation_delay: Duration,
    pub fallback_gas_units: u64,
    pub default_gas_price_wei: u128,
    pub gas_limit_ceiling: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for ExecutorSettings {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            inter_operation_delay: config.inter_operation_delay(),
            fallback_gas_units: config.fallback_gas_units,
            default_gas_price_wei: config.default_gas_price_wei,
            gas_limit_ceiling: config.gas_limit_ceiling,
        }
    }
}

/// Clears the running flag when dropped.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs batches for one sponsor. Only one batch runs at a time.
pub struct BatchExecutor<C> {
    client: Arc<C>,
    settings: ExecutorSettings,
    running: AtomicBool,
}

impl<C: SponsorClient> BatchExecutor<C> {
    pub fn new(client: Arc<C>, settings: ExecutorSettings) -> Self {
        Self {
            client,
            settings,
            running: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn try_begin(&self) -> Result<RunGuard<'_>, RecoveryError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| RunGuard(&self.running))
            .map_err(|_| RecoveryError::BatchInProgress)
    }

    /// Estimates gas for every operation and prices the total at the current max fee per gas.
    ///
    /// An operation whose estimate fails is counted at the fallback gas amount instead of failing
    /// the whole estimate.
    pub async fn estimate_gas(&self, operations: &[BatchOperation]) -> Result<GasEstimate, RecoveryError> {
        if operations.is_empty() {
            return Err(RecoveryError::NoReadyWallets);
        }

        let mut total_gas: u64 = 0;
        let mut fallback_operations = 0;
        for operation in operations {
            let tx = operation.to_transaction(None);
            let gas = match self.client.estimate_gas(&tx).await {
                Ok(gas) => gas,
                Err(e) => {
                    tracing::warn!(
                        wallet = %operation.wallet_address,
                        error = %e,
                        fallback = self.settings.fallback_gas_units,
                        "gas estimation failed, using fallback"
                    );
                    fallback_operations += 1;
                    self.settings.fallback_gas_units
                }
            };
            total_gas = total_gas.saturating_add(gas);
        }

        let max_fee_per_gas = match self.client.max_fee_per_gas().await {
            Ok(Some(fee)) => fee,
            Ok(None) => self.settings.default_gas_price_wei,
            Err(e) => {
                tracing::warn!(error = %e, "fee data unavailable, using default gas price");
                self.settings.default_gas_price_wei
            }
        };
        let total_fee = U256::from(total_gas) * U256::from(max_fee_per_gas);

        tracing::info!(
            operations = operations.len(),
            total_gas,
            max_fee_per_gas,
            total_fee = %total_fee,
            fallback_operations,
            "batch gas estimated"
        );

        Ok(GasEstimate {
            total_gas,
            max_fee_per_gas,
            total_fee,
            fallback_operations,
        })
    }

    /// Whether the sponsor can pay for `estimate`. Logs a warning when it cannot.
    pub async fn sponsor_covers(&self, estimate: &GasEstimate) -> Result<bool, RecoveryError> {
        let balance = self.client.sponsor_balance().await?;
        let covers = balance >= estimate.total_fee;
        if !covers {
            tracing::warn!(
                sponsor = %self.client.sponsor_address(),
                balance = %balance,
                required = %estimate.total_fee,
                symbol = self.client.network().native_symbol(),
                "sponsor balance is below the estimated batch fee"
            );
        }
        Ok(covers)
    }

    /// Submits `operations` one at a time, in order, pausing before every operation but the first.
    ///
    /// `on_progress` is called once per operation, in order, as soon as its result is known. When
    /// `cancel` fires, operations not yet submitted are recorded as errors, so the returned list
    /// always matches `operations` one to one.
    pub async fn execute_batch<F>(
        &self,
        operations: &[BatchOperation],
        mut on_progress: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<BatchResult>, RecoveryError>
    where
        F: FnMut(usize, &BatchResult),
    {
        if operations.is_empty() {
            return Err(RecoveryError::NoReadyWallets);
        }
        let _guard = self.try_begin()?;

        tracing::info!(
            sponsor = %self.client.sponsor_address(),
            network = %self.client.network(),
            operations = operations.len(),
            "batch started"
        );

        let mut results = Vec::with_capacity(operations.len());
        for (index, operation) in operations.iter().enumerate() {
            if index > 0 && !is_cancelled(cancel) {
                self.pause(cancel).await;
            }
            let result = if is_cancelled(cancel) {
                BatchResult::failed(operation, "batch cancelled before submission")
            } else {
                self.execute_one(operation).await
            };
            on_progress(index, &result);
            results.push(result);
        }

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        tracing::info!(
            operations = results.len(),
            succeeded,
            failed = results.len() - succeeded,
            "batch finished"
        );
        Ok(results)
    }

    async fn pause(&self, cancel: Option<&CancellationToken>) {
        let delay = self.settings.inter_operation_delay;
        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }

    async fn execute_one(&self, operation: &BatchOperation) -> BatchResult {
        let tx = operation.to_transaction(Some(self.settings.gas_limit_ceiling));
        match self.client.send_transaction(tx).await {
            Ok(outcome) => {
                if outcome.success {
                    tracing::info!(
                        wallet = %operation.wallet_address,
                        tx_hash = %outcome.tx_hash,
                        gas_used = outcome.gas_used,
                        "operation succeeded"
                    );
                } else {
                    tracing::warn!(
                        wallet = %operation.wallet_address,
                        tx_hash = %outcome.tx_hash,
                        "operation reverted"
                    );
                }
                BatchResult::mined(operation, &outcome)
            }
            Err(e) => {
                tracing::warn!(wallet = %operation.wallet_address, error = %e, "operation failed");
                BatchResult::failed(operation, e.to_string())
            }
        }
    }
}

fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.is_some_and(|token| token.is_cancelled())
}

/// Append-only record of executed operations, cleared only on request.
#[derive(Debug, Default, Serialize)]
#[serde(transparent)]
pub struct ExecutionLog {
    entries: Vec<BatchResult>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, results: impl IntoIterator<Item = BatchResult>) {
        self.entries.extend(results);
    }

    pub fn entries(&self) -> &[BatchResult] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), RecoveryError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::batch::DelegationPayload;
    use crate::chain::MetaTransaction;
    use crate::contract::IDelegationBatchExecutor;
    use crate::network::Network;
    use crate::wallet::OperationType;
    use alloy::primitives::{Bytes, address};
    use alloy::sol_types::SolCall;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    const BATCH_CONTRACT: Address = address!("1111111111111111111111111111111111111111");

    pub(crate) fn operation(n: u8) -> BatchOperation {
        let wallet_address = Address::with_last_byte(n);
        BatchOperation {
            wallet_id: format!("wallet-{n}"),
            network: Network::Sepolia,
            operation_type: OperationType::Claim,
            wallet_address,
            delegatee_address: BATCH_CONTRACT,
            airdrop_contract: address!("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            token_contract: None,
            receiver_address: address!("CCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC"),
            claim_calldata: Bytes::from_static(&[0x4e, 0x71, 0xd9, 0x2d]),
            claim_value: U256::ZERO,
            transfer_amount: U256::ZERO,
            service_fee_amount: U256::ZERO,
            delegation: DelegationPayload {
                delegator: wallet_address,
                delegatee: BATCH_CONTRACT,
                authority: BATCH_CONTRACT,
                expiry: 0,
                nonce: 1,
                functions: vec![],
                signature: Bytes::new(),
            },
        }
    }

    /// Sponsor double keyed on the wallet address found in the calldata.
    #[derive(Default)]
    pub(crate) struct MockSponsor {
        pub send_errors: HashSet<Address>,
        pub reverts: HashSet<Address>,
        pub estimate_errors: HashSet<Address>,
        pub max_fee: Option<u128>,
        pub balance: U256,
        pub sent: Mutex<Vec<(Address, MetaTransaction, tokio::time::Instant)>>,
    }

    fn wallet_of(tx: &MetaTransaction) -> Address {
        IDelegationBatchExecutor::executeDelegatedOperationsCall::abi_decode(&tx.calldata)
            .map(|call| call.operations[0].walletAddress)
            .unwrap_or(Address::ZERO)
    }

    #[async_trait]
    impl SponsorClient for MockSponsor {
        fn sponsor_address(&self) -> Address {
            address!("5555555555555555555555555555555555555555")
        }

        fn network(&self) -> Network {
            Network::Sepolia
        }

        async fn estimate_gas(&self, tx: &MetaTransaction) -> Result<u64, RecoveryError> {
            if self.estimate_errors.contains(&wallet_of(tx)) {
                return Err(RecoveryError::EstimationFailure("execution reverted".to_string()));
            }
            Ok(100_000)
        }

        async fn max_fee_per_gas(&self) -> Result<Option<u128>, RecoveryError> {
            Ok(self.max_fee)
        }

        async fn sponsor_balance(&self) -> Result<U256, RecoveryError> {
            Ok(self.balance)
        }

        async fn send_transaction(&self, tx: MetaTransaction) -> Result<TransactionOutcome, RecoveryError> {
            let wallet = wallet_of(&tx);
            self.sent
                .lock()
                .unwrap()
                .push((wallet, tx, tokio::time::Instant::now()));
            if self.send_errors.contains(&wallet) {
                return Err(RecoveryError::TransactionFailure("connection reset".to_string()));
            }
            Ok(TransactionOutcome {
                tx_hash: B256::with_last_byte(wallet.0[19]),
                success: !self.reverts.contains(&wallet),
                gas_used: 90_000,
                effective_gas_price: 10,
            })
        }
    }

    fn executor(sponsor: MockSponsor) -> BatchExecutor<MockSponsor> {
        BatchExecutor::new(Arc::new(sponsor), ExecutorSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_abort_batch() {
        let executor = executor(MockSponsor {
            send_errors: HashSet::from([Address::with_last_byte(2)]),
            ..Default::default()
        });
        let operations = vec![operation(1), operation(2), operation(3)];

        let mut progress = Vec::new();
        let results = executor
            .execute_batch(&operations, |index, result| progress.push((index, result.status)), None)
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        let ids: Vec<_> = results.iter().map(|r| r.wallet_id.as_str()).collect();
        assert_eq!(ids, vec!["wallet-1", "wallet-2", "wallet-3"]);
        assert_eq!(results[0].status, BatchStatus::Success);
        assert_eq!(results[1].status, BatchStatus::Error);
        assert!(!results[1].error.as_deref().unwrap_or_default().is_empty());
        assert_eq!(results[2].status, BatchStatus::Success);
        assert_eq!(
            progress,
            vec![
                (0, BatchStatus::Success),
                (1, BatchStatus::Error),
                (2, BatchStatus::Success)
            ]
        );
        assert_eq!(executor.client.sent.lock().unwrap().len(), 3);
        assert!(!executor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_are_spaced_by_delay() {
        let executor = executor(MockSponsor::default());
        let operations = vec![operation(1), operation(2), operation(3)];
        let started = tokio::time::Instant::now();
        executor.execute_batch(&operations, |_, _| {}, None).await.unwrap();

        let sent = executor.client.sent.lock().unwrap();
        // no pause before the first operation
        assert!(sent[0].2 - started < Duration::from_secs(2));
        for pair in sent.windows(2) {
            assert!(pair[1].2 - pair[0].2 >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transaction_shape() {
        let executor = executor(MockSponsor::default());
        let mut op = operation(7);
        op.claim_value = U256::from(1000);
        executor.execute_batch(&[op], |_, _| {}, None).await.unwrap();

        let sent = executor.client.sent.lock().unwrap();
        let (wallet, tx, _) = &sent[0];
        assert_eq!(*wallet, Address::with_last_byte(7));
        assert_eq!(tx.to, BATCH_CONTRACT);
        assert_eq!(tx.value, U256::from(1000));
        assert_eq!(tx.gas_limit, Some(1_000_000));
    }

    #[tokio::test]
    async fn test_revert_recorded_as_error() {
        let executor = executor(MockSponsor {
            reverts: HashSet::from([Address::with_last_byte(1)]),
            ..Default::default()
        });
        let results = executor
            .execute_batch(&[operation(1)], |_, _| {}, None)
            .await
            .unwrap();
        assert_eq!(results[0].status, BatchStatus::Error);
        assert!(results[0].tx_hash.is_some());
        assert_eq!(results[0].gas_used, Some(90_000));
        assert_eq!(results[0].fee_paid, Some(U256::from(900_000)));
    }

    #[tokio::test]
    async fn test_estimate_uses_fallbacks() {
        let executor = executor(MockSponsor {
            estimate_errors: HashSet::from([Address::with_last_byte(2)]),
            max_fee: None,
            ..Default::default()
        });
        let estimate = executor
            .estimate_gas(&[operation(1), operation(2)])
            .await
            .unwrap();
        assert_eq!(estimate.total_gas, 100_000 + 300_000);
        assert_eq!(estimate.fallback_operations, 1);
        assert_eq!(estimate.max_fee_per_gas, 20_000_000_000);
        assert_eq!(
            estimate.total_fee,
            U256::from(400_000u64) * U256::from(20_000_000_000u64)
        );
    }

    #[tokio::test]
    async fn test_sponsor_balance_check() {
        let executor = executor(MockSponsor {
            max_fee: Some(1),
            balance: U256::from(150_000),
            ..Default::default()
        });
        let one = executor.estimate_gas(&[operation(1)]).await.unwrap();
        assert!(executor.sponsor_covers(&one).await.unwrap());
        let two = executor.estimate_gas(&[operation(1), operation(2)]).await.unwrap();
        assert!(!executor.sponsor_covers(&two).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let executor = executor(MockSponsor::default());
        assert!(matches!(
            executor.execute_batch(&[], |_, _| {}, None).await,
            Err(RecoveryError::NoReadyWallets)
        ));
        assert!(matches!(
            executor.estimate_gas(&[]).await,
            Err(RecoveryError::NoReadyWallets)
        ));
    }

    #[tokio::test]
    async fn test_single_batch_at_a_time() {
        let executor = executor(MockSponsor::default());
        let guard = executor.try_begin().unwrap();
        assert!(matches!(
            executor.execute_batch(&[operation(1)], |_, _| {}, None).await,
            Err(RecoveryError::BatchInProgress)
        ));
        drop(guard);
        assert!(executor.execute_batch(&[operation(1)], |_, _| {}, None).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_records_remaining_operations() {
        let executor = executor(MockSponsor::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let operations = vec![operation(1), operation(2), operation(3)];

        let results = executor
            .execute_batch(
                &operations,
                |index, _| {
                    if index == 0 {
                        trigger.cancel();
                    }
                },
                Some(&cancel),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, BatchStatus::Success);
        assert!(results[1..].iter().all(|r| r.status == BatchStatus::Error));
        assert!(results[2].error.as_deref().unwrap().contains("cancelled"));
        assert_eq!(executor.client.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_execution_log_append_and_clear() {
        let mut log = ExecutionLog::new();
        log.append(vec![BatchResult::failed(&operation(1), "boom")]);
        log.append(vec![BatchResult::pending(&operation(2))]);
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].error.as_deref(), Some("boom"));

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json[0]["status"], "error");
        assert_eq!(json[1]["status"], "pending");
        assert!(json[1].get("txHash").is_none());

        log.clear();
        assert!(log.is_empty());
    }
}
