// src/engine.rs
use crate::{
    Asset, Balance, BalanceGuard, ClerkType, EntryDraft, LedgerEntry, LedgerStep, OperationType,
    Transaction, TransactionStatus, WalletError, WalletStore,
};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Caller-supplied details for a monetary operation. Amounts are magnitudes
/// in minor units; direction comes from the operation, not the request.
#[derive(Debug, Clone, Default)]
pub struct OperationRequest {
    pub amount: u64,
    pub fee: u64,
    pub reason: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl OperationRequest {
    pub fn new(amount: u64, fee: u64) -> Self {
        Self {
            amount,
            fee,
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Bounded retry for failures that may clear on their own (lost races on the
/// append key, store timeouts). Business-rule failures are never retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
        }
    }
}

/// Orchestrates the fund/charge/reverse lifecycle over a [`WalletStore`].
/// Every write travels through exactly one [`LedgerStep`], so the journal row
/// and its ledger entry always commit together.
#[derive(Clone)]
pub struct WalletEngine {
    store: Arc<dyn WalletStore>,
    retry: RetryPolicy,
}

impl WalletEngine {
    pub fn new(store: Arc<dyn WalletStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &dyn WalletStore {
        self.store.as_ref()
    }

    pub async fn create_asset(
        &self,
        owner: impl Into<String>,
        symbol: impl Into<String>,
    ) -> Result<Asset, WalletError> {
        self.store.create_asset(Asset::new(owner, symbol)).await
    }

    pub async fn asset_by_owner_symbol(
        &self,
        owner: &str,
        symbol: &str,
    ) -> Result<Asset, WalletError> {
        self.store.asset_by_owner_symbol(owner, symbol).await
    }

    /// Initiation phase of a credit: record the intent, count the funds as
    /// pending. Nothing becomes spendable until [`Self::settle_fund`].
    pub async fn fund_asset(
        &self,
        asset_id: Uuid,
        request: OperationRequest,
    ) -> Result<LedgerEntry, WalletError> {
        let asset = self.store.asset(asset_id).await?;
        let OperationRequest {
            amount,
            fee,
            reason,
            description,
            metadata,
        } = request;

        let transaction = Transaction::new(
            &asset,
            ClerkType::Credit,
            OperationType::WalletFund,
            amount,
            fee,
            reason,
            description,
            metadata,
        );

        let step = LedgerStep {
            asset_id: asset.id,
            record: Some(transaction.clone()),
            transition: None,
            entry: EntryDraft {
                clerk_type: ClerkType::Credit,
                entry_type: OperationType::WalletFund,
                transaction_id: transaction.id,
                pending_delta: amount as i64,
                available_delta: 0,
            },
            guard: BalanceGuard::None,
        };

        self.submit("fund_asset", amount, step).await
    }

    /// Completion phase of a fund: promote the pending credit to available
    /// and close the transaction as Successful, in one atomic unit.
    pub async fn settle_fund(&self, transaction_id: Uuid) -> Result<LedgerEntry, WalletError> {
        let transaction = self
            .pending_transaction(transaction_id, OperationType::WalletFund)
            .await?;

        let step = LedgerStep {
            asset_id: transaction.asset_id,
            record: None,
            transition: Some((transaction.id, TransactionStatus::Successful)),
            entry: EntryDraft {
                clerk_type: transaction.clerk_type,
                entry_type: transaction.op_type.clone(),
                transaction_id: transaction.id,
                pending_delta: 0,
                available_delta: transaction.amount as i64,
            },
            guard: BalanceGuard::None,
        };

        self.submit("settle_fund", transaction.amount, step).await
    }

    /// Initiation phase of a debit. The available balance is checked here as
    /// a fast pre-flight and again inside the store's critical section; a
    /// rejected charge writes neither a journal row nor a ledger entry.
    pub async fn charge_asset(
        &self,
        asset_id: Uuid,
        request: OperationRequest,
    ) -> Result<LedgerEntry, WalletError> {
        let asset = self.store.asset(asset_id).await?;
        if !asset.withdrawals_active() {
            return Err(WalletError::InvalidState(format!(
                "withdrawals are suspended for asset {}",
                asset.id
            )));
        }

        let balance = match self.store.latest_entry(asset.id).await? {
            Some(entry) => Balance::from_entry(&entry),
            None => Balance::zero(asset.id),
        };
        if balance.available < request.amount as i64 {
            return Err(WalletError::InsufficientBalance {
                requested: request.amount,
                available: balance.available,
            });
        }

        let OperationRequest {
            amount,
            fee,
            reason,
            description,
            metadata,
        } = request;

        let transaction = Transaction::new(
            &asset,
            ClerkType::Debit,
            OperationType::Withdrawal,
            amount,
            fee,
            reason,
            description,
            metadata,
        );

        let step = LedgerStep {
            asset_id: asset.id,
            record: Some(transaction.clone()),
            transition: None,
            entry: EntryDraft {
                clerk_type: ClerkType::Debit,
                entry_type: OperationType::Withdrawal,
                transaction_id: transaction.id,
                pending_delta: 0,
                available_delta: -(amount as i64),
            },
            guard: BalanceGuard::AvailableAtLeast(amount),
        };

        self.submit("charge_asset", amount, step).await
    }

    /// Completion phase of a charge: clear the settled withdrawal from the
    /// pending bucket and close the transaction as Successful.
    pub async fn settle_charge(&self, transaction_id: Uuid) -> Result<LedgerEntry, WalletError> {
        let transaction = self
            .pending_transaction(transaction_id, OperationType::Withdrawal)
            .await?;

        let step = LedgerStep {
            asset_id: transaction.asset_id,
            record: None,
            transition: Some((transaction.id, TransactionStatus::Successful)),
            entry: EntryDraft {
                clerk_type: transaction.clerk_type,
                entry_type: transaction.op_type.clone(),
                transaction_id: transaction.id,
                pending_delta: -(transaction.amount as i64),
                available_delta: 0,
            },
            guard: BalanceGuard::None,
        };

        self.submit("settle_charge", transaction.amount, step).await
    }

    /// Compensating credit for a previously recorded withdrawal. Appends a
    /// fresh transaction and entry; the original transaction keeps its status.
    pub async fn reverse_charge(
        &self,
        original_transaction_id: Uuid,
        request: OperationRequest,
    ) -> Result<LedgerEntry, WalletError> {
        let original = self.store.transaction(original_transaction_id).await?;
        if original.op_type != OperationType::Withdrawal {
            return Err(WalletError::InvalidState(format!(
                "transaction {} is {}, only withdrawals can be reversed",
                original.id,
                original.op_type.as_str()
            )));
        }

        let asset = self.store.asset(original.asset_id).await?;
        let OperationRequest {
            amount,
            fee,
            reason,
            description,
            metadata,
        } = request;

        let reversal = Transaction::new(
            &asset,
            ClerkType::Credit,
            OperationType::WithdrawalReversal,
            amount,
            fee,
            reason,
            description,
            metadata,
        );

        let step = LedgerStep {
            asset_id: asset.id,
            record: Some(reversal.clone()),
            transition: None,
            entry: EntryDraft {
                clerk_type: ClerkType::Credit,
                entry_type: OperationType::WithdrawalReversal,
                transaction_id: reversal.id,
                pending_delta: 0,
                available_delta: amount as i64,
            },
            guard: BalanceGuard::None,
        };

        self.submit("reverse_charge", amount, step).await
    }

    /// Latest ledger snapshot for the asset; zeros when it has no history.
    pub async fn fetch_balance(&self, asset_id: Uuid) -> Result<Balance, WalletError> {
        let asset = self.store.asset(asset_id).await?;
        Ok(match self.store.latest_entry(asset.id).await? {
            Some(entry) => Balance::from_entry(&entry),
            None => Balance::zero(asset.id),
        })
    }

    /// Settlement failure path of the state machine: Pending -> Failed. The
    /// ledger is untouched; the provisional entry from initiation stands as
    /// recorded history.
    pub async fn fail_transaction(&self, transaction_id: Uuid) -> Result<Transaction, WalletError> {
        let failed = self.store.fail_transaction(transaction_id).await?;
        counter!(
            "wallet.transactions.failed",
            "op" => failed.op_type.as_str().to_string()
        )
        .increment(1);
        Ok(failed)
    }

    async fn pending_transaction(
        &self,
        transaction_id: Uuid,
        expected: OperationType,
    ) -> Result<Transaction, WalletError> {
        let transaction = self.store.transaction(transaction_id).await?;
        if transaction.op_type != expected {
            return Err(WalletError::InvalidState(format!(
                "transaction {} is {}, expected {}",
                transaction.id,
                transaction.op_type.as_str(),
                expected.as_str()
            )));
        }
        // Advisory — the store re-checks the transition inside the commit
        if transaction.status.is_terminal() {
            return Err(WalletError::InvalidState(format!(
                "transaction {} is already {}",
                transaction.id,
                transaction.status.as_str()
            )));
        }
        Ok(transaction)
    }

    async fn submit(
        &self,
        op: &'static str,
        amount: u64,
        step: LedgerStep,
    ) -> Result<LedgerEntry, WalletError> {
        let mut delay = self.retry.base_delay;
        let mut attempt = 1u32;

        let result = loop {
            match self.store.commit_step(&step).await {
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    warn!(%err, op, attempt, "wallet step failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                other => break other,
            }
        };

        counter!(
            "wallet.operations.total",
            "op" => op,
            "status" => if result.is_ok() { "success" } else { "failed" }
        )
        .increment(1);

        if let Ok(entry) = &result {
            histogram!("wallet.operation.amount", "op" => op).record(amount as f64);
            debug!(
                op,
                asset = %entry.asset_id,
                sequence = entry.sequence,
                "ledger entry appended"
            );
        }

        result
    }
}
