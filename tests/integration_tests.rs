// tests/integration_tests.rs
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;
use wallet_ledger::adapters::MemoryStore;
use wallet_ledger::{
    ActivityStatus, Asset, LedgerEntry, LedgerStep, OperationRequest, OperationType, RetryPolicy,
    Transaction, TransactionStatus, WalletEngine, WalletError, WalletStore, WalletSystem,
};

fn setup() -> (WalletSystem, WalletEngine) {
    let system = WalletSystem::new(Box::new(MemoryStore::new()));
    let engine = system.engine();
    (system, engine)
}

/// Create an asset and settle an initial fund so `available` is spendable.
async fn funded_asset(engine: &WalletEngine, amount: u64) -> Uuid {
    let asset = engine.create_asset("user-1", "USD").await.unwrap();
    let entry = engine
        .fund_asset(asset.id, OperationRequest::new(amount, 0))
        .await
        .unwrap();
    engine.settle_fund(entry.transaction_id).await.unwrap();
    asset.id
}

#[tokio::test]
async fn test_fund_and_settle_lifecycle() {
    let (_system, engine) = setup();
    let asset = engine.create_asset("user-1", "USD").await.unwrap();

    let initiated = engine
        .fund_asset(asset.id, OperationRequest::new(100, 5))
        .await
        .unwrap();

    assert_eq!(initiated.sequence, 1);
    assert_eq!(initiated.pending_balance, 100);
    assert_eq!(initiated.pending_delta, 100);
    assert_eq!(initiated.available_balance, 0);
    assert_eq!(initiated.available_delta, 0);

    let settled = engine.settle_fund(initiated.transaction_id).await.unwrap();

    assert_eq!(settled.sequence, 2);
    assert_eq!(settled.available_balance, 100);
    assert_eq!(settled.available_delta, 100);
    assert_eq!(settled.pending_balance, 100);
    assert_eq!(settled.pending_delta, 0);

    let balance = engine.fetch_balance(asset.id).await.unwrap();
    assert_eq!(balance.pending, 100);
    assert_eq!(balance.available, 100);

    let transaction = engine
        .store()
        .transaction(initiated.transaction_id)
        .await
        .unwrap();
    assert_eq!(transaction.status, TransactionStatus::Successful);
    assert_eq!(transaction.total_amount, 105);
}

#[tokio::test]
async fn test_charge_spends_available_balance() {
    let (_system, engine) = setup();
    let asset_id = funded_asset(&engine, 100).await;

    let entry = engine
        .charge_asset(asset_id, OperationRequest::new(40, 0))
        .await
        .unwrap();

    assert_eq!(entry.available_balance, 60);
    assert_eq!(entry.available_delta, -40);
    assert_eq!(entry.pending_delta, 0);

    let result = engine
        .charge_asset(asset_id, OperationRequest::new(80, 0))
        .await;

    assert!(matches!(
        result,
        Err(WalletError::InsufficientBalance {
            requested: 80,
            available: 60
        })
    ));
}

#[tokio::test]
async fn test_rejected_charge_writes_nothing() {
    let (_system, engine) = setup();
    let asset = engine.create_asset("user-1", "USD").await.unwrap();

    let result = engine
        .charge_asset(asset.id, OperationRequest::new(10, 0))
        .await;
    assert!(matches!(
        result,
        Err(WalletError::InsufficientBalance { .. })
    ));

    let entries = engine.store().entries_for_asset(asset.id).await.unwrap();
    let transactions = engine
        .store()
        .transactions_for_asset(asset.id)
        .await
        .unwrap();
    assert!(entries.is_empty());
    assert!(transactions.is_empty());
}

#[tokio::test]
async fn test_balance_equals_cumulative_deltas() {
    let (_system, engine) = setup();
    let asset_id = funded_asset(&engine, 200).await;

    let charge = engine
        .charge_asset(asset_id, OperationRequest::new(50, 2))
        .await
        .unwrap();
    engine.settle_charge(charge.transaction_id).await.unwrap();
    engine
        .fund_asset(asset_id, OperationRequest::new(30, 0))
        .await
        .unwrap();

    let entries = engine.store().entries_for_asset(asset_id).await.unwrap();
    let pending_sum: i64 = entries.iter().map(|e| e.pending_delta).sum();
    let available_sum: i64 = entries.iter().map(|e| e.available_delta).sum();

    let balance = engine.fetch_balance(asset_id).await.unwrap();
    assert_eq!(balance.pending, pending_sum);
    assert_eq!(balance.available, available_sum);

    // Every snapshot chains from its predecessor
    for pair in entries.windows(2) {
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        assert_eq!(
            pair[1].pending_balance,
            pair[0].pending_balance + pair[1].pending_delta
        );
        assert_eq!(
            pair[1].available_balance,
            pair[0].available_balance + pair[1].available_delta
        );
    }
}

#[tokio::test]
async fn test_settle_fund_twice_is_rejected() {
    let (_system, engine) = setup();
    let asset = engine.create_asset("user-1", "USD").await.unwrap();

    let entry = engine
        .fund_asset(asset.id, OperationRequest::new(100, 0))
        .await
        .unwrap();
    engine.settle_fund(entry.transaction_id).await.unwrap();

    let result = engine.settle_fund(entry.transaction_id).await;
    assert!(matches!(result, Err(WalletError::InvalidState(_))));

    // No duplicate settlement entry was appended
    let entries = engine.store().entries_for_asset(asset.id).await.unwrap();
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn test_settle_charge_requires_withdrawal_transaction() {
    let (_system, engine) = setup();
    let asset = engine.create_asset("user-1", "USD").await.unwrap();

    let fund = engine
        .fund_asset(asset.id, OperationRequest::new(100, 0))
        .await
        .unwrap();

    let result = engine.settle_charge(fund.transaction_id).await;
    assert!(matches!(result, Err(WalletError::InvalidState(_))));
}

#[tokio::test]
async fn test_concurrent_charges_cannot_jointly_overdraw() {
    let (_system, engine) = setup();
    let asset_id = funded_asset(&engine, 100).await;

    let engine1 = engine.clone();
    let engine2 = engine.clone();

    let handle1 = tokio::spawn(async move {
        engine1
            .charge_asset(asset_id, OperationRequest::new(70, 0))
            .await
    });
    let handle2 = tokio::spawn(async move {
        engine2
            .charge_asset(asset_id, OperationRequest::new(70, 0))
            .await
    });

    let (result1, result2) = tokio::join!(handle1, handle2);
    let result1 = result1.unwrap();
    let result2 = result2.unwrap();

    // Either charge may win the race — assert exactly one of each outcome
    let outcomes = [&result1, &result2];
    let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
    let rejected = outcomes
        .iter()
        .filter(|r| matches!(r, Err(WalletError::InsufficientBalance { .. })))
        .count();

    assert_eq!(succeeded, 1, "exactly one charge should succeed");
    assert_eq!(rejected, 1, "exactly one charge should be rejected");

    let balance = engine.fetch_balance(asset_id).await.unwrap();
    assert_eq!(balance.available, 30);
}

#[tokio::test]
async fn test_concurrent_funds_keep_sequence_gapless() {
    let (_system, engine) = setup();
    let asset = engine.create_asset("user-1", "USD").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let asset_id = asset.id;
        handles.push(tokio::spawn(async move {
            engine
                .fund_asset(asset_id, OperationRequest::new(10, 0))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let entries = engine.store().entries_for_asset(asset.id).await.unwrap();
    let sequences: Vec<i64> = entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=8).collect::<Vec<i64>>());

    let last = entries.last().unwrap();
    assert_eq!(last.pending_balance, 80);
}

#[tokio::test]
async fn test_reverse_charge_requires_withdrawal() {
    let (_system, engine) = setup();
    let asset = engine.create_asset("user-1", "USD").await.unwrap();

    let fund = engine
        .fund_asset(asset.id, OperationRequest::new(100, 0))
        .await
        .unwrap();

    let result = engine
        .reverse_charge(fund.transaction_id, OperationRequest::new(100, 0))
        .await;
    assert!(matches!(result, Err(WalletError::InvalidState(_))));
}

#[tokio::test]
async fn test_reverse_charge_credits_available_and_leaves_original() {
    let (_system, engine) = setup();
    let asset_id = funded_asset(&engine, 100).await;

    let charge = engine
        .charge_asset(asset_id, OperationRequest::new(40, 0))
        .await
        .unwrap();
    engine.settle_charge(charge.transaction_id).await.unwrap();

    let reversal = engine
        .reverse_charge(
            charge.transaction_id,
            OperationRequest::new(40, 0).with_reason("merchant refund"),
        )
        .await
        .unwrap();

    assert_eq!(reversal.entry_type, OperationType::WithdrawalReversal);
    assert_eq!(reversal.available_delta, 40);

    let balance = engine.fetch_balance(asset_id).await.unwrap();
    assert_eq!(balance.available, 100);

    let original = engine
        .store()
        .transaction(charge.transaction_id)
        .await
        .unwrap();
    assert_eq!(original.status, TransactionStatus::Successful);

    let recorded = engine
        .store()
        .transaction(reversal.transaction_id)
        .await
        .unwrap();
    assert_eq!(recorded.op_type, OperationType::WithdrawalReversal);
    assert_eq!(recorded.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_charge_settlement_debits_pending_bucket() {
    let (_system, engine) = setup();
    let asset_id = funded_asset(&engine, 100).await;

    let charge = engine
        .charge_asset(asset_id, OperationRequest::new(40, 0))
        .await
        .unwrap();
    let settled = engine.settle_charge(charge.transaction_id).await.unwrap();

    assert_eq!(settled.pending_balance, 60);
    assert_eq!(settled.pending_delta, -40);
    assert_eq!(settled.available_balance, 60);
    assert_eq!(settled.available_delta, 0);

    let balance = engine.fetch_balance(asset_id).await.unwrap();
    assert_eq!(balance.pending, 60);
    assert_eq!(balance.available, 60);
}

#[tokio::test]
async fn test_suspended_asset_rejects_charges() {
    let (_system, engine) = setup();
    let asset_id = funded_asset(&engine, 100).await;

    engine
        .store()
        .set_withdrawal_activity(asset_id, ActivityStatus::Suspended)
        .await
        .unwrap();

    let result = engine
        .charge_asset(asset_id, OperationRequest::new(10, 0))
        .await;
    assert!(matches!(result, Err(WalletError::InvalidState(_))));

    // Funding is not withdrawal activity and stays open
    engine
        .fund_asset(asset_id, OperationRequest::new(10, 0))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_transaction_is_terminal() {
    let (_system, engine) = setup();
    let asset = engine.create_asset("user-1", "USD").await.unwrap();

    let entry = engine
        .fund_asset(asset.id, OperationRequest::new(100, 0))
        .await
        .unwrap();

    let failed = engine.fail_transaction(entry.transaction_id).await.unwrap();
    assert_eq!(failed.status, TransactionStatus::Failed);

    let settle = engine.settle_fund(entry.transaction_id).await;
    assert!(matches!(settle, Err(WalletError::InvalidState(_))));

    let fail_again = engine.fail_transaction(entry.transaction_id).await;
    assert!(matches!(fail_again, Err(WalletError::InvalidState(_))));
}

#[tokio::test]
async fn test_duplicate_asset_is_rejected() {
    let (_system, engine) = setup();
    engine.create_asset("user-1", "USD").await.unwrap();

    let duplicate = engine.create_asset("user-1", "USD").await;
    assert!(matches!(duplicate, Err(WalletError::DuplicateAsset { .. })));

    // Same symbol under another owner is a different asset
    engine.create_asset("user-2", "USD").await.unwrap();

    let found = engine.asset_by_owner_symbol("user-1", "USD").await.unwrap();
    assert_eq!(found.owner, "user-1");
}

#[tokio::test]
async fn test_fetch_balance_unknown_asset_is_not_found() {
    let (_system, engine) = setup();

    let result = engine.fetch_balance(Uuid::now_v7()).await;
    assert!(matches!(result, Err(WalletError::AssetNotFound(_))));
}

#[tokio::test]
async fn test_fetch_balance_zero_for_fresh_asset() {
    let (_system, engine) = setup();
    let asset = engine.create_asset("user-1", "USD").await.unwrap();

    let balance = engine.fetch_balance(asset.id).await.unwrap();
    assert_eq!(balance.pending, 0);
    assert_eq!(balance.available, 0);
}

#[tokio::test]
async fn test_distinct_assets_do_not_interfere() {
    let (_system, engine) = setup();
    let usd = funded_asset(&engine, 100).await;

    let ngn = engine.create_asset("user-1", "NGN").await.unwrap();
    let entry = engine
        .fund_asset(ngn.id, OperationRequest::new(500, 0))
        .await
        .unwrap();
    engine.settle_fund(entry.transaction_id).await.unwrap();

    engine
        .charge_asset(usd, OperationRequest::new(60, 0))
        .await
        .unwrap();

    let usd_balance = engine.fetch_balance(usd).await.unwrap();
    let ngn_balance = engine.fetch_balance(ngn.id).await.unwrap();
    assert_eq!(usd_balance.available, 40);
    assert_eq!(ngn_balance.available, 500);
    assert_eq!(ngn_balance.pending, 500);
}

// ── Retry behavior ────────────────────────────────────────────────────────

/// Wraps the memory store and fails `commit_step` with a queued error per
/// call until the queue drains, then behaves normally.
struct FlakyStore {
    inner: MemoryStore,
    failures: Mutex<Vec<WalletError>>,
}

impl FlakyStore {
    fn new(failures: Vec<WalletError>) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures: Mutex::new(failures),
        }
    }
}

#[async_trait::async_trait]
impl WalletStore for FlakyStore {
    async fn commit_step(&self, step: &LedgerStep) -> Result<LedgerEntry, WalletError> {
        if let Some(err) = self.failures.lock().unwrap().pop() {
            return Err(err);
        }
        self.inner.commit_step(step).await
    }

    async fn fail_transaction(&self, id: Uuid) -> Result<Transaction, WalletError> {
        self.inner.fail_transaction(id).await
    }

    async fn create_asset(&self, asset: Asset) -> Result<Asset, WalletError> {
        self.inner.create_asset(asset).await
    }

    async fn asset(&self, id: Uuid) -> Result<Asset, WalletError> {
        self.inner.asset(id).await
    }

    async fn asset_by_owner_symbol(
        &self,
        owner: &str,
        symbol: &str,
    ) -> Result<Asset, WalletError> {
        self.inner.asset_by_owner_symbol(owner, symbol).await
    }

    async fn set_withdrawal_activity(
        &self,
        id: Uuid,
        status: ActivityStatus,
    ) -> Result<Asset, WalletError> {
        self.inner.set_withdrawal_activity(id, status).await
    }

    async fn transaction(&self, id: Uuid) -> Result<Transaction, WalletError> {
        self.inner.transaction(id).await
    }

    async fn transactions_for_asset(
        &self,
        asset_id: Uuid,
    ) -> Result<Vec<Transaction>, WalletError> {
        self.inner.transactions_for_asset(asset_id).await
    }

    async fn latest_entry(&self, asset_id: Uuid) -> Result<Option<LedgerEntry>, WalletError> {
        self.inner.latest_entry(asset_id).await
    }

    async fn entries_for_asset(&self, asset_id: Uuid) -> Result<Vec<LedgerEntry>, WalletError> {
        self.inner.entries_for_asset(asset_id).await
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn test_transient_store_failure_is_retried() {
    let store = FlakyStore::new(vec![WalletError::Storage("connection reset".into())]);
    let system = WalletSystem::new(Box::new(store));
    let engine = system.engine().with_retry_policy(fast_retry());

    let asset = engine.create_asset("user-1", "USD").await.unwrap();
    let entry = engine
        .fund_asset(asset.id, OperationRequest::new(100, 0))
        .await
        .unwrap();

    assert_eq!(entry.pending_balance, 100);
}

#[tokio::test]
async fn test_conflict_surfaces_after_bounded_retries() {
    let store = FlakyStore::new(vec![
        WalletError::Conflict("sequence taken".into()),
        WalletError::Conflict("sequence taken".into()),
        WalletError::Conflict("sequence taken".into()),
    ]);
    let system = WalletSystem::new(Box::new(store));
    let engine = system.engine().with_retry_policy(fast_retry());

    let asset = engine.create_asset("user-1", "USD").await.unwrap();
    let result = engine
        .fund_asset(asset.id, OperationRequest::new(100, 0))
        .await;

    assert!(matches!(result, Err(WalletError::Conflict(_))));

    // Nothing was appended across the failed attempts
    let entries = engine.store().entries_for_asset(asset.id).await.unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_business_rule_failures_are_not_retried() {
    let store = FlakyStore::new(Vec::new());
    let system = WalletSystem::new(Box::new(store));
    let engine = system.engine().with_retry_policy(fast_retry());

    let asset = engine.create_asset("user-1", "USD").await.unwrap();
    let result = engine
        .charge_asset(asset.id, OperationRequest::new(10, 0))
        .await;

    // Fails immediately at the pre-flight, before any commit attempt
    assert!(matches!(
        result,
        Err(WalletError::InsufficientBalance { .. })
    ));
}
