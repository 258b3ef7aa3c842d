// src/lib.rs
pub mod adapters;
pub mod asset;
pub mod balance;
pub mod engine;
pub mod entry;
pub mod error;
pub mod transaction;

pub use asset::{ActivityStatus, Asset};
pub use balance::Balance;
pub use engine::{OperationRequest, RetryPolicy, WalletEngine};
pub use entry::{EntryDraft, LedgerEntry};
pub use error::WalletError;
pub use transaction::{ClerkType, OperationType, Transaction, TransactionStatus};

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Precondition enforced inside the store's critical section, against the
/// re-read latest entry — never against a balance the caller saw earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceGuard {
    None,
    AvailableAtLeast(u64),
}

/// One atomic unit of wallet work: at most one new journal row, at most one
/// status transition, and exactly one ledger append. All of it lands or none
/// of it does.
#[derive(Debug, Clone)]
pub struct LedgerStep {
    pub asset_id: Uuid,
    pub record: Option<Transaction>,
    pub transition: Option<(Uuid, TransactionStatus)>,
    pub entry: EntryDraft,
    pub guard: BalanceGuard,
}

/// Storage seam for the wallet core.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Commit one ledger step atomically.
    /// Implementors MUST:
    /// 1. Enter the asset's critical section (row lock or equivalent)
    /// 2. Re-read the latest ledger entry for the asset
    /// 3. Enforce `step.guard` — return InsufficientBalance with nothing written
    /// 4. Insert `step.record`; apply `step.transition`, failing InvalidState
    ///    if the transaction is already terminal
    /// 5. Append the entry with snapshots and sequence chained from the re-read
    /// 6. Commit on success, roll back everything on any error
    ///
    /// Steps against distinct assets must not block each other.
    async fn commit_step(&self, step: &LedgerStep) -> Result<LedgerEntry, WalletError>;

    /// Move a pending transaction to Failed without touching the ledger.
    async fn fail_transaction(&self, id: Uuid) -> Result<Transaction, WalletError>;

    // ASSET REGISTRY
    async fn create_asset(&self, asset: Asset) -> Result<Asset, WalletError>;
    async fn asset(&self, id: Uuid) -> Result<Asset, WalletError>;
    async fn asset_by_owner_symbol(
        &self,
        owner: &str,
        symbol: &str,
    ) -> Result<Asset, WalletError>;
    async fn set_withdrawal_activity(
        &self,
        id: Uuid,
        status: ActivityStatus,
    ) -> Result<Asset, WalletError>;

    // JOURNAL READS
    async fn transaction(&self, id: Uuid) -> Result<Transaction, WalletError>;
    async fn transactions_for_asset(&self, asset_id: Uuid)
    -> Result<Vec<Transaction>, WalletError>;

    // LEDGER READS
    async fn latest_entry(&self, asset_id: Uuid) -> Result<Option<LedgerEntry>, WalletError>;
    async fn entries_for_asset(&self, asset_id: Uuid) -> Result<Vec<LedgerEntry>, WalletError>;
}

/// Composition root. Construct once at startup with a concrete store and hand
/// engines out from it; nothing in the crate initializes itself implicitly.
pub struct WalletSystem {
    store: Arc<dyn WalletStore>,
}

impl WalletSystem {
    pub fn new(store: Box<dyn WalletStore>) -> Self {
        Self {
            store: store.into(),
        }
    }

    pub fn store(&self) -> &dyn WalletStore {
        self.store.as_ref()
    }

    pub fn store_arc(&self) -> Arc<dyn WalletStore> {
        Arc::clone(&self.store)
    }

    pub fn engine(&self) -> WalletEngine {
        WalletEngine::new(self.store_arc())
    }
}
