// src/adapters/memory.rs
use crate::{
    ActivityStatus, Asset, BalanceGuard, LedgerEntry, LedgerStep, Transaction, TransactionStatus,
    WalletError, WalletStore,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    assets: HashMap<Uuid, Asset>,
    transactions: HashMap<Uuid, Transaction>,
    // Per-asset entries, kept in sequence order
    entries: HashMap<Uuid, Vec<LedgerEntry>>,
}

/// In-process store. One mutex per asset guards the read-validate-append
/// sequence, so steps against distinct assets do not block each other.
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    asset_locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            asset_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_for(&self, asset_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.asset_locks.lock().unwrap();
        Arc::clone(locks.entry(asset_id).or_default())
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn commit_step(&self, step: &LedgerStep) -> Result<LedgerEntry, WalletError> {
        let asset_lock = self.lock_for(step.asset_id);
        let _guard = asset_lock.lock().await;

        let mut tables = self.tables.lock().unwrap();

        if !tables.assets.contains_key(&step.asset_id) {
            return Err(WalletError::AssetNotFound(step.asset_id.to_string()));
        }

        let prev = tables
            .entries
            .get(&step.asset_id)
            .and_then(|entries| entries.last())
            .cloned();

        // Checked under the asset lock — this is the double-spend guard
        if let BalanceGuard::AvailableAtLeast(required) = step.guard {
            let available = prev.as_ref().map(|e| e.available_balance).unwrap_or(0);
            if available < required as i64 {
                return Err(WalletError::InsufficientBalance {
                    requested: required,
                    available,
                });
            }
        }

        if let Some((transaction_id, _)) = step.transition {
            let current = tables
                .transactions
                .get(&transaction_id)
                .ok_or(WalletError::TransactionNotFound(transaction_id))?;
            if current.status.is_terminal() {
                return Err(WalletError::InvalidState(format!(
                    "transaction {} is already {}",
                    transaction_id,
                    current.status.as_str()
                )));
            }
        }

        // All validations passed; nothing below fails, so the writes land as a unit
        if let Some(record) = &step.record {
            tables.transactions.insert(record.id, record.clone());
        }

        if let Some((transaction_id, status)) = step.transition {
            if let Some(transaction) = tables.transactions.get_mut(&transaction_id) {
                transaction.status = status;
                transaction.updated_at = Utc::now();
            }
        }

        let entry = LedgerEntry::materialize(step.asset_id, prev.as_ref(), &step.entry);
        tables
            .entries
            .entry(step.asset_id)
            .or_default()
            .push(entry.clone());

        Ok(entry)
    }

    async fn fail_transaction(&self, id: Uuid) -> Result<Transaction, WalletError> {
        let mut tables = self.tables.lock().unwrap();
        let transaction = tables
            .transactions
            .get_mut(&id)
            .ok_or(WalletError::TransactionNotFound(id))?;

        if transaction.status.is_terminal() {
            return Err(WalletError::InvalidState(format!(
                "transaction {} is already {}",
                id,
                transaction.status.as_str()
            )));
        }

        transaction.status = TransactionStatus::Failed;
        transaction.updated_at = Utc::now();
        Ok(transaction.clone())
    }

    async fn create_asset(&self, asset: Asset) -> Result<Asset, WalletError> {
        let mut tables = self.tables.lock().unwrap();

        let duplicate = tables
            .assets
            .values()
            .any(|existing| existing.owner == asset.owner && existing.symbol == asset.symbol);
        if duplicate {
            return Err(WalletError::DuplicateAsset {
                owner: asset.owner,
                symbol: asset.symbol,
            });
        }

        tables.assets.insert(asset.id, asset.clone());
        Ok(asset)
    }

    async fn asset(&self, id: Uuid) -> Result<Asset, WalletError> {
        let tables = self.tables.lock().unwrap();
        tables
            .assets
            .get(&id)
            .cloned()
            .ok_or_else(|| WalletError::AssetNotFound(id.to_string()))
    }

    async fn asset_by_owner_symbol(
        &self,
        owner: &str,
        symbol: &str,
    ) -> Result<Asset, WalletError> {
        let tables = self.tables.lock().unwrap();
        tables
            .assets
            .values()
            .find(|asset| asset.owner == owner && asset.symbol == symbol)
            .cloned()
            .ok_or_else(|| WalletError::AssetNotFound(format!("{}/{}", owner, symbol)))
    }

    async fn set_withdrawal_activity(
        &self,
        id: Uuid,
        status: ActivityStatus,
    ) -> Result<Asset, WalletError> {
        let mut tables = self.tables.lock().unwrap();
        let asset = tables
            .assets
            .get_mut(&id)
            .ok_or_else(|| WalletError::AssetNotFound(id.to_string()))?;

        asset.withdrawal_activity = status;
        asset.updated_at = Utc::now();
        Ok(asset.clone())
    }

    async fn transaction(&self, id: Uuid) -> Result<Transaction, WalletError> {
        let tables = self.tables.lock().unwrap();
        tables
            .transactions
            .get(&id)
            .cloned()
            .ok_or(WalletError::TransactionNotFound(id))
    }

    async fn transactions_for_asset(
        &self,
        asset_id: Uuid,
    ) -> Result<Vec<Transaction>, WalletError> {
        let tables = self.tables.lock().unwrap();
        let mut transactions: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|transaction| transaction.asset_id == asset_id)
            .cloned()
            .collect();

        // v7 ids are time-ordered, so this is creation order
        transactions.sort_by_key(|transaction| transaction.id);
        Ok(transactions)
    }

    async fn latest_entry(&self, asset_id: Uuid) -> Result<Option<LedgerEntry>, WalletError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .entries
            .get(&asset_id)
            .and_then(|entries| entries.last())
            .cloned())
    }

    async fn entries_for_asset(&self, asset_id: Uuid) -> Result<Vec<LedgerEntry>, WalletError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.entries.get(&asset_id).cloned().unwrap_or_default())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
