use crate::{
    ActivityStatus, Asset, BalanceGuard, ClerkType, LedgerEntry, LedgerStep, OperationType,
    Transaction, TransactionStatus, WalletError, WalletStore,
};
use sqlx::Row;
use uuid::Uuid;

/// Durable store over Postgres. Three tables, append-mostly: `wallet_assets`
/// (withdrawal_activity is mutable), `wallet_transactions` (status + updated_at
/// are mutable), `wallet_ledger_entries` (never updated).
///
/// The asset row is the per-asset lock: every `commit_step` takes it
/// `FOR UPDATE` before reading the latest entry, so two steps against the same
/// asset serialize while other assets proceed.
pub struct PostgresStore {
    pool: sqlx::PgPool,
}

impl PostgresStore {
    pub fn from_pool(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Create the wallet tables. Call once at startup, before the first
    /// operation; nothing else runs schema setup implicitly.
    pub async fn init_schema(&self) -> Result<(), WalletError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_assets (
                id UUID PRIMARY KEY,
                owner TEXT NOT NULL,
                symbol TEXT NOT NULL,
                withdrawal_activity TEXT NOT NULL CHECK (withdrawal_activity IN ('active', 'suspended')),
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                UNIQUE (owner, symbol)
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_transactions (
                id UUID PRIMARY KEY,
                owner TEXT NOT NULL,
                asset_id UUID NOT NULL REFERENCES wallet_assets(id),
                symbol TEXT NOT NULL,
                amount BIGINT NOT NULL CHECK (amount >= 0),
                fee BIGINT NOT NULL CHECK (fee >= 0),
                total_amount BIGINT NOT NULL,
                clerk_type TEXT NOT NULL CHECK (clerk_type IN ('credit', 'debit')),
                op_type TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('pending', 'successful', 'failed')),
                reason TEXT,
                description TEXT,
                metadata JSONB,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_wallet_transactions_asset
            ON wallet_transactions(asset_id)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_ledger_entries (
                id UUID PRIMARY KEY,
                asset_id UUID NOT NULL REFERENCES wallet_assets(id),
                sequence BIGINT NOT NULL,
                clerk_type TEXT NOT NULL CHECK (clerk_type IN ('credit', 'debit')),
                entry_type TEXT NOT NULL,
                transaction_id UUID NOT NULL REFERENCES wallet_transactions(id),
                pending_balance BIGINT NOT NULL,
                pending_delta BIGINT NOT NULL,
                available_balance BIGINT NOT NULL,
                available_delta BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE (asset_id, sequence)
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_wallet_ledger_entries_transaction
            ON wallet_ledger_entries(transaction_id)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn latest_entry_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        asset_id: Uuid,
    ) -> Result<Option<LedgerEntry>, WalletError> {
        let row = sqlx::query(
            r#"
            SELECT id, asset_id, sequence, clerk_type, entry_type, transaction_id,
                   pending_balance, pending_delta, available_balance, available_delta, created_at
            FROM wallet_ledger_entries
            WHERE asset_id = $1
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .bind(asset_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        row.map(|row| entry_from_row(&row)).transpose()
    }

    async fn insert_transaction_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        transaction: &Transaction,
    ) -> Result<(), WalletError> {
        sqlx::query(
            r#"
            INSERT INTO wallet_transactions
                (id, owner, asset_id, symbol, amount, fee, total_amount,
                 clerk_type, op_type, status, reason, description, metadata,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(transaction.id)
        .bind(&transaction.owner)
        .bind(transaction.asset_id)
        .bind(&transaction.symbol)
        .bind(transaction.amount as i64)
        .bind(transaction.fee as i64)
        .bind(transaction.total_amount as i64)
        .bind(transaction.clerk_type.as_str())
        .bind(transaction.op_type.as_str())
        .bind(transaction.status.as_str())
        .bind(&transaction.reason)
        .bind(&transaction.description)
        .bind(&transaction.metadata)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn insert_entry_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        entry: &LedgerEntry,
    ) -> Result<(), WalletError> {
        sqlx::query(
            r#"
            INSERT INTO wallet_ledger_entries
                (id, asset_id, sequence, clerk_type, entry_type, transaction_id,
                 pending_balance, pending_delta, available_balance, available_delta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id)
        .bind(entry.asset_id)
        .bind(entry.sequence)
        .bind(entry.clerk_type.as_str())
        .bind(entry.entry_type.as_str())
        .bind(entry.transaction_id)
        .bind(entry.pending_balance)
        .bind(entry.pending_delta)
        .bind(entry.available_balance)
        .bind(entry.available_delta)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl WalletStore for PostgresStore {
    async fn commit_step(&self, step: &LedgerStep) -> Result<LedgerEntry, WalletError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // The asset row is the per-asset critical section
        let locked = sqlx::query("SELECT id FROM wallet_assets WHERE id = $1 FOR UPDATE")
            .bind(step.asset_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        if locked.is_none() {
            tx.rollback().await.ok();
            return Err(WalletError::AssetNotFound(step.asset_id.to_string()));
        }

        let prev = self.latest_entry_in_tx(&mut tx, step.asset_id).await?;

        // Checked inside the row lock — this is the double-spend guard
        if let BalanceGuard::AvailableAtLeast(required) = step.guard {
            let available = prev.as_ref().map(|e| e.available_balance).unwrap_or(0);
            if available < required as i64 {
                tx.rollback().await.ok();
                return Err(WalletError::InsufficientBalance {
                    requested: required,
                    available,
                });
            }
        }

        if let Some(record) = &step.record {
            self.insert_transaction_in_tx(&mut tx, record).await?;
        }

        if let Some((transaction_id, status)) = &step.transition {
            let row =
                sqlx::query("SELECT status FROM wallet_transactions WHERE id = $1 FOR UPDATE")
                    .bind(transaction_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(map_sqlx_err)?
                    .ok_or(WalletError::TransactionNotFound(*transaction_id))?;

            let current: String = row.try_get("status").map_err(storage_err)?;
            if current != TransactionStatus::Pending.as_str() {
                tx.rollback().await.ok();
                return Err(WalletError::InvalidState(format!(
                    "transaction {} is already {}",
                    transaction_id, current
                )));
            }

            sqlx::query(
                "UPDATE wallet_transactions SET status = $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(transaction_id)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        let entry = LedgerEntry::materialize(step.asset_id, prev.as_ref(), &step.entry);
        self.insert_entry_in_tx(&mut tx, &entry).await?;

        tx.commit().await.map_err(map_sqlx_err)?;

        Ok(entry)
    }

    async fn fail_transaction(&self, id: Uuid) -> Result<Transaction, WalletError> {
        let row = sqlx::query(
            r#"
            UPDATE wallet_transactions
            SET status = 'failed', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING id, owner, asset_id, symbol, amount, fee, total_amount,
                      clerk_type, op_type, status, reason, description, metadata,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match row {
            Some(row) => transaction_from_row(&row),
            None => {
                // Either the row is missing or it is already terminal
                let current: Option<String> =
                    sqlx::query_scalar("SELECT status FROM wallet_transactions WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(map_sqlx_err)?;

                match current {
                    Some(status) => Err(WalletError::InvalidState(format!(
                        "transaction {} is already {}",
                        id, status
                    ))),
                    None => Err(WalletError::TransactionNotFound(id)),
                }
            }
        }
    }

    async fn create_asset(&self, asset: Asset) -> Result<Asset, WalletError> {
        sqlx::query(
            r#"
            INSERT INTO wallet_assets (id, owner, symbol, withdrawal_activity, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(asset.id)
        .bind(&asset.owner)
        .bind(&asset.symbol)
        .bind(asset.withdrawal_activity.as_str())
        .bind(asset.created_at)
        .bind(asset.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                WalletError::DuplicateAsset {
                    owner: asset.owner.clone(),
                    symbol: asset.symbol.clone(),
                }
            }
            _ => map_sqlx_err(err),
        })?;

        Ok(asset)
    }

    async fn asset(&self, id: Uuid) -> Result<Asset, WalletError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, symbol, withdrawal_activity, created_at, updated_at
            FROM wallet_assets
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| WalletError::AssetNotFound(id.to_string()))?;

        asset_from_row(&row)
    }

    async fn asset_by_owner_symbol(
        &self,
        owner: &str,
        symbol: &str,
    ) -> Result<Asset, WalletError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, symbol, withdrawal_activity, created_at, updated_at
            FROM wallet_assets
            WHERE owner = $1 AND symbol = $2
            "#,
        )
        .bind(owner)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| WalletError::AssetNotFound(format!("{}/{}", owner, symbol)))?;

        asset_from_row(&row)
    }

    async fn set_withdrawal_activity(
        &self,
        id: Uuid,
        status: ActivityStatus,
    ) -> Result<Asset, WalletError> {
        let row = sqlx::query(
            r#"
            UPDATE wallet_assets
            SET withdrawal_activity = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, owner, symbol, withdrawal_activity, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| WalletError::AssetNotFound(id.to_string()))?;

        asset_from_row(&row)
    }

    async fn transaction(&self, id: Uuid) -> Result<Transaction, WalletError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, asset_id, symbol, amount, fee, total_amount,
                   clerk_type, op_type, status, reason, description, metadata,
                   created_at, updated_at
            FROM wallet_transactions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(WalletError::TransactionNotFound(id))?;

        transaction_from_row(&row)
    }

    async fn transactions_for_asset(
        &self,
        asset_id: Uuid,
    ) -> Result<Vec<Transaction>, WalletError> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, asset_id, symbol, amount, fee, total_amount,
                   clerk_type, op_type, status, reason, description, metadata,
                   created_at, updated_at
            FROM wallet_transactions
            WHERE asset_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn latest_entry(&self, asset_id: Uuid) -> Result<Option<LedgerEntry>, WalletError> {
        let row = sqlx::query(
            r#"
            SELECT id, asset_id, sequence, clerk_type, entry_type, transaction_id,
                   pending_balance, pending_delta, available_balance, available_delta, created_at
            FROM wallet_ledger_entries
            WHERE asset_id = $1
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(|row| entry_from_row(&row)).transpose()
    }

    async fn entries_for_asset(&self, asset_id: Uuid) -> Result<Vec<LedgerEntry>, WalletError> {
        let rows = sqlx::query(
            r#"
            SELECT id, asset_id, sequence, clerk_type, entry_type, transaction_id,
                   pending_balance, pending_delta, available_balance, available_delta, created_at
            FROM wallet_ledger_entries
            WHERE asset_id = $1
            ORDER BY sequence
            "#,
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.iter().map(entry_from_row).collect()
    }
}

/// Serialization failures are conflicts the caller may retry; unique-key races
/// on the append path surface the same way. Everything else is a store fault.
fn map_sqlx_err(err: sqlx::Error) -> WalletError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("40001") | Some("23505") => WalletError::Conflict(db.message().to_string()),
            _ => WalletError::Storage(db.message().to_string()),
        },
        _ => WalletError::Storage(err.to_string()),
    }
}

fn storage_err(err: sqlx::Error) -> WalletError {
    WalletError::Storage(err.to_string())
}

fn asset_from_row(row: &sqlx::postgres::PgRow) -> Result<Asset, WalletError> {
    let activity: String = row.try_get("withdrawal_activity").map_err(storage_err)?;

    Ok(Asset {
        id: row.try_get("id").map_err(storage_err)?,
        owner: row.try_get("owner").map_err(storage_err)?,
        symbol: row.try_get("symbol").map_err(storage_err)?,
        withdrawal_activity: ActivityStatus::parse(&activity).ok_or_else(|| {
            WalletError::Storage(format!("unknown withdrawal activity: {}", activity))
        })?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        updated_at: row.try_get("updated_at").map_err(storage_err)?,
    })
}

fn transaction_from_row(row: &sqlx::postgres::PgRow) -> Result<Transaction, WalletError> {
    let clerk_type: String = row.try_get("clerk_type").map_err(storage_err)?;
    let op_type: String = row.try_get("op_type").map_err(storage_err)?;
    let status: String = row.try_get("status").map_err(storage_err)?;

    Ok(Transaction {
        id: row.try_get("id").map_err(storage_err)?,
        owner: row.try_get("owner").map_err(storage_err)?,
        asset_id: row.try_get("asset_id").map_err(storage_err)?,
        symbol: row.try_get("symbol").map_err(storage_err)?,
        amount: row.try_get::<i64, _>("amount").map_err(storage_err)? as u64,
        fee: row.try_get::<i64, _>("fee").map_err(storage_err)? as u64,
        total_amount: row.try_get::<i64, _>("total_amount").map_err(storage_err)? as u64,
        clerk_type: ClerkType::parse(&clerk_type)
            .ok_or_else(|| WalletError::Storage(format!("unknown clerk type: {}", clerk_type)))?,
        op_type: OperationType::from_name(&op_type),
        status: TransactionStatus::parse(&status)
            .ok_or_else(|| WalletError::Storage(format!("unknown status: {}", status)))?,
        reason: row.try_get("reason").map_err(storage_err)?,
        description: row.try_get("description").map_err(storage_err)?,
        metadata: row.try_get("metadata").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        updated_at: row.try_get("updated_at").map_err(storage_err)?,
    })
}

fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<LedgerEntry, WalletError> {
    let clerk_type: String = row.try_get("clerk_type").map_err(storage_err)?;
    let entry_type: String = row.try_get("entry_type").map_err(storage_err)?;

    Ok(LedgerEntry {
        id: row.try_get("id").map_err(storage_err)?,
        asset_id: row.try_get("asset_id").map_err(storage_err)?,
        sequence: row.try_get("sequence").map_err(storage_err)?,
        clerk_type: ClerkType::parse(&clerk_type)
            .ok_or_else(|| WalletError::Storage(format!("unknown clerk type: {}", clerk_type)))?,
        entry_type: OperationType::from_name(&entry_type),
        transaction_id: row.try_get("transaction_id").map_err(storage_err)?,
        pending_balance: row.try_get("pending_balance").map_err(storage_err)?,
        pending_delta: row.try_get("pending_delta").map_err(storage_err)?,
        available_balance: row.try_get("available_balance").map_err(storage_err)?,
        available_delta: row.try_get("available_delta").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}
