// src/balance.rs
use crate::LedgerEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset_id: Uuid,
    pub pending: i64,
    pub available: i64,
    pub as_of: DateTime<Utc>,
}

impl Balance {
    /// An asset with no ledger history has zero balance, not an error.
    pub fn zero(asset_id: Uuid) -> Self {
        Self {
            asset_id,
            pending: 0,
            available: 0,
            as_of: Utc::now(),
        }
    }

    pub fn from_entry(entry: &LedgerEntry) -> Self {
        Self {
            asset_id: entry.asset_id,
            pending: entry.pending_balance,
            available: entry.available_balance,
            as_of: entry.created_at,
        }
    }
}
