// src/entry.rs
use crate::{ClerkType, OperationType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One immutable row of the append-only ledger. `sequence` is per-asset and
/// strictly monotonic; the entry with the highest sequence carries the
/// authoritative balances. Corrections append, they never edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub sequence: i64,
    pub clerk_type: ClerkType,
    pub entry_type: OperationType,
    pub transaction_id: Uuid,
    pub pending_balance: i64,
    pub pending_delta: i64,
    pub available_balance: i64,
    pub available_delta: i64,
    pub created_at: DateTime<Utc>,
}

/// Deltas-only payload for one append. Balance snapshots and the sequence
/// number are assigned by the store inside the per-asset critical section,
/// never by the caller.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub clerk_type: ClerkType,
    pub entry_type: OperationType,
    pub transaction_id: Uuid,
    pub pending_delta: i64,
    pub available_delta: i64,
}

impl LedgerEntry {
    /// Chain a draft onto the previous entry. The first entry of an asset
    /// starts from zero balances and sequence 1.
    pub(crate) fn materialize(
        asset_id: Uuid,
        prev: Option<&LedgerEntry>,
        draft: &EntryDraft,
    ) -> Self {
        let (prev_sequence, prev_pending, prev_available) = match prev {
            Some(entry) => (entry.sequence, entry.pending_balance, entry.available_balance),
            None => (0, 0, 0),
        };

        Self {
            id: Uuid::now_v7(),
            asset_id,
            sequence: prev_sequence + 1,
            clerk_type: draft.clerk_type,
            entry_type: draft.entry_type.clone(),
            transaction_id: draft.transaction_id,
            pending_balance: prev_pending + draft.pending_delta,
            pending_delta: draft.pending_delta,
            available_balance: prev_available + draft.available_delta,
            available_delta: draft.available_delta,
            created_at: Utc::now(),
        }
    }
}
