// src/transaction.rs
use crate::Asset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a money movement: a credit increases a bucket, a debit
/// decreases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClerkType {
    Credit,
    Debit,
}

impl ClerkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "credit" => Some(Self::Credit),
            "debit" => Some(Self::Debit),
            _ => None,
        }
    }
}

/// What kind of monetary operation a transaction (and its ledger entries)
/// belongs to. `Custom` is the extension point for operation types this crate
/// does not orchestrate itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    WalletFund,
    Withdrawal,
    WithdrawalReversal,
    Custom(String),
}

impl OperationType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::WalletFund => "wallet_fund",
            Self::Withdrawal => "withdrawal",
            Self::WithdrawalReversal => "withdrawal_reversal",
            Self::Custom(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "wallet_fund" => Self::WalletFund,
            "withdrawal" => Self::Withdrawal,
            "withdrawal_reversal" => Self::WithdrawalReversal,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Lifecycle of a journal row. `Pending` transitions exactly once, to either
/// terminal state; terminal rows never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Successful,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Successful => "successful",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "successful" => Some(Self::Successful),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub owner: String,
    pub asset_id: Uuid,
    pub symbol: String,
    pub amount: u64,
    pub fee: u64,
    pub total_amount: u64,
    pub clerk_type: ClerkType,
    pub op_type: OperationType,
    pub status: TransactionStatus,
    pub reason: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        asset: &Asset,
        clerk_type: ClerkType,
        op_type: OperationType,
        amount: u64,
        fee: u64,
        reason: Option<String>,
        description: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            owner: asset.owner.clone(),
            asset_id: asset.id,
            symbol: asset.symbol.clone(),
            amount,
            fee,
            total_amount: amount + fee,
            clerk_type,
            op_type,
            status: TransactionStatus::Pending,
            reason,
            description,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}
