// src/error.rs
use std::fmt;
use uuid::Uuid;

#[derive(Debug)]
pub enum WalletError {
    AssetNotFound(String),
    TransactionNotFound(Uuid),
    DuplicateAsset { owner: String, symbol: String },
    InsufficientBalance { requested: u64, available: i64 },
    InvalidState(String),
    Conflict(String),
    Storage(String),
}

impl WalletError {
    /// Conflicts and store outages may clear on a later attempt; every other
    /// kind is a business-rule failure and retrying it cannot succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Storage(_))
    }
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AssetNotFound(key) => write!(f, "Asset not found: {}", key),
            Self::TransactionNotFound(id) => write!(f, "Transaction not found: {}", id),
            Self::DuplicateAsset { owner, symbol } => {
                write!(f, "Asset already exists for owner {} and symbol {}", owner, symbol)
            }
            Self::InsufficientBalance {
                requested,
                available,
            } => {
                write!(
                    f,
                    "Insufficient balance: requested {}, available {}",
                    requested, available
                )
            }
            Self::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Self::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}
