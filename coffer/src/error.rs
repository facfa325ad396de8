// coffer/src/error.rs
use std::fmt;

use uuid::Uuid;

#[derive(Debug)]
pub enum WalletError {
    Validation { field: &'static str, reason: String },
    AccountNotFound(Uuid),
    AssetNotFound(String),
    AssetMismatch,
    InsufficientBalance,
    DuplicateReference(String),
    Configuration(String),
    Unavailable(String),
    Conflict(String),
    Storage(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
            Self::AccountNotFound(id) => write!(f, "Account not found: {}", id),
            Self::AssetNotFound(code) => write!(f, "Asset type not found: {}", code),
            Self::AssetMismatch => write!(f, "Accounts disagree on asset type"),
            Self::InsufficientBalance => write!(f, "Insufficient balance"),
            Self::DuplicateReference(reference) => {
                write!(f, "Duplicate reference: {}", reference)
            }
            Self::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            Self::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
            Self::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

impl WalletError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}
