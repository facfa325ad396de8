//! Transactional wallet ledger core.
//!
//! Records movements of virtual currencies as double-entry postings over
//! a relational store: an immutable journal plus a consistent cached
//! balance per account, serialized writers, and at-most-once effect per
//! caller-supplied reference.

pub mod account;
pub mod adapters;
pub mod amount;
pub mod asset;
pub mod balance;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod journal;
pub mod transaction;
pub mod wallet;

pub use account::{Account, AccountKind, LockedAccount, SystemRole};
pub use asset::AssetType;
pub use balance::BalanceSnapshot;
pub use config::StoreConfig;
pub use error::WalletError;
pub use journal::{AuditReport, HistoryEntry, HistoryPage, HistoryQuery, JournalEntry};
pub use transaction::{Movement, Receipt, Transaction, TransactionCategory};
pub use wallet::{MovementRequest, Wallet};

use async_trait::async_trait;
use uuid::Uuid;

/// Storage seam of the ledger core. Every mutating operation is atomic
/// end-to-end inside the implementation: the Postgres store runs it in
/// one serializable transaction (with transparent retry on transient
/// conflicts), the in-memory store under one process-wide lock.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Register an asset type. Idempotent on code.
    async fn create_asset_type(&self, asset: AssetType) -> Result<(), WalletError>;

    async fn find_asset_type(&self, code: &str) -> Result<AssetType, WalletError>;

    /// Create an account together with its zeroed balance-cache row.
    async fn create_account(&self, account: Account) -> Result<(), WalletError>;

    async fn find_account(&self, id: Uuid) -> Result<Account, WalletError>;

    /// Execute one validated movement: idempotency lookup, canonical-order
    /// account locking, double-entry posting, response capture.
    async fn execute_movement(&self, movement: &Movement) -> Result<Receipt, WalletError>;

    /// Current cached balance of an active account.
    async fn balance(&self, account_id: Uuid) -> Result<BalanceSnapshot, WalletError>;

    /// Most recent journal entries for an account, newest first.
    async fn history(
        &self,
        account_id: Uuid,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, WalletError>;

    /// Recompute the balance from the journal and compare it against the
    /// cache.
    async fn audit(&self, account_id: Uuid) -> Result<AuditReport, WalletError>;

    /// Drop expired captured responses. Returns the number removed.
    async fn purge_expired_responses(&self) -> Result<u64, WalletError>;
}
