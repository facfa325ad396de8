// coffer/src/adapters/postgres/mod.rs
mod flows;
mod posting;
mod query;
mod resolver;
mod session;

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::account::{Account, SystemRole};
use crate::asset::AssetType;
use crate::balance::BalanceSnapshot;
use crate::config::StoreConfig;
use crate::error::WalletError;
use crate::journal::{AuditReport, HistoryPage, HistoryQuery};
use crate::transaction::{Movement, Receipt};
use crate::WalletStore;

use self::session::{classify, RetryPolicy};

pub(crate) fn storage(err: impl std::fmt::Display) -> WalletError {
    WalletError::Storage(err.to_string())
}

/// PostgreSQL-backed wallet store.
///
/// Owns the connection pool, the only process-wide singleton: create it
/// once at startup with [`PostgresStore::connect`], drain it on shutdown
/// with [`PostgresStore::close`].
pub struct PostgresStore {
    pool: PgPool,
    retry: RetryPolicy,
    idempotency_ttl: Duration,
}

impl PostgresStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub async fn connect(config: &StoreConfig) -> Result<Self, WalletError> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .idle_timeout(config.idle_timeout)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.connection_url())
            .await
            .map_err(|e| WalletError::Unavailable(e.to_string()))?;

        Ok(Self {
            pool,
            retry: RetryPolicy {
                attempts: config.retry_attempts,
            },
            idempotency_ttl: config.idempotency_ttl,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn idempotency_ttl(&self) -> Duration {
        self.idempotency_ttl
    }

    /// Create the wallet schema. Every statement is idempotent and the
    /// whole set runs in one transaction.
    pub async fn init_schema(&self) -> Result<(), WalletError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_asset_types (
                id UUID PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_accounts (
                id UUID PRIMARY KEY,
                external_id TEXT UNIQUE,
                kind TEXT NOT NULL CHECK (kind IN ('SYSTEM', 'USER')),
                asset_type_id UUID NOT NULL REFERENCES wallet_asset_types(id),
                display_name TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_balances (
                account_id UUID PRIMARY KEY REFERENCES wallet_accounts(id),
                asset_type_id UUID NOT NULL REFERENCES wallet_asset_types(id),
                amount NUMERIC(20, 8) NOT NULL,
                version BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_transactions (
                id UUID PRIMARY KEY,
                category TEXT NOT NULL CHECK (category IN ('TOP_UP', 'BONUS', 'SPEND')),
                reference TEXT NOT NULL UNIQUE,
                description TEXT,
                metadata JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_journal (
                id UUID PRIMARY KEY,
                transaction_id UUID NOT NULL REFERENCES wallet_transactions(id),
                account_id UUID NOT NULL REFERENCES wallet_accounts(id),
                asset_type_id UUID NOT NULL REFERENCES wallet_asset_types(id),
                amount NUMERIC(20, 8) NOT NULL,
                balance_after NUMERIC(20, 8) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_idempotency (
                reference TEXT PRIMARY KEY,
                response_status SMALLINT NOT NULL,
                response_body JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_wallet_journal_account
            ON wallet_journal(account_id, created_at DESC)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_wallet_journal_transaction
            ON wallet_journal(transaction_id)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_wallet_idempotency_expires
            ON wallet_idempotency(expires_at)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    /// Idempotently create the treasury, bonus-pool, and revenue accounts
    /// for an asset, each addressable by its well-known external id.
    pub async fn provision_system_accounts(&self, asset: &AssetType) -> Result<(), WalletError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        for role in SystemRole::ALL {
            let account = Account::system(role, asset);
            let inserted: Option<Uuid> = sqlx::query_scalar(
                r#"
                INSERT INTO wallet_accounts
                    (id, external_id, kind, asset_type_id, display_name, active, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (external_id) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(account.id)
            .bind(&account.external_id)
            .bind(account.kind.as_str())
            .bind(account.asset_type_id)
            .bind(&account.display_name)
            .bind(account.active)
            .bind(account.created_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(classify)?;

            if let Some(id) = inserted {
                sqlx::query(
                    r#"
                    INSERT INTO wallet_balances (account_id, asset_type_id, amount, version, updated_at)
                    VALUES ($1, $2, 0, 0, NOW())
                    "#,
                )
                .bind(id)
                .bind(asset.id)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
            }
        }

        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn insert_asset_type(&self, asset: &AssetType) -> Result<(), WalletError> {
        sqlx::query(
            r#"
            INSERT INTO wallet_asset_types (id, code, display_name, active, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(asset.id)
        .bind(&asset.code)
        .bind(&asset.display_name)
        .bind(asset.active)
        .bind(asset.created_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn insert_account(&self, account: &Account) -> Result<(), WalletError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        sqlx::query(
            r#"
            INSERT INTO wallet_accounts
                (id, external_id, kind, asset_type_id, display_name, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(account.id)
        .bind(&account.external_id)
        .bind(account.kind.as_str())
        .bind(account.asset_type_id)
        .bind(&account.display_name)
        .bind(account.active)
        .bind(account.created_at)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        sqlx::query(
            r#"
            INSERT INTO wallet_balances (account_id, asset_type_id, amount, version, updated_at)
            VALUES ($1, $2, 0, 0, NOW())
            "#,
        )
        .bind(account.id)
        .bind(account.asset_type_id)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(())
    }
}

#[async_trait]
impl WalletStore for PostgresStore {
    async fn create_asset_type(&self, asset: AssetType) -> Result<(), WalletError> {
        self.insert_asset_type(&asset).await
    }

    async fn find_asset_type(&self, code: &str) -> Result<AssetType, WalletError> {
        use sqlx::Row;

        let row = sqlx::query(
            r#"
            SELECT id, code, display_name, active, created_at
            FROM wallet_asset_types
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .ok_or_else(|| WalletError::AssetNotFound(code.to_string()))?;

        Ok(AssetType {
            id: row.try_get("id").map_err(storage)?,
            code: row.try_get("code").map_err(storage)?,
            display_name: row.try_get("display_name").map_err(storage)?,
            active: row.try_get("active").map_err(storage)?,
            created_at: row.try_get("created_at").map_err(storage)?,
        })
    }

    async fn create_account(&self, account: Account) -> Result<(), WalletError> {
        self.insert_account(&account).await
    }

    async fn find_account(&self, id: Uuid) -> Result<Account, WalletError> {
        let row = sqlx::query(
            r#"
            SELECT id, external_id, kind, asset_type_id, display_name, active, created_at
            FROM wallet_accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .ok_or(WalletError::AccountNotFound(id))?;

        resolver::map_account(&row)
    }

    async fn execute_movement(&self, movement: &Movement) -> Result<Receipt, WalletError> {
        self.run_movement(movement).await
    }

    async fn balance(&self, account_id: Uuid) -> Result<BalanceSnapshot, WalletError> {
        self.balance_snapshot(account_id).await
    }

    async fn history(
        &self,
        account_id: Uuid,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, WalletError> {
        self.history_page(account_id, query).await
    }

    async fn audit(&self, account_id: Uuid) -> Result<AuditReport, WalletError> {
        self.audit_account(account_id).await
    }

    async fn purge_expired_responses(&self) -> Result<u64, WalletError> {
        self.purge_expired().await
    }
}
