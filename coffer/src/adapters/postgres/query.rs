// coffer/src/adapters/postgres/query.rs
//! Read-only surface: balance, paginated history, audit. These run on
//! short-lived pooled connections outside any write transaction and take
//! no locks.

use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::balance::BalanceSnapshot;
use crate::error::WalletError;
use crate::journal::{AuditReport, HistoryEntry, HistoryPage, HistoryQuery};
use crate::transaction::TransactionCategory;

use super::session::classify;
use super::{storage, PostgresStore};

impl PostgresStore {
    pub(crate) async fn balance_snapshot(
        &self,
        account_id: Uuid,
    ) -> Result<BalanceSnapshot, WalletError> {
        let row = sqlx::query(
            r#"
            SELECT b.account_id, t.code AS asset_code, t.display_name AS asset_name,
                   b.amount AS balance, b.version, b.updated_at
            FROM wallet_balances b
            JOIN wallet_accounts a ON a.id = b.account_id
            JOIN wallet_asset_types t ON t.id = b.asset_type_id
            WHERE b.account_id = $1 AND a.active
            "#,
        )
        .bind(account_id)
        .fetch_optional(self.pool())
        .await
        .map_err(classify)?
        .ok_or(WalletError::AccountNotFound(account_id))?;

        Ok(BalanceSnapshot {
            account_id: row.try_get("account_id").map_err(storage)?,
            asset_code: row.try_get("asset_code").map_err(storage)?,
            asset_name: row.try_get("asset_name").map_err(storage)?,
            balance: row.try_get("balance").map_err(storage)?,
            version: row.try_get("version").map_err(storage)?,
            updated_at: row.try_get("updated_at").map_err(storage)?,
        })
    }

    pub(crate) async fn history_page(
        &self,
        account_id: Uuid,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, WalletError> {
        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM wallet_accounts WHERE id = $1 AND active")
                .bind(account_id)
                .fetch_optional(self.pool())
                .await
                .map_err(classify)?;
        if exists.is_none() {
            return Err(WalletError::AccountNotFound(account_id));
        }

        let total: i64 = match query.category {
            Some(category) => {
                sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*)
                    FROM wallet_journal j
                    JOIN wallet_transactions t ON t.id = j.transaction_id
                    WHERE j.account_id = $1 AND t.category = $2
                    "#,
                )
                .bind(account_id)
                .bind(category.as_str())
                .fetch_one(self.pool())
                .await
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM wallet_journal WHERE account_id = $1")
                    .bind(account_id)
                    .fetch_one(self.pool())
                    .await
            }
        }
        .map_err(classify)?;

        // Journal ids are UUIDv7, so the id tie-break keeps pagination
        // stable for entries sharing a creation timestamp.
        let rows = match query.category {
            Some(category) => {
                sqlx::query(
                    r#"
                    SELECT j.amount, j.balance_after, t.id AS transaction_id, t.category,
                           t.reference, t.description, t.created_at
                    FROM wallet_journal j
                    JOIN wallet_transactions t ON t.id = j.transaction_id
                    WHERE j.account_id = $1 AND t.category = $2
                    ORDER BY t.created_at DESC, j.id DESC
                    LIMIT $3 OFFSET $4
                    "#,
                )
                .bind(account_id)
                .bind(category.as_str())
                .bind(query.limit)
                .bind(query.offset)
                .fetch_all(self.pool())
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT j.amount, j.balance_after, t.id AS transaction_id, t.category,
                           t.reference, t.description, t.created_at
                    FROM wallet_journal j
                    JOIN wallet_transactions t ON t.id = j.transaction_id
                    WHERE j.account_id = $1
                    ORDER BY t.created_at DESC, j.id DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(account_id)
                .bind(query.limit)
                .bind(query.offset)
                .fetch_all(self.pool())
                .await
            }
        }
        .map_err(classify)?;

        let entries = rows
            .iter()
            .map(map_history_entry)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(HistoryPage {
            entries,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    pub(crate) async fn audit_account(&self, account_id: Uuid) -> Result<AuditReport, WalletError> {
        let cached: Decimal =
            sqlx::query_scalar("SELECT amount FROM wallet_balances WHERE account_id = $1")
                .bind(account_id)
                .fetch_optional(self.pool())
                .await
                .map_err(classify)?
                .ok_or(WalletError::AccountNotFound(account_id))?;

        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0) AS journal_sum, COUNT(*) AS entry_count
            FROM wallet_journal
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_one(self.pool())
        .await
        .map_err(classify)?;

        let journal_sum: Decimal = row.try_get("journal_sum").map_err(storage)?;
        let entry_count: i64 = row.try_get("entry_count").map_err(storage)?;

        Ok(AuditReport::evaluate(
            account_id,
            cached,
            journal_sum,
            entry_count,
        ))
    }

    pub(crate) async fn purge_expired(&self) -> Result<u64, WalletError> {
        let result = sqlx::query("DELETE FROM wallet_idempotency WHERE expires_at <= NOW()")
            .execute(self.pool())
            .await
            .map_err(classify)?;
        Ok(result.rows_affected())
    }
}

fn map_history_entry(row: &PgRow) -> Result<HistoryEntry, WalletError> {
    let category: String = row.try_get("category").map_err(storage)?;
    let stored_amount: Decimal = row.try_get("amount").map_err(storage)?;
    Ok(HistoryEntry {
        transaction_id: row.try_get("transaction_id").map_err(storage)?,
        category: TransactionCategory::parse(&category)
            .ok_or_else(|| WalletError::Storage(format!("unknown category: {}", category)))?,
        reference: row.try_get("reference").map_err(storage)?,
        // Incoming value reads positive, outgoing negative.
        amount: -stored_amount,
        balance_after: row.try_get("balance_after").map_err(storage)?,
        description: row.try_get("description").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
    })
}
