// coffer/src/adapters/postgres/flows.rs
//! The uniform movement algorithm shared by the three flows. One
//! serializable session per request: idempotency lookup, counterparty
//! resolution, canonical-order locking, posting, response capture.

use sqlx::{Postgres, Row, Transaction};

use crate::error::WalletError;
use crate::idempotency::{StoredResponse, CAPTURED_STATUS_CREATED};
use crate::transaction::{Movement, Receipt, Transaction as LedgerTransaction};

use super::session::{begin_serializable, classify, is_unique_violation};
use super::{posting, resolver, storage, PostgresStore};

impl PostgresStore {
    pub(crate) async fn run_movement(&self, movement: &Movement) -> Result<Receipt, WalletError> {
        let mut attempt: u32 = 0;
        let mut saw_duplicate = false;

        loop {
            let mut tx = begin_serializable(self.pool()).await?;

            let result = match self.movement_tx(&mut tx, movement).await {
                Ok(receipt) => tx.commit().await.map_err(classify).map(|_| receipt),
                Err(err) => {
                    tx.rollback().await.ok();
                    Err(err)
                }
            };

            match result {
                Ok(receipt) => return Ok(receipt),
                Err(WalletError::Conflict(reason)) if attempt < self.retry().attempts => {
                    let delay = self.retry().backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        reference = %movement.reference,
                        %reason,
                        attempt,
                        "transient conflict, retrying after {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                // A concurrent writer with the same reference committed
                // first. Re-run once: the next pass observes its captured
                // response and replays it. Only a reference whose
                // idempotency record is gone surfaces as a duplicate.
                Err(WalletError::DuplicateReference(_)) if !saw_duplicate => {
                    saw_duplicate = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn movement_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        movement: &Movement,
    ) -> Result<Receipt, WalletError> {
        // Idempotency lookup happens before any lock, so a replay never
        // contends for hot accounts.
        if let Some(body) = lookup_response(tx, &movement.reference).await? {
            let mut receipt: Receipt = serde_json::from_value(body).map_err(storage)?;
            receipt.idempotent = true;
            tracing::debug!(reference = %movement.reference, "replaying captured response");
            return Ok(receipt);
        }

        let (user, asset_code) = resolver::find_active_account(tx, movement.account_id)
            .await?
            .ok_or(WalletError::AccountNotFound(movement.account_id))?;

        let role = movement.category.counterparty_role();
        let external_id = role.external_id(&asset_code);
        let counterparty = resolver::find_by_external_id(tx, &external_id)
            .await?
            .ok_or_else(|| {
                WalletError::Configuration(format!("missing system account {}", external_id))
            })?;

        let locked = resolver::lock_accounts(tx, &[user.id, counterparty.id]).await?;
        let user_locked = locked
            .iter()
            .find(|l| l.account.id == user.id)
            .cloned()
            .ok_or(WalletError::AccountNotFound(user.id))?;
        let counterparty_locked = locked
            .iter()
            .find(|l| l.account.id == counterparty.id)
            .cloned()
            .ok_or_else(|| {
                WalletError::Configuration(format!("missing system account {}", external_id))
            })?;

        if user_locked.account.asset_type_id != counterparty_locked.account.asset_type_id {
            return Err(WalletError::AssetMismatch);
        }
        let asset_type_id = user_locked.account.asset_type_id;

        // Early check for SPEND: fail cleanly before any row is written.
        // The posting engine enforces the same bound.
        if movement.category.debits_user() && user_locked.balance < movement.magnitude {
            return Err(WalletError::InsufficientBalance);
        }

        let record = LedgerTransaction::new(
            movement.category,
            &movement.reference,
            movement.description.clone(),
            movement.metadata.clone(),
        );
        insert_transaction(tx, &record).await?;

        let (debit, credit) = if movement.category.debits_user() {
            (&user_locked, &counterparty_locked)
        } else {
            (&counterparty_locked, &user_locked)
        };

        let outcome = posting::post(
            tx,
            record.id,
            debit,
            credit,
            movement.magnitude,
            asset_type_id,
        )
        .await?;

        let balance_after = if movement.category.debits_user() {
            outcome.debit_after
        } else {
            outcome.credit_after
        };

        let receipt = Receipt {
            transaction_id: record.id,
            reference_id: movement.reference.clone(),
            category: movement.category,
            account_id: user.id,
            amount: movement.magnitude,
            balance_after,
            description: movement.description.clone(),
            created_at: record.created_at,
            idempotent: false,
        };

        let body = serde_json::to_value(&receipt).map_err(storage)?;
        let captured = StoredResponse::capture(
            &movement.reference,
            CAPTURED_STATUS_CREATED,
            body,
            self.idempotency_ttl(),
        );
        store_response(tx, &captured).await?;

        Ok(receipt)
    }
}

/// Returns the captured body only while its record is still live;
/// expired records are left for out-of-band garbage collection.
async fn lookup_response(
    tx: &mut Transaction<'static, Postgres>,
    reference: &str,
) -> Result<Option<serde_json::Value>, WalletError> {
    let row = sqlx::query(
        r#"
        SELECT response_body
        FROM wallet_idempotency
        WHERE reference = $1 AND expires_at > NOW()
        "#,
    )
    .bind(reference)
    .fetch_optional(&mut **tx)
    .await
    .map_err(classify)?;

    match row {
        Some(row) => Ok(Some(row.try_get("response_body").map_err(storage)?)),
        None => Ok(None),
    }
}

/// First writer wins: a key collision is tolerated silently. Under
/// serializable isolation the race that reaches it has already been
/// decided by the transaction-reference constraint.
async fn store_response(
    tx: &mut Transaction<'static, Postgres>,
    captured: &StoredResponse,
) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        INSERT INTO wallet_idempotency
            (reference, response_status, response_body, created_at, expires_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (reference) DO NOTHING
        "#,
    )
    .bind(&captured.reference)
    .bind(captured.status)
    .bind(&captured.body)
    .bind(captured.created_at)
    .bind(captured.expires_at)
    .execute(&mut **tx)
    .await
    .map_err(classify)?;

    Ok(())
}

async fn insert_transaction(
    tx: &mut Transaction<'static, Postgres>,
    record: &LedgerTransaction,
) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        INSERT INTO wallet_transactions
            (id, category, reference, description, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(record.id)
    .bind(record.category.as_str())
    .bind(&record.reference)
    .bind(&record.description)
    .bind(&record.metadata)
    .bind(record.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            WalletError::DuplicateReference(record.reference.clone())
        } else {
            classify(err)
        }
    })?;

    Ok(())
}
