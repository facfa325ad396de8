// coffer/src/adapters/postgres/posting.rs
//! Double-entry posting engine. Appends the two journal legs and updates
//! both balance-cache rows, whose locks the caller already holds.

use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::account::LockedAccount;
use crate::error::WalletError;
use crate::journal::JournalEntry;

use super::session::classify;

pub(crate) struct PostingOutcome {
    pub debit_after: Decimal,
    pub credit_after: Decimal,
}

/// Effects, in order: debit journal entry, credit journal entry, debit
/// balance update, credit balance update. The non-negative check for
/// USER debit accounts happens before the first insert, so a rejected
/// posting leaves no trace even inside the open transaction.
pub(crate) async fn post(
    tx: &mut Transaction<'static, Postgres>,
    transaction_id: Uuid,
    debit: &LockedAccount,
    credit: &LockedAccount,
    magnitude: Decimal,
    asset_type_id: Uuid,
) -> Result<PostingOutcome, WalletError> {
    if magnitude <= Decimal::ZERO {
        return Err(WalletError::validation(
            "amount",
            "must be strictly positive",
        ));
    }
    if debit.account.asset_type_id != asset_type_id
        || credit.account.asset_type_id != asset_type_id
    {
        return Err(WalletError::AssetMismatch);
    }

    let debit_after = debit.balance - magnitude;
    let credit_after = credit.balance + magnitude;

    if debit.account.kind.is_user() && debit_after < Decimal::ZERO {
        return Err(WalletError::InsufficientBalance);
    }

    let debit_entry = JournalEntry::debit(
        transaction_id,
        debit.account.id,
        asset_type_id,
        magnitude,
        debit_after,
    );
    let credit_entry = JournalEntry::credit(
        transaction_id,
        credit.account.id,
        asset_type_id,
        magnitude,
        credit_after,
    );

    insert_entry(tx, &debit_entry).await?;
    insert_entry(tx, &credit_entry).await?;
    update_balance(tx, debit.account.id, debit_after).await?;
    update_balance(tx, credit.account.id, credit_after).await?;

    Ok(PostingOutcome {
        debit_after,
        credit_after,
    })
}

async fn insert_entry(
    tx: &mut Transaction<'static, Postgres>,
    entry: &JournalEntry,
) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        INSERT INTO wallet_journal
            (id, transaction_id, account_id, asset_type_id, amount, balance_after, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry.id)
    .bind(entry.transaction_id)
    .bind(entry.account_id)
    .bind(entry.asset_type_id)
    .bind(entry.amount)
    .bind(entry.balance_after)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await
    .map_err(classify)?;

    Ok(())
}

async fn update_balance(
    tx: &mut Transaction<'static, Postgres>,
    account_id: Uuid,
    amount: Decimal,
) -> Result<(), WalletError> {
    sqlx::query(
        r#"
        UPDATE wallet_balances
        SET amount = $2, version = version + 1, updated_at = NOW()
        WHERE account_id = $1
        "#,
    )
    .bind(account_id)
    .bind(amount)
    .execute(&mut **tx)
    .await
    .map_err(classify)?;

    Ok(())
}
