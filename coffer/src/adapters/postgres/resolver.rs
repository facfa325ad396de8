// coffer/src/adapters/postgres/resolver.rs
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::account::{Account, AccountKind, LockedAccount};
use crate::error::WalletError;

use super::session::classify;
use super::storage;

pub(crate) fn map_account(row: &PgRow) -> Result<Account, WalletError> {
    let kind: String = row.try_get("kind").map_err(storage)?;
    Ok(Account {
        id: row.try_get("id").map_err(storage)?,
        external_id: row.try_get("external_id").map_err(storage)?,
        kind: AccountKind::parse(&kind)
            .ok_or_else(|| WalletError::Storage(format!("unknown account kind: {}", kind)))?,
        asset_type_id: row.try_get("asset_type_id").map_err(storage)?,
        display_name: row.try_get("display_name").map_err(storage)?,
        active: row.try_get("active").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
    })
}

/// Unlocked lookup of a well-known system account. Used only to find the
/// flow counterparty by its stable external id.
pub(crate) async fn find_by_external_id(
    tx: &mut Transaction<'static, Postgres>,
    external_id: &str,
) -> Result<Option<Account>, WalletError> {
    let row = sqlx::query(
        r#"
        SELECT id, external_id, kind, asset_type_id, display_name, active, created_at
        FROM wallet_accounts
        WHERE external_id = $1 AND active
        "#,
    )
    .bind(external_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(classify)?;

    row.as_ref().map(map_account).transpose()
}

/// Unlocked pre-read of the target account, joined with its asset code so
/// the counterparty's external id can be derived before any lock is
/// taken.
pub(crate) async fn find_active_account(
    tx: &mut Transaction<'static, Postgres>,
    id: Uuid,
) -> Result<Option<(Account, String)>, WalletError> {
    let row = sqlx::query(
        r#"
        SELECT a.id, a.external_id, a.kind, a.asset_type_id, a.display_name, a.active,
               a.created_at, t.code AS asset_code
        FROM wallet_accounts a
        JOIN wallet_asset_types t ON t.id = a.asset_type_id
        WHERE a.id = $1 AND a.active
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(classify)?;

    match row {
        Some(row) => {
            let account = map_account(&row)?;
            let asset_code: String = row.try_get("asset_code").map_err(storage)?;
            Ok(Some((account, asset_code)))
        }
        None => Ok(None),
    }
}

/// Lock the balance rows of the given accounts. Ids are deduplicated and
/// sorted ascending (Uuid `Ord` is unsigned byte order), and the locks
/// are taken by one batched query in that order. The canonical sort is
/// the only mechanism preventing lock cycles: any two transactions
/// touching the same pair acquire in the same order.
///
/// Inactive and missing accounts are simply absent from the result.
pub(crate) async fn lock_accounts(
    tx: &mut Transaction<'static, Postgres>,
    ids: &[Uuid],
) -> Result<Vec<LockedAccount>, WalletError> {
    let mut ordered: Vec<Uuid> = ids.to_vec();
    ordered.sort();
    ordered.dedup();

    let rows = sqlx::query(
        r#"
        SELECT a.id, a.external_id, a.kind, a.asset_type_id, a.display_name, a.active,
               a.created_at, b.amount AS balance, b.version
        FROM wallet_accounts a
        JOIN wallet_balances b ON b.account_id = a.id
        WHERE a.id = ANY($1) AND a.active
        ORDER BY a.id ASC
        FOR UPDATE OF b
        "#,
    )
    .bind(ordered)
    .fetch_all(&mut **tx)
    .await
    .map_err(classify)?;

    rows.iter()
        .map(|row| {
            Ok(LockedAccount {
                account: map_account(row)?,
                balance: row.try_get("balance").map_err(storage)?,
                version: row.try_get("version").map_err(storage)?,
            })
        })
        .collect()
}
