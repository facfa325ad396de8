// coffer/src/balance.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Read-only view of an account's balance-cache row joined with its
/// asset-type display data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub account_id: Uuid,
    pub asset_code: String,
    pub asset_name: String,
    pub balance: Decimal,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}
