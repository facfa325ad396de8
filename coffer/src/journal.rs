// coffer/src/journal.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::audit_tolerance;
use crate::transaction::TransactionCategory;

/// One leg of a double-entry posting. A positive amount means value
/// leaves the row's account (debit), a negative amount means value
/// arrives (credit). The two legs of a posting sum to zero.
///
/// `balance_after` is an as-of snapshot for history reporting, not an
/// authoritative balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub asset_type_id: Uuid,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn debit(
        transaction_id: Uuid,
        account_id: Uuid,
        asset_type_id: Uuid,
        magnitude: Decimal,
        balance_after: Decimal,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            transaction_id,
            account_id,
            asset_type_id,
            amount: magnitude,
            balance_after,
            created_at: Utc::now(),
        }
    }

    pub fn credit(
        transaction_id: Uuid,
        account_id: Uuid,
        asset_type_id: Uuid,
        magnitude: Decimal,
        balance_after: Decimal,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            transaction_id,
            account_id,
            asset_type_id,
            amount: -magnitude,
            balance_after,
            created_at: Utc::now(),
        }
    }
}

pub const DEFAULT_HISTORY_LIMIT: i64 = 20;
pub const MAX_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub limit: i64,
    pub offset: i64,
    pub category: Option<TransactionCategory>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_HISTORY_LIMIT,
            offset: 0,
            category: None,
        }
    }
}

/// History row as reported to callers: `amount` is the negation of the
/// stored journal amount, so incoming value reads positive and outgoing
/// negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub transaction_id: Uuid,
    pub category: TransactionCategory,
    pub reference: String,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Result of recomputing an account's balance from the journal and
/// comparing it against the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub account_id: Uuid,
    pub cached_balance: Decimal,
    pub computed_balance: Decimal,
    pub discrepancy: Decimal,
    pub entry_count: i64,
    pub is_consistent: bool,
    pub checked_at: DateTime<Utc>,
}

impl AuditReport {
    /// `journal_sum` is the signed sum of the account's stored amounts;
    /// the balance it implies is its negation.
    pub fn evaluate(
        account_id: Uuid,
        cached_balance: Decimal,
        journal_sum: Decimal,
        entry_count: i64,
    ) -> Self {
        let computed_balance = -journal_sum;
        let discrepancy = cached_balance - computed_balance;
        Self {
            account_id,
            cached_balance,
            computed_balance,
            discrepancy,
            entry_count,
            is_consistent: discrepancy.abs() <= audit_tolerance(),
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn posting_legs_sum_to_zero() {
        let tx = Uuid::now_v7();
        let asset = Uuid::now_v7();
        let debit = JournalEntry::debit(tx, Uuid::now_v7(), asset, dec!(30), dec!(70));
        let credit = JournalEntry::credit(tx, Uuid::now_v7(), asset, dec!(30), dec!(30));
        assert_eq!(debit.amount + credit.amount, Decimal::ZERO);
        assert!(debit.amount > Decimal::ZERO);
        assert!(credit.amount < Decimal::ZERO);
    }

    #[test]
    fn audit_compares_within_tolerance() {
        let id = Uuid::now_v7();
        let clean = AuditReport::evaluate(id, dec!(225), dec!(-225), 4);
        assert!(clean.is_consistent);
        assert_eq!(clean.discrepancy, Decimal::ZERO);

        let drifted = AuditReport::evaluate(id, dec!(225.00000002), dec!(-225), 4);
        assert!(!drifted.is_consistent);
        assert_eq!(drifted.discrepancy, dec!(0.00000002));
    }
}
