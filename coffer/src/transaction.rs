// coffer/src/transaction.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::account::SystemRole;

/// The three money-movement flows. The category fully determines which
/// side of the posting the user account sits on and which system role is
/// the counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionCategory {
    TopUp,
    Bonus,
    Spend,
}

impl TransactionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopUp => "TOP_UP",
            Self::Bonus => "BONUS",
            Self::Spend => "SPEND",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "TOP_UP" => Some(Self::TopUp),
            "BONUS" => Some(Self::Bonus),
            "SPEND" => Some(Self::Spend),
            _ => None,
        }
    }

    pub fn counterparty_role(&self) -> SystemRole {
        match self {
            Self::TopUp => SystemRole::Treasury,
            Self::Bonus => SystemRole::BonusPool,
            Self::Spend => SystemRole::Revenue,
        }
    }

    /// SPEND debits the user account; the credit flows debit the system
    /// counterparty instead.
    pub fn debits_user(&self) -> bool {
        matches!(self, Self::Spend)
    }
}

/// Immutable transaction header. One row per committed movement; the
/// journal entries hang off `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub category: TransactionCategory,
    pub reference: String,
    pub description: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Id and timestamp are generated here, inside the session body, so
    /// every retry attempt is self-consistent.
    pub fn new(
        category: TransactionCategory,
        reference: &str,
        description: Option<String>,
        metadata: Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            category,
            reference: reference.to_string(),
            description,
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// A fully validated movement, ready for atomic execution by a store.
#[derive(Debug, Clone)]
pub struct Movement {
    pub category: TransactionCategory,
    pub account_id: Uuid,
    pub magnitude: Decimal,
    pub reference: String,
    pub description: Option<String>,
    pub metadata: Value,
}

/// Outcome of a movement. The serialized form is what the idempotency
/// store captures, so a replay deserializes to an identical value; the
/// `idempotent` flag lives outside the captured body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_id: Uuid,
    pub reference_id: String,
    #[serde(rename = "type")]
    pub category: TransactionCategory,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub idempotent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_map_to_counterparty_roles() {
        assert_eq!(
            TransactionCategory::TopUp.counterparty_role(),
            SystemRole::Treasury
        );
        assert_eq!(
            TransactionCategory::Bonus.counterparty_role(),
            SystemRole::BonusPool
        );
        assert_eq!(
            TransactionCategory::Spend.counterparty_role(),
            SystemRole::Revenue
        );
        assert!(TransactionCategory::Spend.debits_user());
        assert!(!TransactionCategory::TopUp.debits_user());
    }

    #[test]
    fn receipt_body_omits_the_replay_flag() {
        let receipt = Receipt {
            transaction_id: Uuid::now_v7(),
            reference_id: "r1".to_string(),
            category: TransactionCategory::TopUp,
            account_id: Uuid::now_v7(),
            amount: Decimal::new(100, 0),
            balance_after: Decimal::new(600, 0),
            description: None,
            created_at: Utc::now(),
            idempotent: false,
        };

        let body = serde_json::to_value(&receipt).unwrap();
        assert!(body.get("idempotent").is_none());
        assert_eq!(body["type"], "TOP_UP");
        assert_eq!(body["referenceId"], "r1");

        let replayed: Receipt = serde_json::from_value(body).unwrap();
        assert_eq!(replayed, receipt);
    }
}
