// coffer/src/wallet.rs
use std::sync::Arc;

use metrics::{counter, histogram};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::amount::validate_magnitude;
use crate::balance::BalanceSnapshot;
use crate::error::WalletError;
use crate::journal::{AuditReport, HistoryPage, HistoryQuery, MAX_HISTORY_LIMIT};
use crate::transaction::{Movement, Receipt, TransactionCategory};
use crate::WalletStore;

pub const MAX_REFERENCE_CHARS: usize = 255;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// Caller-facing movement parameters, before validation.
#[derive(Debug, Clone)]
pub struct MovementRequest {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub reference: String,
    pub description: Option<String>,
    pub metadata: Option<Value>,
}

/// The programmatic surface of the ledger core: the three flows and the
/// three queries, over any [`WalletStore`].
///
/// This is the validation boundary. A request outside the documented
/// constraints is rejected here, before the store is contacted.
#[derive(Clone)]
pub struct Wallet {
    store: Arc<dyn WalletStore>,
}

impl Wallet {
    pub fn new(store: Arc<dyn WalletStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn WalletStore> {
        Arc::clone(&self.store)
    }

    /// Purchased credit: treasury debits, the user account credits.
    pub async fn top_up(&self, request: MovementRequest) -> Result<Receipt, WalletError> {
        self.execute(TransactionCategory::TopUp, request).await
    }

    /// Gratis credit: bonus pool debits, the user account credits.
    pub async fn bonus(&self, request: MovementRequest) -> Result<Receipt, WalletError> {
        self.execute(TransactionCategory::Bonus, request).await
    }

    /// Debit-to-revenue: the user account debits, revenue credits.
    pub async fn spend(&self, request: MovementRequest) -> Result<Receipt, WalletError> {
        self.execute(TransactionCategory::Spend, request).await
    }

    async fn execute(
        &self,
        category: TransactionCategory,
        request: MovementRequest,
    ) -> Result<Receipt, WalletError> {
        validate_magnitude(request.amount)?;
        validate_reference(&request.reference)?;
        validate_description(request.description.as_deref())?;

        let movement = Movement {
            category,
            account_id: request.account_id,
            magnitude: request.amount,
            reference: request.reference,
            description: request.description,
            metadata: request
                .metadata
                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
        };

        let result = self.store.execute_movement(&movement).await;

        counter!("wallet.movements.total",
            "category" => category.as_str(),
            "status" => if result.is_ok() { "success" } else { "failed" }
        )
        .increment(1);

        if let Ok(receipt) = &result {
            if receipt.idempotent {
                counter!("wallet.movements.replayed", "category" => category.as_str())
                    .increment(1);
            } else {
                histogram!("wallet.movement.amount", "category" => category.as_str())
                    .record(receipt.amount.to_f64().unwrap_or(0.0));
            }
        }

        result
    }

    pub async fn balance(&self, account_id: Uuid) -> Result<BalanceSnapshot, WalletError> {
        self.store.balance(account_id).await
    }

    pub async fn history(
        &self,
        account_id: Uuid,
        query: HistoryQuery,
    ) -> Result<HistoryPage, WalletError> {
        if query.limit < 1 || query.limit > MAX_HISTORY_LIMIT {
            return Err(WalletError::validation(
                "limit",
                format!("must be between 1 and {}", MAX_HISTORY_LIMIT),
            ));
        }
        if query.offset < 0 {
            return Err(WalletError::validation("offset", "must not be negative"));
        }
        self.store.history(account_id, &query).await
    }

    pub async fn audit(&self, account_id: Uuid) -> Result<AuditReport, WalletError> {
        self.store.audit(account_id).await
    }
}

fn validate_reference(reference: &str) -> Result<(), WalletError> {
    if reference.is_empty() {
        return Err(WalletError::validation("referenceId", "must not be empty"));
    }
    if reference.chars().count() > MAX_REFERENCE_CHARS {
        return Err(WalletError::validation(
            "referenceId",
            format!("at most {} characters", MAX_REFERENCE_CHARS),
        ));
    }
    Ok(())
}

fn validate_description(description: Option<&str>) -> Result<(), WalletError> {
    if let Some(description) = description {
        if description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(WalletError::validation(
                "description",
                format!("at most {} characters", MAX_DESCRIPTION_CHARS),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, SystemRole};
    use crate::adapters::MemoryStore;
    use crate::asset::AssetType;
    use rust_decimal_macros::dec;
    use serde_json::json;

    async fn seeded_wallet() -> (Wallet, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let asset = AssetType::new("DIA", "Diamonds");
        store.create_asset_type(asset.clone()).await.unwrap();
        for role in SystemRole::ALL {
            store
                .create_account(Account::system(role, &asset))
                .await
                .unwrap();
        }
        let alice = Account::user(asset.id, "Alice");
        let alice_id = alice.id;
        store.create_account(alice).await.unwrap();
        (Wallet::new(store), alice_id)
    }

    fn request(account_id: Uuid, amount: Decimal, reference: &str) -> MovementRequest {
        MovementRequest {
            account_id,
            amount,
            reference: reference.to_string(),
            description: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn rejects_non_positive_amounts_before_the_store() {
        let (wallet, alice) = seeded_wallet().await;
        for amount in [Decimal::ZERO, dec!(-5)] {
            let result = wallet.top_up(request(alice, amount, "r1")).await;
            assert!(matches!(
                result,
                Err(WalletError::Validation { field: "amount", .. })
            ));
        }
        // Nothing reached the journal.
        assert_eq!(wallet.balance(alice).await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn rejects_oversized_references_and_descriptions() {
        let (wallet, alice) = seeded_wallet().await;

        let result = wallet.top_up(request(alice, dec!(10), "")).await;
        assert!(matches!(
            result,
            Err(WalletError::Validation { field: "referenceId", .. })
        ));

        let long_reference = "r".repeat(MAX_REFERENCE_CHARS + 1);
        let result = wallet.top_up(request(alice, dec!(10), &long_reference)).await;
        assert!(matches!(
            result,
            Err(WalletError::Validation { field: "referenceId", .. })
        ));

        let mut oversized = request(alice, dec!(10), "r1");
        oversized.description = Some("d".repeat(MAX_DESCRIPTION_CHARS + 1));
        let result = wallet.top_up(oversized).await;
        assert!(matches!(
            result,
            Err(WalletError::Validation { field: "description", .. })
        ));
    }

    #[tokio::test]
    async fn history_bounds_are_enforced() {
        let (wallet, alice) = seeded_wallet().await;

        for limit in [0, MAX_HISTORY_LIMIT + 1] {
            let result = wallet
                .history(
                    alice,
                    HistoryQuery {
                        limit,
                        ..HistoryQuery::default()
                    },
                )
                .await;
            assert!(matches!(
                result,
                Err(WalletError::Validation { field: "limit", .. })
            ));
        }

        let result = wallet
            .history(
                alice,
                HistoryQuery {
                    offset: -1,
                    ..HistoryQuery::default()
                },
            )
            .await;
        assert!(matches!(
            result,
            Err(WalletError::Validation { field: "offset", .. })
        ));
    }

    #[tokio::test]
    async fn metadata_defaults_to_an_empty_object() {
        let (wallet, alice) = seeded_wallet().await;
        let receipt = wallet.top_up(request(alice, dec!(100), "r1")).await.unwrap();
        assert_eq!(receipt.balance_after, dec!(100));

        let with_metadata = MovementRequest {
            metadata: Some(json!({"source": "checkout", "order": 42})),
            ..request(alice, dec!(1), "r2")
        };
        wallet.top_up(with_metadata).await.unwrap();
    }

    #[tokio::test]
    async fn replay_flows_through_with_the_idempotent_flag() {
        let (wallet, alice) = seeded_wallet().await;
        let fresh = wallet.top_up(request(alice, dec!(100), "r1")).await.unwrap();
        let replay = wallet.top_up(request(alice, dec!(100), "r1")).await.unwrap();

        assert!(!fresh.idempotent);
        assert!(replay.idempotent);
        assert_eq!(replay.transaction_id, fresh.transaction_id);
        assert_eq!(wallet.balance(alice).await.unwrap().balance, dec!(100));
    }

    #[tokio::test]
    async fn spend_and_audit_through_the_front() {
        let (wallet, alice) = seeded_wallet().await;
        wallet.top_up(request(alice, dec!(600), "r1")).await.unwrap();

        let receipt = wallet.spend(request(alice, dec!(30), "r2")).await.unwrap();
        assert_eq!(receipt.balance_after, dec!(570));

        let audit = wallet.audit(alice).await.unwrap();
        assert!(audit.is_consistent);
        assert_eq!(audit.discrepancy, Decimal::ZERO);
    }
}
