// coffer/src/adapters/memory.rs
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::account::Account;
use crate::asset::AssetType;
use crate::balance::BalanceSnapshot;
use crate::error::WalletError;
use crate::idempotency::{StoredResponse, CAPTURED_STATUS_CREATED};
use crate::journal::{AuditReport, HistoryEntry, HistoryPage, HistoryQuery, JournalEntry};
use crate::transaction::{Movement, Receipt, Transaction};
use crate::WalletStore;

struct BalanceRow {
    asset_type_id: Uuid,
    amount: Decimal,
    version: i64,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    asset_types: HashMap<Uuid, AssetType>,
    accounts: HashMap<Uuid, Account>,
    balances: HashMap<Uuid, BalanceRow>,
    transactions: Vec<Transaction>,
    journal: Vec<JournalEntry>,
    responses: HashMap<String, StoredResponse>,
}

impl Default for BalanceRow {
    fn default() -> Self {
        Self {
            asset_type_id: Uuid::nil(),
            amount: Decimal::ZERO,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

/// In-memory store with the same observable semantics as the Postgres
/// adapter. Holding the mutex for the ENTIRE movement is this store's
/// equivalent of BEGIN/SELECT FOR UPDATE/COMMIT: no other task can enter
/// a movement while we hold it, so serializability is trivial.
pub struct MemoryStore {
    state: Mutex<State>,
    idempotency_ttl: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn with_idempotency_ttl(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            idempotency_ttl: ttl,
        }
    }

    #[cfg(test)]
    pub(crate) fn journal_entries(&self) -> Vec<JournalEntry> {
        self.state.lock().unwrap().journal.clone()
    }

    #[cfg(test)]
    pub(crate) fn expire_response(&self, reference: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(resp) = state.responses.get_mut(reference) {
            resp.expires_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn create_asset_type(&self, asset: AssetType) -> Result<(), WalletError> {
        let mut state = self.state.lock().unwrap();
        if state.asset_types.values().any(|a| a.code == asset.code) {
            return Ok(());
        }
        state.asset_types.insert(asset.id, asset);
        Ok(())
    }

    async fn find_asset_type(&self, code: &str) -> Result<AssetType, WalletError> {
        let state = self.state.lock().unwrap();
        state
            .asset_types
            .values()
            .find(|a| a.code == code)
            .cloned()
            .ok_or_else(|| WalletError::AssetNotFound(code.to_string()))
    }

    async fn create_account(&self, account: Account) -> Result<(), WalletError> {
        let mut state = self.state.lock().unwrap();
        if !state.asset_types.contains_key(&account.asset_type_id) {
            return Err(WalletError::AssetNotFound(
                account.asset_type_id.to_string(),
            ));
        }
        if let Some(external_id) = &account.external_id {
            if state
                .accounts
                .values()
                .any(|a| a.external_id.as_deref() == Some(external_id.as_str()))
            {
                return Err(WalletError::Storage(format!(
                    "external id already taken: {}",
                    external_id
                )));
            }
        }
        state.balances.insert(
            account.id,
            BalanceRow {
                asset_type_id: account.asset_type_id,
                ..BalanceRow::default()
            },
        );
        state.accounts.insert(account.id, account);
        Ok(())
    }

    async fn find_account(&self, id: Uuid) -> Result<Account, WalletError> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(&id)
            .cloned()
            .ok_or(WalletError::AccountNotFound(id))
    }

    async fn execute_movement(&self, movement: &Movement) -> Result<Receipt, WalletError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();

        // Idempotency first: a live captured response replays without
        // touching any balance.
        if let Some(resp) = state.responses.get(&movement.reference) {
            if resp.is_live(now) {
                let mut receipt: Receipt = serde_json::from_value(resp.body.clone())
                    .map_err(|e| WalletError::Storage(e.to_string()))?;
                receipt.idempotent = true;
                return Ok(receipt);
            }
        }

        let user = state
            .accounts
            .get(&movement.account_id)
            .filter(|a| a.active)
            .cloned()
            .ok_or(WalletError::AccountNotFound(movement.account_id))?;

        let asset = state
            .asset_types
            .get(&user.asset_type_id)
            .cloned()
            .ok_or_else(|| WalletError::AssetNotFound(user.asset_type_id.to_string()))?;

        let role = movement.category.counterparty_role();
        let external_id = role.external_id(&asset.code);
        let counterparty = state
            .accounts
            .values()
            .find(|a| a.active && a.external_id.as_deref() == Some(external_id.as_str()))
            .cloned()
            .ok_or_else(|| {
                WalletError::Configuration(format!("missing system account {}", external_id))
            })?;

        if user.asset_type_id != counterparty.asset_type_id {
            return Err(WalletError::AssetMismatch);
        }

        let (debit, credit) = if movement.category.debits_user() {
            (&user, &counterparty)
        } else {
            (&counterparty, &user)
        };

        let debit_balance = state
            .balances
            .get(&debit.id)
            .map(|b| b.amount)
            .ok_or(WalletError::AccountNotFound(debit.id))?;
        let credit_balance = state
            .balances
            .get(&credit.id)
            .map(|b| b.amount)
            .ok_or(WalletError::AccountNotFound(credit.id))?;

        let debit_after = debit_balance - movement.magnitude;
        let credit_after = credit_balance + movement.magnitude;

        // Checked before anything is appended: USER accounts never go
        // negative, not even transiently.
        if debit.kind.is_user() && debit_after < Decimal::ZERO {
            return Err(WalletError::InsufficientBalance);
        }

        // Secondary defense: the reference already names a committed
        // transaction but its captured response is gone.
        if state
            .transactions
            .iter()
            .any(|t| t.reference == movement.reference)
        {
            return Err(WalletError::DuplicateReference(movement.reference.clone()));
        }

        let record = Transaction::new(
            movement.category,
            &movement.reference,
            movement.description.clone(),
            movement.metadata.clone(),
        );

        let debit_entry = JournalEntry::debit(
            record.id,
            debit.id,
            user.asset_type_id,
            movement.magnitude,
            debit_after,
        );
        let credit_entry = JournalEntry::credit(
            record.id,
            credit.id,
            user.asset_type_id,
            movement.magnitude,
            credit_after,
        );
        state.journal.push(debit_entry);
        state.journal.push(credit_entry);

        for (account_id, amount) in [(debit.id, debit_after), (credit.id, credit_after)] {
            if let Some(row) = state.balances.get_mut(&account_id) {
                row.amount = amount;
                row.version += 1;
                row.updated_at = now;
            }
        }

        let user_balance_after = if movement.category.debits_user() {
            debit_after
        } else {
            credit_after
        };

        let receipt = Receipt {
            transaction_id: record.id,
            reference_id: movement.reference.clone(),
            category: movement.category,
            account_id: user.id,
            amount: movement.magnitude,
            balance_after: user_balance_after,
            description: movement.description.clone(),
            created_at: record.created_at,
            idempotent: false,
        };
        state.transactions.push(record);

        let body = serde_json::to_value(&receipt)
            .map_err(|e| WalletError::Storage(e.to_string()))?;
        let captured = StoredResponse::capture(
            &movement.reference,
            CAPTURED_STATUS_CREATED,
            body,
            self.idempotency_ttl,
        );
        state
            .responses
            .entry(movement.reference.clone())
            .or_insert(captured);

        Ok(receipt)
    }

    async fn balance(&self, account_id: Uuid) -> Result<BalanceSnapshot, WalletError> {
        let state = self.state.lock().unwrap();
        let account = state
            .accounts
            .get(&account_id)
            .filter(|a| a.active)
            .ok_or(WalletError::AccountNotFound(account_id))?;
        let row = state
            .balances
            .get(&account_id)
            .ok_or(WalletError::AccountNotFound(account_id))?;
        let asset = state
            .asset_types
            .get(&account.asset_type_id)
            .ok_or_else(|| WalletError::AssetNotFound(account.asset_type_id.to_string()))?;

        Ok(BalanceSnapshot {
            account_id,
            asset_code: asset.code.clone(),
            asset_name: asset.display_name.clone(),
            balance: row.amount,
            version: row.version,
            updated_at: row.updated_at,
        })
    }

    async fn history(
        &self,
        account_id: Uuid,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, WalletError> {
        let state = self.state.lock().unwrap();
        if !state
            .accounts
            .get(&account_id)
            .map(|a| a.active)
            .unwrap_or(false)
        {
            return Err(WalletError::AccountNotFound(account_id));
        }

        let mut rows: Vec<(&JournalEntry, &Transaction)> = state
            .journal
            .iter()
            .filter(|e| e.account_id == account_id)
            .filter_map(|e| {
                state
                    .transactions
                    .iter()
                    .find(|t| t.id == e.transaction_id)
                    .map(|t| (e, t))
            })
            .filter(|(_, t)| query.category.map_or(true, |c| t.category == c))
            .collect();

        rows.sort_by(|(ea, ta), (eb, tb)| {
            tb.created_at
                .cmp(&ta.created_at)
                .then_with(|| eb.id.cmp(&ea.id))
        });

        let total = rows.len() as i64;
        let entries = rows
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .map(|(entry, tx)| HistoryEntry {
                transaction_id: tx.id,
                category: tx.category,
                reference: tx.reference.clone(),
                amount: -entry.amount,
                balance_after: entry.balance_after,
                description: tx.description.clone(),
                created_at: tx.created_at,
            })
            .collect();

        Ok(HistoryPage {
            entries,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    async fn audit(&self, account_id: Uuid) -> Result<AuditReport, WalletError> {
        let state = self.state.lock().unwrap();
        let row = state
            .balances
            .get(&account_id)
            .ok_or(WalletError::AccountNotFound(account_id))?;

        let mut journal_sum = Decimal::ZERO;
        let mut entry_count = 0i64;
        for entry in state.journal.iter().filter(|e| e.account_id == account_id) {
            journal_sum += entry.amount;
            entry_count += 1;
        }

        Ok(AuditReport::evaluate(
            account_id,
            row.amount,
            journal_sum,
            entry_count,
        ))
    }

    async fn purge_expired_responses(&self) -> Result<u64, WalletError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let before = state.responses.len();
        state.responses.retain(|_, resp| resp.is_live(now));
        Ok((before - state.responses.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::SystemRole;
    use crate::transaction::TransactionCategory;
    use rust_decimal_macros::dec;
    use serde_json::json;

    async fn seed() -> (MemoryStore, AssetType, Uuid) {
        let store = MemoryStore::new();
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
        (store, asset, alice_id)
    }

    fn movement(category: TransactionCategory, account_id: Uuid, amount: Decimal, reference: &str) -> Movement {
        Movement {
            category,
            account_id,
            magnitude: amount,
            reference: reference.to_string(),
            description: None,
            metadata: json!({}),
        }
    }

    async fn top_up(store: &MemoryStore, account_id: Uuid, amount: Decimal, reference: &str) -> Receipt {
        store
            .execute_movement(&movement(TransactionCategory::TopUp, account_id, amount, reference))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn top_up_credits_the_user_and_debits_the_treasury() {
        let (store, asset, alice) = seed().await;
        let receipt = top_up(&store, alice, dec!(100), "r1").await;

        assert_eq!(receipt.balance_after, dec!(100));
        assert!(!receipt.idempotent);
        assert_eq!(store.balance(alice).await.unwrap().balance, dec!(100));

        let treasury_id = {
            let external_id = SystemRole::Treasury.external_id(&asset.code);
            let state = store.state.lock().unwrap();
            state
                .accounts
                .values()
                .find(|a| a.external_id.as_deref() == Some(external_id.as_str()))
                .unwrap()
                .id
        };
        let audit = store.audit(treasury_id).await.unwrap();
        assert_eq!(audit.cached_balance, dec!(-100));
        assert!(audit.is_consistent);
    }

    #[tokio::test]
    async fn every_transaction_sums_to_zero() {
        let (store, _asset, alice) = seed().await;
        top_up(&store, alice, dec!(500), "r1").await;
        store
            .execute_movement(&movement(TransactionCategory::Bonus, alice, dec!(25), "r2"))
            .await
            .unwrap();
        store
            .execute_movement(&movement(TransactionCategory::Spend, alice, dec!(30), "r3"))
            .await
            .unwrap();

        let journal = store.journal_entries();
        assert_eq!(journal.len(), 6);

        let mut sums: HashMap<Uuid, Decimal> = HashMap::new();
        for entry in &journal {
            *sums.entry(entry.transaction_id).or_insert(Decimal::ZERO) += entry.amount;
        }
        assert_eq!(sums.len(), 3);
        assert!(sums.values().all(|sum| *sum == Decimal::ZERO));
    }

    #[tokio::test]
    async fn replay_returns_the_captured_receipt_and_changes_nothing() {
        let (store, _asset, alice) = seed().await;
        let fresh = top_up(&store, alice, dec!(100), "r1").await;
        let journal_before = store.journal_entries().len();

        let replay = top_up(&store, alice, dec!(100), "r1").await;
        assert!(replay.idempotent);

        // Identical as a value, modulo the replay flag.
        let mut unflagged = replay.clone();
        unflagged.idempotent = false;
        assert_eq!(unflagged, fresh);

        assert_eq!(store.journal_entries().len(), journal_before);
        assert_eq!(store.balance(alice).await.unwrap().balance, dec!(100));
    }

    #[tokio::test]
    async fn spend_of_exact_balance_leaves_zero() {
        let (store, _asset, alice) = seed().await;
        top_up(&store, alice, dec!(50), "r1").await;

        let receipt = store
            .execute_movement(&movement(TransactionCategory::Spend, alice, dec!(50), "r2"))
            .await
            .unwrap();
        assert_eq!(receipt.balance_after, Decimal::ZERO);
    }

    #[tokio::test]
    async fn spend_one_ulp_over_balance_is_rejected_with_no_entries() {
        let (store, _asset, alice) = seed().await;
        top_up(&store, alice, dec!(50), "r1").await;
        let journal_before = store.journal_entries().len();

        let result = store
            .execute_movement(&movement(
                TransactionCategory::Spend,
                alice,
                dec!(50.00000001),
                "r2",
            ))
            .await;
        assert!(matches!(result, Err(WalletError::InsufficientBalance)));
        assert_eq!(store.journal_entries().len(), journal_before);
        assert_eq!(store.balance(alice).await.unwrap().balance, dec!(50));
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let (store, _asset, _alice) = seed().await;
        let result = store
            .execute_movement(&movement(
                TransactionCategory::TopUp,
                Uuid::now_v7(),
                dec!(100),
                "r1",
            ))
            .await;
        assert!(matches!(result, Err(WalletError::AccountNotFound(_))));
        assert!(store.journal_entries().is_empty());
    }

    #[tokio::test]
    async fn compensating_postings_restore_both_balances() {
        let (store, _asset, alice) = seed().await;
        top_up(&store, alice, dec!(200), "seed").await;

        store
            .execute_movement(&movement(TransactionCategory::Spend, alice, dec!(75), "out"))
            .await
            .unwrap();
        store
            .execute_movement(&movement(TransactionCategory::TopUp, alice, dec!(75), "back"))
            .await
            .unwrap();

        assert_eq!(store.balance(alice).await.unwrap().balance, dec!(200));
        let audit = store.audit(alice).await.unwrap();
        assert!(audit.is_consistent);
        assert_eq!(audit.entry_count, 3);
    }

    #[tokio::test]
    async fn balance_versions_increase_strictly() {
        let (store, _asset, alice) = seed().await;
        let mut last = store.balance(alice).await.unwrap().version;
        for (i, amount) in [dec!(10), dec!(20), dec!(30)].iter().enumerate() {
            top_up(&store, alice, *amount, &format!("r{}", i)).await;
            let version = store.balance(alice).await.unwrap().version;
            assert!(version > last);
            last = version;
        }
    }

    #[tokio::test]
    async fn purged_response_with_surviving_transaction_is_a_duplicate() {
        let (store, _asset, alice) = seed().await;
        top_up(&store, alice, dec!(100), "r1").await;

        store.expire_response("r1");
        assert_eq!(store.purge_expired_responses().await.unwrap(), 1);

        let result = store
            .execute_movement(&movement(TransactionCategory::TopUp, alice, dec!(100), "r1"))
            .await;
        assert!(matches!(result, Err(WalletError::DuplicateReference(_))));
        assert_eq!(store.balance(alice).await.unwrap().balance, dec!(100));
    }

    #[tokio::test]
    async fn history_negates_amounts_and_filters_by_category() {
        let (store, _asset, alice) = seed().await;
        top_up(&store, alice, dec!(500), "r1").await;
        store
            .execute_movement(&movement(TransactionCategory::Spend, alice, dec!(30), "r2"))
            .await
            .unwrap();

        let page = store
            .history(alice, &HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        // Newest first: the spend, reported as an outflow.
        assert_eq!(page.entries[0].amount, dec!(-30));
        assert_eq!(page.entries[0].balance_after, dec!(470));
        assert_eq!(page.entries[1].amount, dec!(500));

        let spends = store
            .history(
                alice,
                &HistoryQuery {
                    category: Some(TransactionCategory::Spend),
                    ..HistoryQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(spends.total, 1);
        assert_eq!(spends.entries[0].reference, "r2");
    }
}
