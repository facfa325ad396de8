// coffer/src/account.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::asset::AssetType;

/// SYSTEM accounts are unbounded counterparties (treasury, bonus pool,
/// revenue) and may carry a negative balance. USER accounts never go
/// below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountKind {
    System,
    User,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::User => "USER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SYSTEM" => Some(Self::System),
            "USER" => Some(Self::User),
            _ => None,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User)
    }
}

/// Role of a system counterparty account. Each asset type carries one
/// account per role, addressable by a stable external id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemRole {
    Treasury,
    BonusPool,
    Revenue,
}

impl SystemRole {
    pub const ALL: [SystemRole; 3] = [Self::Treasury, Self::BonusPool, Self::Revenue];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Treasury => "treasury",
            Self::BonusPool => "bonus_pool",
            Self::Revenue => "revenue",
        }
    }

    /// The well-known external id of this role's account for an asset,
    /// e.g. `treasury:DIA`.
    pub fn external_id(&self, asset_code: &str) -> String {
        format!("{}:{}", self.as_str(), asset_code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub kind: AccountKind,
    pub asset_type_id: Uuid,
    pub display_name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn user(asset_type_id: Uuid, display_name: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            external_id: None,
            kind: AccountKind::User,
            asset_type_id,
            display_name: display_name.to_string(),
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn system(role: SystemRole, asset: &AssetType) -> Self {
        Self {
            id: Uuid::now_v7(),
            external_id: Some(role.external_id(&asset.code)),
            kind: AccountKind::System,
            asset_type_id: asset.id,
            display_name: format!("{} ({})", role.as_str(), asset.code),
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// An account together with its balance-cache row, as returned by
/// `lock_accounts` while the row lock is held.
#[derive(Debug, Clone)]
pub struct LockedAccount {
    pub account: Account,
    pub balance: Decimal,
    pub version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_external_ids_are_role_and_code() {
        let asset = AssetType::new("DIA", "Diamonds");
        let treasury = Account::system(SystemRole::Treasury, &asset);
        assert_eq!(treasury.external_id.as_deref(), Some("treasury:DIA"));
        assert_eq!(treasury.kind, AccountKind::System);
        assert_eq!(treasury.asset_type_id, asset.id);
    }

    #[test]
    fn kind_round_trips_through_text() {
        for kind in [AccountKind::System, AccountKind::User] {
            assert_eq!(AccountKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AccountKind::parse("ADMIN"), None);
    }
}
