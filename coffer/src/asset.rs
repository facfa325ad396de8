// coffer/src/asset.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetType {
    pub id: Uuid,
    pub code: String,
    pub display_name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl AssetType {
    pub fn new(code: &str, display_name: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            code: code.to_string(),
            display_name: display_name.to_string(),
            active: true,
            created_at: Utc::now(),
        }
    }
}
