// coffer/src/idempotency.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status captured for a fresh successful movement.
pub const CAPTURED_STATUS_CREATED: i16 = 201;

/// A captured response keyed by the caller-supplied reference. Written
/// in the same transaction as the effects it represents, read at the
/// start of every mutating flow, ignored once expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    pub reference: String,
    pub status: i16,
    pub body: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StoredResponse {
    pub fn capture(reference: &str, status: i16, body: Value, ttl: std::time::Duration) -> Self {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(24));
        Self {
            reference: reference.to_string(),
            status,
            body,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
