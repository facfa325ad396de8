// coffer/src/adapters/postgres/session.rs
//! Scoped serializable session support: every movement runs inside one
//! SERIALIZABLE transaction, and the two transient conflict classes
//! (serialization failure, deadlock) are retried with capped exponential
//! backoff. Everything else rolls back and propagates.

use std::time::Duration;

use rand::Rng;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};

use crate::error::WalletError;

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3 }
    }
}

impl RetryPolicy {
    /// `min(50 * 2^attempt + jitter, 2000)` milliseconds.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = 50u64.saturating_mul(1u64 << attempt.min(16));
        let jitter = rand::thread_rng().gen_range(0..25u64);
        Duration::from_millis((base + jitter).min(2_000))
    }
}

/// Map a driver error into the core taxonomy. Serialization failures and
/// deadlocks become `Conflict` (swallowed by the retry loop); pool
/// exhaustion and connection loss become `Unavailable` and are not
/// retried.
pub(crate) fn classify(err: sqlx::Error) -> WalletError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                WalletError::Conflict(db.message().to_string())
            }
            _ => WalletError::Storage(err.to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            WalletError::Unavailable(err.to_string())
        }
        _ => WalletError::Storage(err.to_string()),
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

pub(crate) async fn begin_serializable(
    pool: &PgPool,
) -> Result<Transaction<'static, Postgres>, WalletError> {
    let mut tx = pool.begin().await.map_err(classify)?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await
        .map_err(classify)?;
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped_at_two_seconds() {
        let policy = RetryPolicy::default();
        assert!(policy.backoff(0) >= Duration::from_millis(50));
        assert!(policy.backoff(0) < Duration::from_millis(100));
        assert!(policy.backoff(1) >= Duration::from_millis(100));
        assert_eq!(policy.backoff(30), Duration::from_millis(2_000));
    }
}
