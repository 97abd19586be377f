//! Claim-check store for inbound message ids.
//!
//! The bus delivers at least once. Before applying a counter delta the
//! reconciler claims the message's idempotency key; a second claim of the same
//! key fails and the delivery is dropped. A claim is released again when
//! applying the delta fails, so the bus redelivery can retry it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::PgPool;

use crate::author_store::StoreError;

#[async_trait]
pub trait ProcessedMessages: Send + Sync {
    /// Record `key` as processed. `false` when it was already claimed.
    async fn claim(&self, key: &str) -> Result<bool, StoreError>;

    /// Forget a claim so a later delivery can be applied.
    async fn release(&self, key: &str) -> Result<(), StoreError>;
}

/// Time-boxed in-memory set of processed keys.
///
/// Keys older than the TTL are pruned on each claim; a redelivery arriving after
/// that window is treated as new.
#[derive(Debug)]
pub struct InMemoryProcessedMessages {
    ttl: Duration,
    claimed: Mutex<HashMap<String, Instant>>,
}

impl InMemoryProcessedMessages {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            claimed: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ProcessedMessages for InMemoryProcessedMessages {
    async fn claim(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut claimed = self.claimed.lock().map_err(|_| StoreError::Poisoned)?;
        claimed.retain(|_, at| now.duration_since(*at) < self.ttl);

        if claimed.contains_key(key) {
            return Ok(false);
        }
        claimed.insert(key.to_string(), now);
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<(), StoreError> {
        let mut claimed = self.claimed.lock().map_err(|_| StoreError::Poisoned)?;
        claimed.remove(key);
        Ok(())
    }
}

/// Postgres claim check: a unique-constraint insert into `processed_messages`.
///
/// Rows older than the TTL are purged lazily on claim.
pub struct PostgresProcessedMessages {
    pool: Arc<PgPool>,
    ttl: Duration,
}

impl PostgresProcessedMessages {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            ttl,
        }
    }
}

#[async_trait]
impl ProcessedMessages for PostgresProcessedMessages {
    async fn claim(&self, key: &str) -> Result<bool, StoreError> {
        sqlx::query("DELETE FROM processed_messages WHERE processed_at < NOW() - make_interval(secs => $1)")
            .bind(self.ttl.as_secs_f64())
            .execute(&*self.pool)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO processed_messages (message_key)
            VALUES ($1)
            ON CONFLICT (message_key) DO NOTHING
            "#,
        )
        .bind(key)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM processed_messages WHERE message_key = $1")
            .bind(key)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }
}
