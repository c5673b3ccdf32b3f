//! Delivery idempotency gate.
//!
//! A `sent:<task id>` key is recorded after a successful send and checked
//! before the next one. Keys expire after a per-kind TTL.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::Instant;

use super::error::DeliveryError;

pub fn sent_key(task_id: &str) -> String {
    format!("sent:{}", task_id)
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Whether `key` was recorded and has not expired
    async fn is_sent(&self, key: &str) -> Result<bool, DeliveryError>;

    async fn mark_sent(&self, key: &str, ttl: Duration) -> Result<(), DeliveryError>;
}

#[derive(Default)]
pub struct InMemoryDedupStore {
    entries: DashMap<String, Instant>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired keys
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before - self.entries.len()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn is_sent(&self, key: &str) -> Result<bool, DeliveryError> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(expires_at) if *expires_at > now => return Ok(true),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, expires_at| *expires_at <= now);
        }
        Ok(false)
    }

    async fn mark_sent(&self, key: &str, ttl: Duration) -> Result<(), DeliveryError> {
        self.entries.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }
}

/// Dedup keys in `delivery_dedup_tb`, shared by every worker instance
pub struct PgDedupStore {
    pool: PgPool,
}

impl PgDedupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn purge_expired(&self) -> Result<u64, DeliveryError> {
        let result = sqlx::query("DELETE FROM delivery_dedup_tb WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DedupStore for PgDedupStore {
    async fn is_sent(&self, key: &str) -> Result<bool, DeliveryError> {
        let found = sqlx::query_scalar::<_, i32>(
            "SELECT 1 FROM delivery_dedup_tb WHERE dedup_key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn mark_sent(&self, key: &str, ttl: Duration) -> Result<(), DeliveryError> {
        sqlx::query(
            r#"
            INSERT INTO delivery_dedup_tb (dedup_key, expires_at)
            VALUES ($1, NOW() + INTERVAL '1 second' * $2)
            ON CONFLICT (dedup_key) DO UPDATE SET expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(ttl.as_secs() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
