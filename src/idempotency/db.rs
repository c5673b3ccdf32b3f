//! PostgreSQL-backed idempotency store.
//!
//! The (actor_id, idempotency_key) primary key makes the table insert-only:
//! `ON CONFLICT DO NOTHING` lets a losing concurrent writer fall through
//! without touching the winner's row.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::time::Duration;

use super::store::{CachedResponse, IdempotencyError, IdempotencyStore, SaveOutcome};

pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn lookup(
        &self,
        actor: &str,
        key: &str,
    ) -> Result<Option<CachedResponse>, IdempotencyError> {
        let row = sqlx::query(
            r#"
            SELECT status_code, content_type, response_body
            FROM idempotency_keys_tb
            WHERE actor_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(actor)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CachedResponse {
            status_code: row.get::<i16, _>("status_code") as u16,
            content_type: row.get("content_type"),
            body: row.get("response_body"),
        }))
    }

    async fn save(
        &self,
        actor: &str,
        key: &str,
        response: &CachedResponse,
    ) -> Result<SaveOutcome, IdempotencyError> {
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_keys_tb
                (actor_id, idempotency_key, status_code, content_type, response_body, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (actor_id, idempotency_key) DO NOTHING
            "#,
        )
        .bind(actor)
        .bind(key)
        .bind(response.status_code as i16)
        .bind(&response.content_type)
        .bind(&response.body)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(SaveOutcome::Stored)
        } else {
            Ok(SaveOutcome::AlreadyExists)
        }
    }

    async fn purge_older_than(&self, age: Duration) -> Result<u64, IdempotencyError> {
        let result = sqlx::query(
            "DELETE FROM idempotency_keys_tb WHERE created_at < NOW() - INTERVAL '1 second' * $1",
        )
        .bind(age.as_secs() as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
