//! PostgreSQL pool shared by the durable stores

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::time::Duration;

use crate::config::PoolSection;

pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str, sizing: &PoolSection) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(sizing.max_connections.max(1))
            .acquire_timeout(Duration::from_millis(sizing.acquire_timeout_ms))
            .connect(database_url)
            .await?;

        tracing::info!(
            max_connections = sizing.max_connections,
            "PostgreSQL pool ready"
        );
        Ok(Self { pool })
    }

    /// Bring the schema for intents, outbox, idempotency, dedup and DLQ up to date
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Schema migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip used by `/health`
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
    }
}

/// Column access that names the offending column when a row does not decode.
/// Store code maps the message into its own error type.
pub trait SafeRow {
    fn get_logged<'r, T>(&'r self, column: &str) -> Result<T, String>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>;
}

impl SafeRow for PgRow {
    fn get_logged<'r, T>(&'r self, column: &str) -> Result<T, String>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        use sqlx::Row;
        self.try_get(column).map_err(|e| {
            tracing::error!(column, error = %e, "Row decode failed");
            format!("decode {}: {}", column, e)
        })
    }
}
