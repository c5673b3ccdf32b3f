//! Payment intent database layer
//!
//! PostgreSQL-based persistence for intents and the ledger outbox.
//! Status updates are CAS updates guarded by the expected status.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgRow;

use super::error::PaymentError;
use super::ledger::LedgerLeg;
use super::repository::{LedgerOutboxStore, OutboxRecord, PaymentIntentStore};
use super::state::PaymentIntentStatus;
use super::types::PaymentIntent;
use crate::core_types::{Mode, PaymentIntentId};
use crate::db::SafeRow;

pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_intent(row: &PgRow) -> Result<PaymentIntent, PaymentError> {
        let id: String = row.get_logged("id").map_err(PaymentError::Persistence)?;
        let mode: String = row.get_logged("mode").map_err(PaymentError::Persistence)?;
        let status: String = row.get_logged("status").map_err(PaymentError::Persistence)?;

        Ok(PaymentIntent {
            id: id
                .parse::<PaymentIntentId>()
                .map_err(|e| PaymentError::Persistence(e.to_string()))?,
            zone_id: row.get_logged("zone_id").map_err(PaymentError::Persistence)?,
            mode: mode.parse::<Mode>().map_err(PaymentError::Persistence)?,
            amount: row.get_logged("amount").map_err(PaymentError::Persistence)?,
            currency: row.get_logged("currency").map_err(PaymentError::Persistence)?,
            status: status
                .parse::<PaymentIntentStatus>()
                .map_err(PaymentError::Persistence)?,
            description: row.get_logged("description").map_err(PaymentError::Persistence)?,
            user_id: row.get_logged("user_id").map_err(PaymentError::Persistence)?,
            application_fee_amount: row
                .get_logged("application_fee_amount")
                .map_err(PaymentError::Persistence)?,
            on_behalf_of: row.get_logged("on_behalf_of").map_err(PaymentError::Persistence)?,
            decline_code: row.get_logged("decline_code").map_err(PaymentError::Persistence)?,
            created_at: row.get_logged("created_at").map_err(PaymentError::Persistence)?,
            updated_at: row.get_logged("updated_at").map_err(PaymentError::Persistence)?,
        })
    }

    fn row_to_outbox(row: &PgRow) -> Result<OutboxRecord, PaymentError> {
        let mode: String = row.get_logged("mode").map_err(PaymentError::Persistence)?;
        Ok(OutboxRecord {
            id: row.get_logged("id").map_err(PaymentError::Persistence)?,
            payment_intent_id: row
                .get_logged("payment_intent_id")
                .map_err(PaymentError::Persistence)?,
            leg: LedgerLeg {
                account_id: row.get_logged("account_id").map_err(PaymentError::Persistence)?,
                amount: row.get_logged("amount").map_err(PaymentError::Persistence)?,
                currency: row.get_logged("currency").map_err(PaymentError::Persistence)?,
                description: row.get_logged("description").map_err(PaymentError::Persistence)?,
                reference_id: row.get_logged("reference_id").map_err(PaymentError::Persistence)?,
                zone_id: row.get_logged("zone_id").map_err(PaymentError::Persistence)?,
                mode: mode.parse::<Mode>().map_err(PaymentError::Persistence)?,
            },
            attempts: row.get_logged("attempts").map_err(PaymentError::Persistence)?,
        })
    }
}

#[async_trait]
impl PaymentIntentStore for PgPaymentStore {
    async fn insert(&self, intent: &PaymentIntent) -> Result<(), PaymentError> {
        sqlx::query(
            r#"
            INSERT INTO payment_intents_tb
                (id, zone_id, mode, amount, currency, status, description, user_id,
                 application_fee_amount, on_behalf_of, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(intent.id.to_string())
        .bind(&intent.zone_id)
        .bind(intent.mode.as_str())
        .bind(intent.amount)
        .bind(&intent.currency)
        .bind(intent.status.as_str())
        .bind(&intent.description)
        .bind(&intent.user_id)
        .bind(intent.application_fee_amount)
        .bind(&intent.on_behalf_of)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &PaymentIntentId) -> Result<Option<PaymentIntent>, PaymentError> {
        let row = sqlx::query(
            r#"
            SELECT id, zone_id, mode, amount, currency, status, description, user_id,
                   application_fee_amount, on_behalf_of, decline_code, created_at, updated_at
            FROM payment_intents_tb
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_intent).transpose()
    }

    async fn transition(
        &self,
        id: &PaymentIntentId,
        expected: PaymentIntentStatus,
        next: PaymentIntentStatus,
        decline_code: Option<&str>,
        outbox_legs: &[LedgerLeg],
    ) -> Result<bool, PaymentError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE payment_intents_tb
            SET status = $1, decline_code = COALESCE($2, decline_code), updated_at = NOW()
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(next.as_str())
        .bind(decline_code)
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for leg in outbox_legs {
            sqlx::query(
                r#"
                INSERT INTO ledger_outbox_tb
                    (payment_intent_id, account_id, amount, currency, description,
                     reference_id, zone_id, mode)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (reference_id) DO NOTHING
                "#,
            )
            .bind(id.to_string())
            .bind(&leg.account_id)
            .bind(leg.amount)
            .bind(&leg.currency)
            .bind(&leg.description)
            .bind(&leg.reference_id)
            .bind(&leg.zone_id)
            .bind(leg.mode.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl LedgerOutboxStore for PgPaymentStore {
    async fn fetch_undispatched(&self, limit: usize) -> Result<Vec<OutboxRecord>, PaymentError> {
        let rows = sqlx::query(
            r#"
            SELECT id, payment_intent_id, account_id, amount, currency, description,
                   reference_id, zone_id, mode, attempts
            FROM ledger_outbox_tb
            WHERE dispatched_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_dispatched(&self, id: i64, transaction_id: &str) -> Result<(), PaymentError> {
        sqlx::query(
            r#"
            UPDATE ledger_outbox_tb
            SET dispatched_at = NOW(), ledger_transaction_id = $1, attempts = attempts + 1
            WHERE id = $2 AND dispatched_at IS NULL
            "#,
        )
        .bind(transaction_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_attempt_failure(&self, id: i64, error: &str) -> Result<(), PaymentError> {
        sqlx::query(
            "UPDATE ledger_outbox_tb SET attempts = attempts + 1, last_error = $1 WHERE id = $2",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
