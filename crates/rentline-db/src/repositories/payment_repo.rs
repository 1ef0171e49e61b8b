//! Payment repository implementation
//!
//! Provides PostgreSQL-backed storage for payment captures. Two constraints
//! guard the money path: the unique `transaction_id` and the partial unique
//! index allowing one completed payment per reservation.

use super::{corrupt_column, db_error, is_unique_violation, violated_constraint};
use rentline_core::{
    models::{Payment, PaymentStatus},
    traits::{PaymentRepository, Repository},
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Partial unique index: one completed payment per reservation
const ONE_COMPLETED_INDEX: &str = "idx_payments_one_completed";

const PAYMENT_COLUMNS: &str = r#"
    id, reservation_id, transaction_id, amount, currency, status, payload,
    created_at, updated_at
"#;

/// PostgreSQL implementation of PaymentRepository
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    /// Create a new payment repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse payment status from string
    fn parse_status(s: &str) -> AppResult<PaymentStatus> {
        PaymentStatus::from_str(s).ok_or_else(|| corrupt_column("payment status", s))
    }

    /// Translate a write failure into the matching domain error
    fn write_error(action: &str, entity: &Payment, e: sqlx::Error) -> AppError {
        if is_unique_violation(&e) {
            if violated_constraint(&e).as_deref() == Some(ONE_COMPLETED_INDEX) {
                warn!(
                    "Reservation {} already has a completed payment",
                    entity.reservation_id
                );
                return AppError::AlreadyPaid(entity.reservation_id.to_string());
            }
            warn!("Duplicate transaction id: {}", entity.transaction_id);
            return AppError::DuplicateTransaction(entity.transaction_id.clone());
        }
        db_error(action, e)
    }
}

#[async_trait]
impl Repository<Payment, Uuid> for PgPaymentRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        let result = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find payment", e))?;

        result.map(Payment::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_all(&self, limit: i64, offset: i64) -> AppResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("fetch payments", e))?;

        rows.into_iter().map(Payment::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn count(&self) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM payments")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("count payments", e))?;

        Ok(result.0)
    }

    #[instrument(skip(self, entity))]
    async fn create(&self, entity: &Payment) -> AppResult<Payment> {
        debug!(
            "Recording payment {} for reservation {}",
            entity.transaction_id, entity.reservation_id
        );

        let sql = format!(
            r#"
            INSERT INTO payments (
                id, reservation_id, transaction_id, amount, currency, status, payload,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&sql)
            .bind(entity.id)
            .bind(entity.reservation_id)
            .bind(&entity.transaction_id)
            .bind(entity.amount)
            .bind(&entity.currency)
            .bind(entity.status.to_string())
            .bind(&entity.payload)
            .bind(entity.created_at)
            .bind(entity.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Self::write_error("create payment", entity, e))?;

        row.try_into()
    }

    #[instrument(skip(self, entity))]
    async fn update(&self, entity: &Payment) -> AppResult<Payment> {
        debug!("Updating payment: {}", entity.id);

        let sql = format!(
            r#"
            UPDATE payments
            SET status = $2,
                payload = $3,
                updated_at = $4
            WHERE id = $1
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&sql)
            .bind(entity.id)
            .bind(entity.status.to_string())
            .bind(&entity.payload)
            .bind(entity.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Self::write_error("update payment", entity, e))?
            .ok_or_else(|| AppError::NotFound(format!("Payment {}", entity.id)))?;

        row.try_into()
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        debug!("Deleting payment: {}", id);

        let result = sqlx::query("DELETE FROM payments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete payment", e))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    #[instrument(skip(self))]
    async fn find_by_transaction_id(&self, transaction_id: &str) -> AppResult<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE transaction_id = $1",
            PAYMENT_COLUMNS
        );
        let result = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&sql)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find payment by transaction", e))?;

        result.map(Payment::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_reservation(&self, reservation_id: Uuid) -> AppResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE reservation_id = $1 ORDER BY created_at ASC",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&sql)
            .bind(reservation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list reservation payments", e))?;

        rows.into_iter().map(Payment::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn find_completed_for_reservation(
        &self,
        reservation_id: Uuid,
    ) -> AppResult<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE reservation_id = $1 AND status = 'completed'",
            PAYMENT_COLUMNS
        );
        let result = sqlx::query_as::<sqlx::Postgres, PaymentRow>(&sql)
            .bind(reservation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find completed payment", e))?;

        result.map(Payment::try_from).transpose()
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    reservation_id: Uuid,
    transaction_id: String,
    amount: Decimal,
    currency: String,
    status: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = AppError;

    fn try_from(row: PaymentRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            reservation_id: row.reservation_id,
            transaction_id: row.transaction_id,
            amount: row.amount,
            currency: row.currency.trim().to_string(),
            status: PgPaymentRepository::parse_status(&row.status)?,
            payload: row.payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(
            PgPaymentRepository::parse_status("completed"),
            Ok(PaymentStatus::Completed)
        );
        assert_eq!(
            PgPaymentRepository::parse_status("refunded"),
            Ok(PaymentStatus::Refunded)
        );
        assert!(matches!(
            PgPaymentRepository::parse_status("garbage"),
            Err(AppError::Internal(_))
        ));
    }
}
