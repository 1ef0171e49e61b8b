//! Reservation repository implementation
//!
//! Provides PostgreSQL-backed storage for vehicle reservations. The unique
//! index on `reservation_number` backs the collision retry of the lifecycle.

use super::{corrupt_column, db_error, is_unique_violation};
use rentline_core::{
    models::{PickupMode, PricingBreakdown, Reservation, ReservationStatus},
    traits::{Repository, ReservationRepository},
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const RESERVATION_COLUMNS: &str = r#"
    id, reservation_number, agency_id, vehicle_id, client_id,
    pickup_date, return_date, pickup_mode,
    daily_rate, discount_amount, delivery_fee, equipment_cost, final_amount,
    status, cancellation_reason, paid_transaction_id, cancelled_at,
    created_at, updated_at
"#;

/// PostgreSQL implementation of ReservationRepository
pub struct PgReservationRepository {
    pool: PgPool,
}

impl PgReservationRepository {
    /// Create a new reservation repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Overwrite a reservation row, optionally only if `updated_at` still
    /// equals `seen_updated_at`; `None` when no row matched
    async fn write(
        &self,
        entity: &Reservation,
        seen_updated_at: Option<DateTime<Utc>>,
    ) -> AppResult<Option<Reservation>> {
        let sql = format!(
            r#"
            UPDATE reservations
            SET pickup_date = $2,
                return_date = $3,
                pickup_mode = $4,
                daily_rate = $5,
                discount_amount = $6,
                delivery_fee = $7,
                equipment_cost = $8,
                final_amount = $9,
                status = $10,
                cancellation_reason = $11,
                paid_transaction_id = $12,
                cancelled_at = $13,
                updated_at = $14
            WHERE id = $1
                AND ($15::timestamptz IS NULL OR updated_at = $15)
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        );

        sqlx::query_as::<sqlx::Postgres, ReservationRow>(&sql)
            .bind(entity.id)
            .bind(entity.pickup_date)
            .bind(entity.return_date)
            .bind(entity.pickup_mode.to_string())
            .bind(entity.pricing.daily_rate)
            .bind(entity.pricing.discount_amount)
            .bind(entity.pricing.delivery_fee)
            .bind(entity.pricing.equipment_cost)
            .bind(entity.final_amount)
            .bind(entity.status.to_string())
            .bind(&entity.cancellation_reason)
            .bind(&entity.paid_transaction_id)
            .bind(entity.cancelled_at)
            .bind(entity.updated_at)
            .bind(seen_updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("update reservation", e))?
            .map(Reservation::try_from)
            .transpose()
    }

    /// Parse reservation status from string
    fn parse_status(s: &str) -> AppResult<ReservationStatus> {
        ReservationStatus::from_str(s).ok_or_else(|| corrupt_column("reservation status", s))
    }

    /// Parse pickup mode from string
    fn parse_pickup_mode(s: &str) -> AppResult<PickupMode> {
        PickupMode::from_str(s).ok_or_else(|| corrupt_column("pickup mode", s))
    }
}

#[async_trait]
impl Repository<Reservation, Uuid> for PgReservationRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Reservation>> {
        debug!("Finding reservation by id: {}", id);

        let sql = format!("SELECT {} FROM reservations WHERE id = $1", RESERVATION_COLUMNS);
        let result = sqlx::query_as::<sqlx::Postgres, ReservationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find reservation", e))?;

        result.map(Reservation::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_all(&self, limit: i64, offset: i64) -> AppResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {} FROM reservations ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            RESERVATION_COLUMNS
        );
        let rows = sqlx::query_as::<sqlx::Postgres, ReservationRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("fetch reservations", e))?;

        rows.into_iter().map(Reservation::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn count(&self) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reservations")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("count reservations", e))?;

        Ok(result.0)
    }

    #[instrument(skip(self, entity))]
    async fn create(&self, entity: &Reservation) -> AppResult<Reservation> {
        debug!("Creating reservation: {}", entity.reservation_number);

        let sql = format!(
            r#"
            INSERT INTO reservations (
                id, reservation_number, agency_id, vehicle_id, client_id,
                pickup_date, return_date, pickup_mode,
                daily_rate, discount_amount, delivery_fee, equipment_cost, final_amount,
                status, cancellation_reason, paid_transaction_id, cancelled_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, ReservationRow>(&sql)
            .bind(entity.id)
            .bind(&entity.reservation_number)
            .bind(entity.agency_id)
            .bind(entity.vehicle_id)
            .bind(entity.client_id)
            .bind(entity.pickup_date)
            .bind(entity.return_date)
            .bind(entity.pickup_mode.to_string())
            .bind(entity.pricing.daily_rate)
            .bind(entity.pricing.discount_amount)
            .bind(entity.pricing.delivery_fee)
            .bind(entity.pricing.equipment_cost)
            .bind(entity.final_amount)
            .bind(entity.status.to_string())
            .bind(&entity.cancellation_reason)
            .bind(&entity.paid_transaction_id)
            .bind(entity.cancelled_at)
            .bind(entity.created_at)
            .bind(entity.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    warn!(
                        "Reservation number collision: {}",
                        entity.reservation_number
                    );
                    return AppError::DuplicateReservationNumber(
                        entity.reservation_number.clone(),
                    );
                }
                db_error("create reservation", e)
            })?;

        row.try_into()
    }

    #[instrument(skip(self, entity))]
    async fn update(&self, entity: &Reservation) -> AppResult<Reservation> {
        debug!("Updating reservation: {}", entity.id);

        self.write(entity, None)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Reservation {}", entity.id)))
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        debug!("Deleting reservation: {}", id);

        let result = sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete reservation", e))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ReservationRepository for PgReservationRepository {
    #[instrument(skip(self, entity), fields(reservation_id = %entity.id))]
    async fn update_if_unchanged(
        &self,
        entity: &Reservation,
        seen_updated_at: DateTime<Utc>,
    ) -> AppResult<Reservation> {
        if let Some(updated) = self.write(entity, Some(seen_updated_at)).await? {
            return Ok(updated);
        }

        if self.find_by_id(entity.id).await?.is_none() {
            return Err(AppError::NotFound(format!("Reservation {}", entity.id)));
        }

        warn!(
            "Reservation {} changed since {}; write rejected",
            entity.reservation_number, seen_updated_at
        );
        Err(AppError::ConcurrentUpdate(format!(
            "reservation {} changed since {}",
            entity.reservation_number, seen_updated_at
        )))
    }

    #[instrument(skip(self))]
    async fn find_by_number(&self, number: &str) -> AppResult<Option<Reservation>> {
        debug!("Finding reservation by number: {}", number);

        let sql = format!(
            "SELECT {} FROM reservations WHERE reservation_number = $1",
            RESERVATION_COLUMNS
        );
        let result = sqlx::query_as::<sqlx::Postgres, ReservationRow>(&sql)
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find reservation by number", e))?;

        result.map(Reservation::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_active(&self, limit: i64, offset: i64) -> AppResult<Vec<Reservation>> {
        let sql = format!(
            r#"
            SELECT {} FROM reservations
            WHERE cancelled_at IS NULL
                AND status NOT IN ('cancelled', 'completed')
            ORDER BY pickup_date ASC
            LIMIT $1 OFFSET $2
            "#,
            RESERVATION_COLUMNS
        );
        let rows = sqlx::query_as::<sqlx::Postgres, ReservationRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list active reservations", e))?;

        rows.into_iter().map(Reservation::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn list_by_client(
        &self,
        client_id: i64,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Reservation>> {
        let sql = format!(
            r#"
            SELECT {} FROM reservations
            WHERE client_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            RESERVATION_COLUMNS
        );
        let rows = sqlx::query_as::<sqlx::Postgres, ReservationRow>(&sql)
            .bind(client_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list client reservations", e))?;

        rows.into_iter().map(Reservation::try_from).collect()
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    reservation_number: String,
    agency_id: i64,
    vehicle_id: i64,
    client_id: i64,
    pickup_date: DateTime<Utc>,
    return_date: DateTime<Utc>,
    pickup_mode: String,
    daily_rate: Decimal,
    discount_amount: Decimal,
    delivery_fee: Decimal,
    equipment_cost: Decimal,
    final_amount: Decimal,
    status: String,
    cancellation_reason: Option<String>,
    paid_transaction_id: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = AppError;

    fn try_from(row: ReservationRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            reservation_number: row.reservation_number,
            agency_id: row.agency_id,
            vehicle_id: row.vehicle_id,
            client_id: row.client_id,
            pickup_date: row.pickup_date,
            return_date: row.return_date,
            pickup_mode: PgReservationRepository::parse_pickup_mode(&row.pickup_mode)?,
            pricing: PricingBreakdown {
                daily_rate: row.daily_rate,
                discount_amount: row.discount_amount,
                delivery_fee: row.delivery_fee,
                equipment_cost: row.equipment_cost,
            },
            final_amount: row.final_amount,
            status: PgReservationRepository::parse_status(&row.status)?,
            cancellation_reason: row.cancellation_reason,
            paid_transaction_id: row.paid_transaction_id,
            cancelled_at: row.cancelled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
