//! Advertisement repository implementation
//!
//! Provides PostgreSQL-backed storage for post boosts and their order ledger.

use super::{corrupt_column, db_error, is_unique_violation};
use rentline_core::{
    models::{Advertisement, AdvertisementOrder, AdvertisementStatus},
    traits::{AdvertisementRepository, BoostChange, PostBoosts, Repository},
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const ADVERTISEMENT_COLUMNS: &str = r#"
    id, post_id, amount, duration_days, starts_at, ends_at, status,
    external_order_id, created_at, updated_at
"#;

/// PostgreSQL implementation of AdvertisementRepository
pub struct PgAdvertisementRepository {
    pool: PgPool,
}

impl PgAdvertisementRepository {
    /// Create a new advertisement repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Parse advertisement status from string
    fn parse_status(s: &str) -> AppResult<AdvertisementStatus> {
        AdvertisementStatus::from_str(s).ok_or_else(|| corrupt_column("advertisement status", s))
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> AppResult<()> {
        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })
    }

    /// Upsert the advertisement and insert its order row inside `tx`
    async fn save_in(
        tx: &mut Transaction<'static, Postgres>,
        advertisement: &Advertisement,
        order: Option<&AdvertisementOrder>,
    ) -> AppResult<Advertisement> {
        let order_id = order.map(|o| o.order_id.as_str());

        let sql = format!(
            r#"
            INSERT INTO advertisements (
                id, post_id, amount, duration_days, starts_at, ends_at, status,
                external_order_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                amount = EXCLUDED.amount,
                duration_days = EXCLUDED.duration_days,
                starts_at = EXCLUDED.starts_at,
                ends_at = EXCLUDED.ends_at,
                status = EXCLUDED.status,
                external_order_id = EXCLUDED.external_order_id,
                updated_at = EXCLUDED.updated_at
            RETURNING {}
            "#,
            ADVERTISEMENT_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, AdvertisementRow>(&sql)
            .bind(advertisement.id)
            .bind(advertisement.post_id)
            .bind(advertisement.amount)
            .bind(advertisement.duration_days)
            .bind(advertisement.starts_at)
            .bind(advertisement.ends_at)
            .bind(advertisement.status.to_string())
            .bind(&advertisement.external_order_id)
            .bind(advertisement.created_at)
            .bind(advertisement.updated_at)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| Self::order_error(order_id, "save advertisement", e))?;

        if let Some(order) = order {
            sqlx::query(
                r#"
                INSERT INTO advertisement_orders (
                    order_id, advertisement_id, amount, duration_days, created_at
                )
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&order.order_id)
            .bind(order.advertisement_id)
            .bind(order.amount)
            .bind(order.duration_days)
            .bind(order.created_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| Self::order_error(order_id, "record advertisement order", e))?;
        }

        row.try_into()
    }

    fn order_error(order_id: Option<&str>, action: &str, e: sqlx::Error) -> AppError {
        if is_unique_violation(&e) {
            let order_id = order_id.unwrap_or_default().to_string();
            warn!("Duplicate advertisement order: {}", order_id);
            return AppError::DuplicateOrder(order_id);
        }
        db_error(action, e)
    }
}

#[async_trait]
impl Repository<Advertisement, Uuid> for PgAdvertisementRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Advertisement>> {
        let sql = format!(
            "SELECT {} FROM advertisements WHERE id = $1",
            ADVERTISEMENT_COLUMNS
        );
        let result = sqlx::query_as::<sqlx::Postgres, AdvertisementRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find advertisement", e))?;

        result.map(Advertisement::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_all(&self, limit: i64, offset: i64) -> AppResult<Vec<Advertisement>> {
        let sql = format!(
            "SELECT {} FROM advertisements ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            ADVERTISEMENT_COLUMNS
        );
        let rows = sqlx::query_as::<sqlx::Postgres, AdvertisementRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("fetch advertisements", e))?;

        rows.into_iter().map(Advertisement::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn count(&self) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM advertisements")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("count advertisements", e))?;

        Ok(result.0)
    }

    #[instrument(skip(self, entity))]
    async fn create(&self, entity: &Advertisement) -> AppResult<Advertisement> {
        self.save_with_order(entity, None).await
    }

    #[instrument(skip(self, entity))]
    async fn update(&self, entity: &Advertisement) -> AppResult<Advertisement> {
        self.save_with_order(entity, None).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        debug!("Deleting advertisement: {}", id);

        let result = sqlx::query("DELETE FROM advertisements WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete advertisement", e))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AdvertisementRepository for PgAdvertisementRepository {
    #[instrument(skip(self))]
    async fn find_active_for_post(
        &self,
        post_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Advertisement>> {
        let sql = format!(
            r#"
            SELECT {} FROM advertisements
            WHERE post_id = $1 AND ends_at > $2
            ORDER BY ends_at DESC
            LIMIT 1
            "#,
            ADVERTISEMENT_COLUMNS
        );
        let result = sqlx::query_as::<sqlx::Postgres, AdvertisementRow>(&sql)
            .bind(post_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find active advertisement", e))?;

        result.map(Advertisement::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_order(&self, order_id: &str) -> AppResult<Option<AdvertisementOrder>> {
        let result = sqlx::query_as::<sqlx::Postgres, OrderRow>(
            r#"
            SELECT order_id, advertisement_id, amount, duration_days, created_at
            FROM advertisement_orders
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("find advertisement order", e))?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self, advertisement, order))]
    async fn save_with_order(
        &self,
        advertisement: &Advertisement,
        order: Option<&AdvertisementOrder>,
    ) -> AppResult<Advertisement> {
        debug!(
            "Saving advertisement {} for post {}",
            advertisement.id, advertisement.post_id
        );

        let mut tx = self.begin().await?;
        let saved = Self::save_in(&mut tx, advertisement, order).await?;
        Self::commit(tx).await?;

        Ok(saved)
    }

    #[instrument(skip(self, change))]
    async fn modify_for_post(
        &self,
        post_id: i64,
        advertisement_id: Option<Uuid>,
        now: DateTime<Utc>,
        change: &BoostChange<'_>,
    ) -> AppResult<Advertisement> {
        let mut tx = self.begin().await?;

        // Lock post row; every boost write of the post queues behind it
        sqlx::query_scalar::<sqlx::Postgres, i64>(
            "SELECT id FROM posts WHERE id = $1 FOR UPDATE",
        )
        .bind(post_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("lock post", e))?
        .ok_or_else(|| AppError::NotFound(format!("Post {}", post_id)))?;

        let running_sql = format!(
            r#"
            SELECT {} FROM advertisements
            WHERE post_id = $1 AND ends_at > $2
            ORDER BY ends_at DESC
            LIMIT 1
            "#,
            ADVERTISEMENT_COLUMNS
        );
        let running = sqlx::query_as::<sqlx::Postgres, AdvertisementRow>(&running_sql)
            .bind(post_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("find active advertisement", e))?
            .map(Advertisement::try_from)
            .transpose()?;

        let requested = match advertisement_id {
            Some(id) => {
                let sql = format!(
                    "SELECT {} FROM advertisements WHERE id = $1 AND post_id = $2",
                    ADVERTISEMENT_COLUMNS
                );
                sqlx::query_as::<sqlx::Postgres, AdvertisementRow>(&sql)
                    .bind(id)
                    .bind(post_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| db_error("find advertisement", e))?
                    .map(Advertisement::try_from)
                    .transpose()?
            }
            None => None,
        };

        let (advertisement, order) = change(PostBoosts { running, requested })?;
        let saved = Self::save_in(&mut tx, &advertisement, order.as_ref()).await?;
        Self::commit(tx).await?;

        debug!(
            "Saved advertisement {} for post {} under post lock",
            saved.id, post_id
        );
        Ok(saved)
    }

    #[instrument(skip(self))]
    async fn expire_ended(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE advertisements
            SET status = 'expired',
                updated_at = $1
            WHERE status = 'active'
                AND ends_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("expire advertisements", e))?;

        let expired = result.rows_affected();

        if expired > 0 {
            info!("Expired {} advertisements", expired);
        }

        Ok(expired)
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct AdvertisementRow {
    id: Uuid,
    post_id: i64,
    amount: Decimal,
    duration_days: i32,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    status: String,
    external_order_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AdvertisementRow> for Advertisement {
    type Error = AppError;

    fn try_from(row: AdvertisementRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            post_id: row.post_id,
            amount: row.amount,
            duration_days: row.duration_days,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            status: PgAdvertisementRepository::parse_status(&row.status)?,
            external_order_id: row.external_order_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    order_id: String,
    advertisement_id: Uuid,
    amount: Decimal,
    duration_days: i32,
    created_at: DateTime<Utc>,
}

impl From<OrderRow> for AdvertisementOrder {
    fn from(row: OrderRow) -> Self {
        Self {
            order_id: row.order_id,
            advertisement_id: row.advertisement_id,
            amount: row.amount,
            duration_days: row.duration_days,
            created_at: row.created_at,
        }
    }
}
