//! Post repository implementation
//!
//! Posts are published by the listing side of the marketplace; this
//! repository reads them and persists their rating counters.

use super::db_error;
use rentline_core::{
    models::{Post, PostRating},
    traits::{PostRepository, RatingChange, Repository},
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error, instrument};

const POST_COLUMNS: &str = r#"
    id, agency_id, vehicle_id, title,
    one_star, two_star, three_star, four_star, five_star,
    total_reviews, average_rating, created_at, updated_at
"#;

/// PostgreSQL implementation of PostRepository
pub struct PgPostRepository {
    pool: PgPool,
}

impl PgPostRepository {
    /// Create a new post repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write_rating<'e, E>(executor: E, post_id: i64, rating: &PostRating) -> AppResult<Post>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let sql = format!(
            r#"
            UPDATE posts
            SET one_star = $2,
                two_star = $3,
                three_star = $4,
                four_star = $5,
                five_star = $6,
                total_reviews = $7,
                average_rating = $8,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            POST_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, PostRow>(&sql)
            .bind(post_id)
            .bind(rating.one_star)
            .bind(rating.two_star)
            .bind(rating.three_star)
            .bind(rating.four_star)
            .bind(rating.five_star)
            .bind(rating.total_reviews)
            .bind(rating.average_rating)
            .fetch_optional(executor)
            .await
            .map_err(|e| db_error("update post rating", e))?
            .ok_or_else(|| AppError::NotFound(format!("Post {}", post_id)))?;

        Ok(row.into())
    }
}

#[async_trait]
impl Repository<Post, i64> for PgPostRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<Post>> {
        let sql = format!("SELECT {} FROM posts WHERE id = $1", POST_COLUMNS);
        let result = sqlx::query_as::<sqlx::Postgres, PostRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find post", e))?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_all(&self, limit: i64, offset: i64) -> AppResult<Vec<Post>> {
        let sql = format!(
            "SELECT {} FROM posts ORDER BY id LIMIT $1 OFFSET $2",
            POST_COLUMNS
        );
        let rows = sqlx::query_as::<sqlx::Postgres, PostRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("fetch posts", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn count(&self) -> AppResult<i64> {
        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("count posts", e))?;

        Ok(result.0)
    }

    #[instrument(skip(self, entity))]
    async fn create(&self, entity: &Post) -> AppResult<Post> {
        debug!("Creating post: {}", entity.title);

        let sql = format!(
            r#"
            INSERT INTO posts (
                agency_id, vehicle_id, title,
                one_star, two_star, three_star, four_star, five_star,
                total_reviews, average_rating
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            POST_COLUMNS
        );

        let rating = &entity.rating;
        let row = sqlx::query_as::<sqlx::Postgres, PostRow>(&sql)
            .bind(entity.agency_id)
            .bind(entity.vehicle_id)
            .bind(&entity.title)
            .bind(rating.one_star)
            .bind(rating.two_star)
            .bind(rating.three_star)
            .bind(rating.four_star)
            .bind(rating.five_star)
            .bind(rating.total_reviews)
            .bind(rating.average_rating)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("create post", e))?;

        Ok(row.into())
    }

    #[instrument(skip(self, entity))]
    async fn update(&self, entity: &Post) -> AppResult<Post> {
        let sql = format!(
            r#"
            UPDATE posts
            SET agency_id = $2,
                vehicle_id = $3,
                title = $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            POST_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, PostRow>(&sql)
            .bind(entity.id)
            .bind(entity.agency_id)
            .bind(entity.vehicle_id)
            .bind(&entity.title)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("update post", e))?
            .ok_or_else(|| AppError::NotFound(format!("Post {}", entity.id)))?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete post", e))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PostRepository for PgPostRepository {
    #[instrument(skip(self, rating))]
    async fn update_rating(&self, post_id: i64, rating: &PostRating) -> AppResult<Post> {
        debug!(
            "Updating rating of post {}: total={}, average={}",
            post_id, rating.total_reviews, rating.average_rating
        );

        Self::write_rating(&self.pool, post_id, rating).await
    }

    #[instrument(skip(self, change))]
    async fn modify_rating(&self, post_id: i64, change: &RatingChange<'_>) -> AppResult<Post> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        // Lock post row
        let sql = format!("SELECT {} FROM posts WHERE id = $1 FOR UPDATE", POST_COLUMNS);
        let post: Post = sqlx::query_as::<sqlx::Postgres, PostRow>(&sql)
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("lock post", e))?
            .ok_or_else(|| AppError::NotFound(format!("Post {}", post_id)))?
            .into();

        let mut rating = post.rating;
        change(&mut rating)?;

        let updated = Self::write_rating(&mut *tx, post_id, &rating).await?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        debug!(
            "Post {} rating now total={}, average={}",
            post_id, updated.rating.total_reviews, updated.rating.average_rating
        );
        Ok(updated)
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct PostRow {
    id: i64,
    agency_id: i64,
    vehicle_id: i64,
    title: String,
    one_star: i32,
    two_star: i32,
    three_star: i32,
    four_star: i32,
    five_star: i32,
    total_reviews: i32,
    average_rating: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            agency_id: row.agency_id,
            vehicle_id: row.vehicle_id,
            title: row.title,
            rating: PostRating {
                one_star: row.one_star,
                two_star: row.two_star,
                three_star: row.three_star,
                four_star: row.four_star,
                five_star: row.five_star,
                total_reviews: row.total_reviews,
                average_rating: row.average_rating,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
