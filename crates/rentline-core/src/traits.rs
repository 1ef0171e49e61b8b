//! Common traits for repositories and collaborators
//!
//! Defines the store abstraction the lifecycle services run against, plus
//! the outside collaborators they consult (clock, vehicle availability,
//! reservation numbering).

use crate::error::AppError;
use crate::AppResult;
use crate::models::{
    Advertisement, AdvertisementOrder, Payment, Post, PostRating, Reservation,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generic repository trait for CRUD operations
#[async_trait]
pub trait Repository<T, ID>: Send + Sync {
    /// Find entity by ID
    async fn find_by_id(&self, id: ID) -> Result<Option<T>, AppError>;

    /// Find all entities with pagination
    async fn find_all(&self, limit: i64, offset: i64) -> Result<Vec<T>, AppError>;

    /// Count total entities
    async fn count(&self) -> Result<i64, AppError>;

    /// Create a new entity
    async fn create(&self, entity: &T) -> Result<T, AppError>;

    /// Update an existing entity
    async fn update(&self, entity: &T) -> Result<T, AppError>;

    /// Delete entity by ID
    async fn delete(&self, id: ID) -> Result<bool, AppError>;
}

/// Reservation repository trait with specialized methods
///
/// `create` must fail with `AppError::DuplicateReservationNumber` when the
/// reservation number is already taken.
#[async_trait]
pub trait ReservationRepository: Repository<Reservation, Uuid> {
    /// Find reservation by its human-readable number
    async fn find_by_number(&self, number: &str) -> Result<Option<Reservation>, AppError>;

    /// Reservations that are neither cancelled nor completed
    async fn list_active(&self, limit: i64, offset: i64) -> Result<Vec<Reservation>, AppError>;

    /// Overwrite a reservation only if nobody changed it since it was read
    ///
    /// `seen_updated_at` is the `updated_at` the caller loaded. Fails with
    /// `AppError::ConcurrentUpdate` when the stored row moved on.
    async fn update_if_unchanged(
        &self,
        entity: &Reservation,
        seen_updated_at: DateTime<Utc>,
    ) -> Result<Reservation, AppError>;

    /// Every reservation of a client, cancelled ones included
    async fn list_by_client(
        &self,
        client_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Reservation>, AppError>;
}

/// Payment repository trait with specialized methods
///
/// `create` must fail with `AppError::DuplicateTransaction` when the
/// transaction id is already recorded.
#[async_trait]
pub trait PaymentRepository: Repository<Payment, Uuid> {
    /// Find payment by processor transaction id
    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, AppError>;

    /// All payments of a reservation, oldest first
    async fn find_by_reservation(&self, reservation_id: Uuid) -> Result<Vec<Payment>, AppError>;

    /// The completed payment of a reservation, if any
    async fn find_completed_for_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<Payment>, AppError>;
}

/// Boost rows of a post, read while the post is locked
#[derive(Debug, Clone, Default)]
pub struct PostBoosts {
    /// Latest window of the post still running at the given instant
    pub running: Option<Advertisement>,
    /// The advertisement the caller asked for, if any
    pub requested: Option<Advertisement>,
}

/// Change applied to the boosts of a post: the row to save and its order
pub type BoostChange<'a> =
    dyn Fn(PostBoosts) -> AppResult<(Advertisement, Option<AdvertisementOrder>)> + Send + Sync + 'a;

/// Change applied to the rating counters of a post
pub type RatingChange<'a> = dyn Fn(&mut PostRating) -> AppResult<()> + Send + Sync + 'a;

/// Advertisement repository trait with specialized methods
#[async_trait]
pub trait AdvertisementRepository: Repository<Advertisement, Uuid> {
    /// Latest boost of a post whose window is still running at `now`
    async fn find_active_for_post(
        &self,
        post_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Advertisement>, AppError>;

    /// Find an order ledger row
    async fn find_order(&self, order_id: &str) -> Result<Option<AdvertisementOrder>, AppError>;

    /// Insert or update an advertisement together with its order row
    ///
    /// Both writes happen atomically; an order id clash fails with
    /// `AppError::DuplicateOrder` and leaves the advertisement untouched.
    async fn save_with_order(
        &self,
        advertisement: &Advertisement,
        order: Option<&AdvertisementOrder>,
    ) -> Result<Advertisement, AppError>;

    /// Read-modify-write the boosts of a post atomically
    ///
    /// Holds the post locked while `change` runs, so writers in other
    /// processes wait for this one. `requested` is loaded when
    /// `advertisement_id` is given and belongs to the post. Fails with
    /// `AppError::NotFound` when the post does not exist and with
    /// `AppError::DuplicateOrder` on an order id clash.
    async fn modify_for_post(
        &self,
        post_id: i64,
        advertisement_id: Option<Uuid>,
        now: DateTime<Utc>,
        change: &BoostChange<'_>,
    ) -> Result<Advertisement, AppError>;

    /// Flip stored status of windows ended before `now`; returns affected rows
    async fn expire_ended(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

/// Post repository trait with specialized methods
#[async_trait]
pub trait PostRepository: Repository<Post, i64> {
    /// Persist the rating counters of a post as given
    async fn update_rating(&self, post_id: i64, rating: &PostRating) -> Result<Post, AppError>;

    /// Read-modify-write the rating counters of a post atomically
    ///
    /// Nothing is written when `change` fails.
    async fn modify_rating(&self, post_id: i64, change: &RatingChange<'_>) -> Result<Post, AppError>;
}

/// Source of the current instant
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Vehicle availability check owned by the fleet side of the system
#[async_trait]
pub trait VehicleAvailability: Send + Sync {
    /// Whether the vehicle can be booked over the window
    async fn is_available(
        &self,
        vehicle_id: i64,
        pickup_date: DateTime<Utc>,
        return_date: DateTime<Utc>,
    ) -> Result<bool, AppError>;
}

/// Generator of human-readable reservation numbers
pub trait ReservationNumberGenerator: Send + Sync {
    /// Produce a candidate number; uniqueness is checked by the store
    fn generate(&self) -> String;
}

/// Pagination parameters
#[derive(Debug, Clone, Default)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
}

impl Pagination {
    pub fn new(page: i64, per_page: i64) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, 1000),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination() {
        let p = Pagination::new(1, 10);
        assert_eq!(p.offset(), 0);
        assert_eq!(p.limit(), 10);

        let p = Pagination::new(3, 20);
        assert_eq!(p.offset(), 40);
        assert_eq!(p.limit(), 20);
    }

    #[test]
    fn test_pagination_bounds() {
        let p = Pagination::new(0, 10); // page 0 becomes 1
        assert_eq!(p.page, 1);

        let p = Pagination::new(1, 2000); // per_page capped at 1000
        assert_eq!(p.per_page, 1000);
    }
}
