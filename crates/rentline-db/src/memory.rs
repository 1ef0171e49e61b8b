//! In-memory store
//!
//! Implements every repository trait on top of `parking_lot`-guarded maps
//! and enforces the same uniqueness rules as the PostgreSQL schema. Used by
//! the service tests and for running the engine without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rentline_core::{
    models::{
        Advertisement, AdvertisementOrder, AdvertisementStatus, Payment, PaymentStatus, Post,
        PostRating, Reservation,
    },
    traits::{
        AdvertisementRepository, BoostChange, PaymentRepository, PostBoosts, PostRepository,
        RatingChange, Repository, ReservationRepository,
    },
    AppError, AppResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

fn page<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    let offset = usize::try_from(offset).unwrap_or(0);
    let limit = usize::try_from(limit).unwrap_or(0);
    items.into_iter().skip(offset).take(limit).collect()
}

fn count_of(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

/// Bundle of in-memory repositories
///
/// The advertisement repository checks posts against the bundled post
/// repository, the way the foreign key does in PostgreSQL.
#[derive(Clone)]
pub struct MemoryStore {
    pub reservations: Arc<MemoryReservationRepository>,
    pub payments: Arc<MemoryPaymentRepository>,
    pub advertisements: Arc<MemoryAdvertisementRepository>,
    pub posts: Arc<MemoryPostRepository>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let posts = Arc::new(MemoryPostRepository::default());
        Self {
            reservations: Arc::default(),
            payments: Arc::default(),
            advertisements: Arc::new(MemoryAdvertisementRepository::with_posts(posts.clone())),
            posts,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Reservations ====================

/// In-memory reservation repository
#[derive(Default)]
pub struct MemoryReservationRepository {
    rows: Mutex<HashMap<Uuid, Reservation>>,
    fail_next_update: AtomicBool,
}

impl MemoryReservationRepository {
    /// Make the next write of an existing reservation fail with a transient
    /// database error
    pub fn fail_next_update(&self) {
        self.fail_next_update.store(true, Ordering::SeqCst);
    }

    fn write(
        &self,
        entity: &Reservation,
        seen_updated_at: Option<DateTime<Utc>>,
    ) -> AppResult<Reservation> {
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(AppError::Database("connection reset".to_string()));
        }

        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(&entity.id)
            .ok_or_else(|| AppError::NotFound(format!("Reservation {}", entity.id)))?;

        if let Some(seen) = seen_updated_at {
            if row.updated_at != seen {
                return Err(AppError::ConcurrentUpdate(format!(
                    "reservation {} changed since {}",
                    entity.reservation_number, seen
                )));
            }
        }

        *row = entity.clone();
        Ok(entity.clone())
    }
}

#[async_trait]
impl Repository<Reservation, Uuid> for MemoryReservationRepository {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Reservation>> {
        Ok(self.rows.lock().get(&id).cloned())
    }

    async fn find_all(&self, limit: i64, offset: i64) -> AppResult<Vec<Reservation>> {
        let mut rows: Vec<Reservation> = self.rows.lock().values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows, limit, offset))
    }

    async fn count(&self) -> AppResult<i64> {
        Ok(count_of(self.rows.lock().len()))
    }

    async fn create(&self, entity: &Reservation) -> AppResult<Reservation> {
        let mut rows = self.rows.lock();

        if rows
            .values()
            .any(|r| r.reservation_number == entity.reservation_number)
        {
            return Err(AppError::DuplicateReservationNumber(
                entity.reservation_number.clone(),
            ));
        }
        if rows.contains_key(&entity.id) {
            return Err(AppError::Database(format!(
                "Reservation {} already exists",
                entity.id
            )));
        }

        rows.insert(entity.id, entity.clone());
        Ok(entity.clone())
    }

    async fn update(&self, entity: &Reservation) -> AppResult<Reservation> {
        self.write(entity, None)
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        Ok(self.rows.lock().remove(&id).is_some())
    }
}

#[async_trait]
impl ReservationRepository for MemoryReservationRepository {
    async fn update_if_unchanged(
        &self,
        entity: &Reservation,
        seen_updated_at: DateTime<Utc>,
    ) -> AppResult<Reservation> {
        self.write(entity, Some(seen_updated_at))
    }

    async fn find_by_number(&self, number: &str) -> AppResult<Option<Reservation>> {
        Ok(self
            .rows
            .lock()
            .values()
            .find(|r| r.reservation_number == number)
            .cloned())
    }

    async fn list_active(&self, limit: i64, offset: i64) -> AppResult<Vec<Reservation>> {
        let mut rows: Vec<Reservation> = self
            .rows
            .lock()
            .values()
            .filter(|r| r.is_active())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.pickup_date.cmp(&b.pickup_date));
        Ok(page(rows, limit, offset))
    }

    async fn list_by_client(
        &self,
        client_id: i64,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Reservation>> {
        let mut rows: Vec<Reservation> = self
            .rows
            .lock()
            .values()
            .filter(|r| r.client_id == client_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows, limit, offset))
    }
}

// ==================== Payments ====================

/// In-memory payment repository
#[derive(Default)]
pub struct MemoryPaymentRepository {
    rows: Mutex<HashMap<Uuid, Payment>>,
}

impl MemoryPaymentRepository {
    fn check_single_completed(rows: &HashMap<Uuid, Payment>, entity: &Payment) -> AppResult<()> {
        if entity.status != PaymentStatus::Completed {
            return Ok(());
        }

        let clash = rows.values().any(|p| {
            p.id != entity.id
                && p.reservation_id == entity.reservation_id
                && p.status == PaymentStatus::Completed
        });
        if clash {
            return Err(AppError::AlreadyPaid(entity.reservation_id.to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl Repository<Payment, Uuid> for MemoryPaymentRepository {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Payment>> {
        Ok(self.rows.lock().get(&id).cloned())
    }

    async fn find_all(&self, limit: i64, offset: i64) -> AppResult<Vec<Payment>> {
        let mut rows: Vec<Payment> = self.rows.lock().values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows, limit, offset))
    }

    async fn count(&self) -> AppResult<i64> {
        Ok(count_of(self.rows.lock().len()))
    }

    async fn create(&self, entity: &Payment) -> AppResult<Payment> {
        let mut rows = self.rows.lock();

        if rows
            .values()
            .any(|p| p.transaction_id == entity.transaction_id)
        {
            return Err(AppError::DuplicateTransaction(entity.transaction_id.clone()));
        }
        Self::check_single_completed(&rows, entity)?;

        rows.insert(entity.id, entity.clone());
        Ok(entity.clone())
    }

    async fn update(&self, entity: &Payment) -> AppResult<Payment> {
        let mut rows = self.rows.lock();
        Self::check_single_completed(&rows, entity)?;

        match rows.get_mut(&entity.id) {
            Some(row) => {
                row.status = entity.status;
                row.payload = entity.payload.clone();
                row.updated_at = entity.updated_at;
                Ok(row.clone())
            }
            None => Err(AppError::NotFound(format!("Payment {}", entity.id))),
        }
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        Ok(self.rows.lock().remove(&id).is_some())
    }
}

#[async_trait]
impl PaymentRepository for MemoryPaymentRepository {
    async fn find_by_transaction_id(&self, transaction_id: &str) -> AppResult<Option<Payment>> {
        Ok(self
            .rows
            .lock()
            .values()
            .find(|p| p.transaction_id == transaction_id)
            .cloned())
    }

    async fn find_by_reservation(&self, reservation_id: Uuid) -> AppResult<Vec<Payment>> {
        let mut rows: Vec<Payment> = self
            .rows
            .lock()
            .values()
            .filter(|p| p.reservation_id == reservation_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn find_completed_for_reservation(
        &self,
        reservation_id: Uuid,
    ) -> AppResult<Option<Payment>> {
        Ok(self
            .rows
            .lock()
            .values()
            .find(|p| p.reservation_id == reservation_id && p.is_completed())
            .cloned())
    }
}

// ==================== Advertisements ====================

#[derive(Default)]
struct AdvertisementTables {
    ads: HashMap<Uuid, Advertisement>,
    orders: HashMap<String, AdvertisementOrder>,
}

impl AdvertisementTables {
    fn save(
        &mut self,
        advertisement: &Advertisement,
        order: Option<&AdvertisementOrder>,
    ) -> AppResult<Advertisement> {
        if let Some(order) = order {
            if self.orders.contains_key(&order.order_id) {
                return Err(AppError::DuplicateOrder(order.order_id.clone()));
            }
        }
        if let Some(external) = &advertisement.external_order_id {
            let clash = self.ads.values().any(|ad| {
                ad.id != advertisement.id && ad.external_order_id.as_ref() == Some(external)
            });
            if clash {
                return Err(AppError::DuplicateOrder(external.clone()));
            }
        }

        self.ads.insert(advertisement.id, advertisement.clone());
        if let Some(order) = order {
            self.orders.insert(order.order_id.clone(), order.clone());
        }

        Ok(advertisement.clone())
    }
}

/// In-memory advertisement repository with its order ledger
#[derive(Default)]
pub struct MemoryAdvertisementRepository {
    tables: Mutex<AdvertisementTables>,
    posts: Option<Arc<MemoryPostRepository>>,
}

impl MemoryAdvertisementRepository {
    /// Repository that rejects boosts of posts unknown to `posts`
    pub fn with_posts(posts: Arc<MemoryPostRepository>) -> Self {
        Self {
            tables: Mutex::default(),
            posts: Some(posts),
        }
    }

    /// Number of recorded orders
    pub fn order_count(&self) -> usize {
        self.tables.lock().orders.len()
    }
}

#[async_trait]
impl Repository<Advertisement, Uuid> for MemoryAdvertisementRepository {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Advertisement>> {
        Ok(self.tables.lock().ads.get(&id).cloned())
    }

    async fn find_all(&self, limit: i64, offset: i64) -> AppResult<Vec<Advertisement>> {
        let mut rows: Vec<Advertisement> = self.tables.lock().ads.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows, limit, offset))
    }

    async fn count(&self) -> AppResult<i64> {
        Ok(count_of(self.tables.lock().ads.len()))
    }

    async fn create(&self, entity: &Advertisement) -> AppResult<Advertisement> {
        self.save_with_order(entity, None).await
    }

    async fn update(&self, entity: &Advertisement) -> AppResult<Advertisement> {
        self.save_with_order(entity, None).await
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let mut tables = self.tables.lock();
        tables.orders.retain(|_, order| order.advertisement_id != id);
        Ok(tables.ads.remove(&id).is_some())
    }
}

#[async_trait]
impl AdvertisementRepository for MemoryAdvertisementRepository {
    async fn find_active_for_post(
        &self,
        post_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Advertisement>> {
        Ok(self
            .tables
            .lock()
            .ads
            .values()
            .filter(|ad| ad.post_id == post_id && ad.is_active_at(now))
            .max_by_key(|ad| ad.ends_at)
            .cloned())
    }

    async fn find_order(&self, order_id: &str) -> AppResult<Option<AdvertisementOrder>> {
        Ok(self.tables.lock().orders.get(order_id).cloned())
    }

    async fn save_with_order(
        &self,
        advertisement: &Advertisement,
        order: Option<&AdvertisementOrder>,
    ) -> AppResult<Advertisement> {
        self.tables.lock().save(advertisement, order)
    }

    async fn modify_for_post(
        &self,
        post_id: i64,
        advertisement_id: Option<Uuid>,
        now: DateTime<Utc>,
        change: &BoostChange<'_>,
    ) -> AppResult<Advertisement> {
        if let Some(posts) = &self.posts {
            if !posts.rows.lock().contains_key(&post_id) {
                return Err(AppError::NotFound(format!("Post {}", post_id)));
            }
        }

        let mut tables = self.tables.lock();
        let boosts = PostBoosts {
            running: tables
                .ads
                .values()
                .filter(|ad| ad.post_id == post_id && ad.is_active_at(now))
                .max_by_key(|ad| ad.ends_at)
                .cloned(),
            requested: advertisement_id
                .and_then(|id| tables.ads.get(&id))
                .filter(|ad| ad.post_id == post_id)
                .cloned(),
        };

        let (advertisement, order) = change(boosts)?;
        tables.save(&advertisement, order.as_ref())
    }

    async fn expire_ended(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut tables = self.tables.lock();
        let mut expired = 0;

        for ad in tables.ads.values_mut() {
            if ad.status == AdvertisementStatus::Active && ad.ends_at <= now {
                ad.status = AdvertisementStatus::Expired;
                ad.updated_at = now;
                expired += 1;
            }
        }

        Ok(expired)
    }
}

// ==================== Posts ====================

/// In-memory post repository
#[derive(Default)]
pub struct MemoryPostRepository {
    rows: Mutex<HashMap<i64, Post>>,
    next_id: AtomicI64,
}

#[async_trait]
impl Repository<Post, i64> for MemoryPostRepository {
    async fn find_by_id(&self, id: i64) -> AppResult<Option<Post>> {
        Ok(self.rows.lock().get(&id).cloned())
    }

    async fn find_all(&self, limit: i64, offset: i64) -> AppResult<Vec<Post>> {
        let mut rows: Vec<Post> = self.rows.lock().values().cloned().collect();
        rows.sort_by_key(|p| p.id);
        Ok(page(rows, limit, offset))
    }

    async fn count(&self) -> AppResult<i64> {
        Ok(count_of(self.rows.lock().len()))
    }

    async fn create(&self, entity: &Post) -> AppResult<Post> {
        let mut rows = self.rows.lock();
        let mut post = entity.clone();

        if post.id <= 0 {
            post.id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        }
        if rows.contains_key(&post.id) {
            return Err(AppError::Database(format!("Post {} already exists", post.id)));
        }

        rows.insert(post.id, post.clone());
        Ok(post)
    }

    async fn update(&self, entity: &Post) -> AppResult<Post> {
        let mut rows = self.rows.lock();
        match rows.get_mut(&entity.id) {
            Some(row) => {
                row.agency_id = entity.agency_id;
                row.vehicle_id = entity.vehicle_id;
                row.title = entity.title.clone();
                row.updated_at = Utc::now();
                Ok(row.clone())
            }
            None => Err(AppError::NotFound(format!("Post {}", entity.id))),
        }
    }

    async fn delete(&self, id: i64) -> AppResult<bool> {
        Ok(self.rows.lock().remove(&id).is_some())
    }
}

#[async_trait]
impl PostRepository for MemoryPostRepository {
    async fn update_rating(&self, post_id: i64, rating: &PostRating) -> AppResult<Post> {
        let mut rows = self.rows.lock();
        match rows.get_mut(&post_id) {
            Some(row) => {
                row.rating = *rating;
                row.updated_at = Utc::now();
                Ok(row.clone())
            }
            None => Err(AppError::NotFound(format!("Post {}", post_id))),
        }
    }

    async fn modify_rating(&self, post_id: i64, change: &RatingChange<'_>) -> AppResult<Post> {
        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(&post_id)
            .ok_or_else(|| AppError::NotFound(format!("Post {}", post_id)))?;

        let mut rating = row.rating;
        change(&mut rating)?;

        row.rating = rating;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }
}
