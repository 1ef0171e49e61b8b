//! Advertisement lifecycle service
//!
//! A post has at most one running boost window. Buying again while a window
//! runs pushes its end; buying after it ended opens a fresh window. Extending
//! an ended boost while another one runs for the post pushes the running
//! one instead. The
//! stored status is kept in step on every write and by the periodic sweep,
//! but readers should rely on [`AdvertisementLifecycle::status`].

use chrono::{DateTime, Utc};
use rentline_core::{
    models::{
        Advertisement, AdvertisementOrder, AdvertisementStatus, BoostPurchase, MAX_BOOST_DAYS,
    },
    traits::{AdvertisementRepository, Clock, PostRepository},
    AppError, AppResult,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::locks::AggregateLocks;

/// Advertisement lifecycle
///
/// Writes are serialized per post, so two purchases on the same post merge
/// instead of opening competing windows.
pub struct AdvertisementLifecycle<A: AdvertisementRepository, P: PostRepository> {
    advertisement_repo: Arc<A>,
    post_repo: Arc<P>,
    clock: Arc<dyn Clock>,
    locks: AggregateLocks<i64>,
}

impl<A: AdvertisementRepository, P: PostRepository> AdvertisementLifecycle<A, P> {
    /// Create a new advertisement lifecycle
    pub fn new(advertisement_repo: Arc<A>, post_repo: Arc<P>, clock: Arc<dyn Clock>) -> Self {
        Self {
            advertisement_repo,
            post_repo,
            clock,
            locks: AggregateLocks::new(),
        }
    }

    fn check_terms(amount: Decimal, duration_days: i32) -> AppResult<()> {
        if !(1..=MAX_BOOST_DAYS).contains(&duration_days) {
            return Err(AppError::Validation(format!(
                "duration must be between 1 and {} days (got {})",
                MAX_BOOST_DAYS, duration_days
            )));
        }
        if amount < Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "amount must not be negative (got {})",
                amount
            )));
        }
        Ok(())
    }

    fn check_start(starts_at: DateTime<Utc>, now: DateTime<Utc>) -> AppResult<()> {
        if starts_at.date_naive() < now.date_naive() {
            return Err(AppError::InvalidRange(format!(
                "boost start {} is in the past",
                starts_at
            )));
        }
        Ok(())
    }

    async fn load(&self, id: Uuid) -> AppResult<Advertisement> {
        self.advertisement_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Advertisement {}", id)))
    }

    /// Buy a boost for a post
    ///
    /// Merges into the running window when there is one.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The duration is outside 1..=3650 days or the amount is negative
    /// - The requested start lies on a past day
    /// - The post does not exist
    /// - The external order id was already used
    #[instrument(skip(self, request), fields(post_id = request.post_id))]
    pub async fn purchase(&self, request: BoostPurchase) -> AppResult<Advertisement> {
        Self::check_terms(request.amount, request.duration_days)?;
        request.validate()?;

        let now = self.clock.now();
        let starts_at = request.starts_at.unwrap_or(now);
        Self::check_start(starts_at, now)?;

        if self.post_repo.find_by_id(request.post_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Post {}", request.post_id)));
        }

        let _guard = self.locks.acquire(request.post_id).await;

        if let Some(order_id) = &request.external_order_id {
            if self.advertisement_repo.find_order(order_id).await?.is_some() {
                warn!("Boost order {} already applied", order_id);
                return Err(AppError::DuplicateOrder(order_id.clone()));
            }
        }

        let saved = self
            .advertisement_repo
            .modify_for_post(request.post_id, None, now, &|boosts| {
                let advertisement = match boosts.running {
                    Some(mut advertisement) => {
                        advertisement.extend_window(
                            request.amount,
                            request.duration_days,
                            now,
                        )?;
                        debug!(
                            "Merging boost into {} for post {}, now ending {}",
                            advertisement.id, advertisement.post_id, advertisement.ends_at
                        );
                        advertisement
                    }
                    None => Advertisement::open(
                        request.post_id,
                        request.amount,
                        request.duration_days,
                        starts_at,
                        request.external_order_id.clone(),
                        now,
                    )?,
                };

                let order = request
                    .external_order_id
                    .as_ref()
                    .map(|order_id| AdvertisementOrder {
                        order_id: order_id.clone(),
                        advertisement_id: advertisement.id,
                        amount: request.amount,
                        duration_days: request.duration_days,
                        created_at: now,
                    });

                Ok((advertisement, order))
            })
            .await?;

        info!(
            "Boosted post {} for {} days ({}), window {} -> {}",
            saved.post_id, request.duration_days, request.amount, saved.starts_at, saved.ends_at
        );

        Ok(saved)
    }

    /// Extend a boost
    ///
    /// A running window is pushed by `duration_days` and accumulates
    /// `amount`. An ended window is replaced by a fresh one starting at
    /// `starts_at`, or now, unless another window of the same post is
    /// running; that one is pushed instead and returned.
    #[instrument(skip(self))]
    pub async fn extend(
        &self,
        advertisement_id: Uuid,
        amount: Decimal,
        duration_days: i32,
        starts_at: Option<DateTime<Utc>>,
    ) -> AppResult<Advertisement> {
        Self::check_terms(amount, duration_days)?;

        let post_id = self.load(advertisement_id).await?.post_id;
        let _guard = self.locks.acquire(post_id).await;

        let now = self.clock.now();
        let starts_at = starts_at.unwrap_or(now);

        let saved = self
            .advertisement_repo
            .modify_for_post(post_id, Some(advertisement_id), now, &|boosts| {
                let mut advertisement = boosts.requested.ok_or_else(|| {
                    AppError::NotFound(format!("Advertisement {}", advertisement_id))
                })?;

                if advertisement.is_active_at(now) {
                    advertisement.extend_window(amount, duration_days, now)?;
                    return Ok((advertisement, None));
                }

                Self::check_start(starts_at, now)?;
                match boosts.running {
                    Some(mut running) => {
                        debug!(
                            "Boost {} has ended; extending running boost {} of post {}",
                            advertisement.id, running.id, post_id
                        );
                        running.extend_window(amount, duration_days, now)?;
                        Ok((running, None))
                    }
                    None => {
                        advertisement.restart_window(amount, duration_days, starts_at, now)?;
                        debug!("Restarted ended boost {}", advertisement.id);
                        Ok((advertisement, None))
                    }
                }
            })
            .await?;

        info!(
            "Extended boost {} of post {} by {} days, now ending {}",
            saved.id, saved.post_id, duration_days, saved.ends_at
        );

        Ok(saved)
    }

    /// Status of a boost at the current instant
    pub fn status(&self, advertisement: &Advertisement) -> AdvertisementStatus {
        advertisement.status_at(self.clock.now())
    }

    /// Flip the stored status of ended windows; returns how many changed
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> AppResult<u64> {
        let expired = self.advertisement_repo.expire_ended(self.clock.now()).await?;
        debug!("Sweep expired {} advertisements", expired);
        Ok(expired)
    }

    /// Running boost of a post, if any
    #[instrument(skip(self))]
    pub async fn active_for_post(&self, post_id: i64) -> AppResult<Option<Advertisement>> {
        self.advertisement_repo
            .find_active_for_post(post_id, self.clock.now())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{start, Harness};
    use chrono::Duration;
    use futures::future::join_all;
    use rentline_core::models::Post;
    use rentline_core::traits::Repository;
    use rust_decimal_macros::dec;

    async fn with_post(h: &Harness) -> i64 {
        h.store
            .posts
            .create(&Post::new(0, 3, 42, "Peugeot 208, automatic"))
            .await
            .unwrap()
            .id
    }

    fn purchase(post_id: i64, amount: Decimal, days: i32, order: Option<&str>) -> BoostPurchase {
        BoostPurchase {
            post_id,
            amount,
            duration_days: days,
            starts_at: None,
            external_order_id: order.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_purchase_opens_window() {
        let h = Harness::new();
        let post_id = with_post(&h).await;

        let ad = h
            .advertisements
            .purchase(purchase(post_id, dec!(9.90), 7, Some("ord-1")))
            .await
            .unwrap();

        assert_eq!(ad.starts_at, start());
        assert_eq!(ad.ends_at, start() + Duration::days(7));
        assert_eq!(h.advertisements.status(&ad), AdvertisementStatus::Active);
        assert_eq!(
            h.advertisements.active_for_post(post_id).await.unwrap(),
            Some(ad)
        );
    }

    #[tokio::test]
    async fn test_purchase_rejections() {
        let h = Harness::new();
        let post_id = with_post(&h).await;

        assert!(matches!(
            h.advertisements
                .purchase(purchase(999, dec!(5.00), 3, None))
                .await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            h.advertisements
                .purchase(purchase(post_id, dec!(5.00), 0, None))
                .await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            h.advertisements
                .purchase(purchase(post_id, dec!(-5.00), 3, None))
                .await,
            Err(AppError::Validation(_))
        ));

        let mut backdated = purchase(post_id, dec!(5.00), 3, None);
        backdated.starts_at = Some(start() - Duration::days(2));
        assert!(matches!(
            h.advertisements.purchase(backdated).await,
            Err(AppError::InvalidRange(_))
        ));
    }

    #[tokio::test]
    async fn test_order_id_is_single_use() {
        let h = Harness::new();
        let post_id = with_post(&h).await;

        h.advertisements
            .purchase(purchase(post_id, dec!(5.00), 3, Some("ord-1")))
            .await
            .unwrap();
        let err = h
            .advertisements
            .purchase(purchase(post_id, dec!(5.00), 3, Some("ord-1")))
            .await
            .unwrap_err();

        assert_eq!(err, AppError::DuplicateOrder("ord-1".to_string()));
        let running = h.advertisements.active_for_post(post_id).await.unwrap().unwrap();
        assert_eq!(running.duration_days, 3);
    }

    #[tokio::test]
    async fn test_purchase_merges_into_running_window() {
        let h = Harness::new();
        let post_id = with_post(&h).await;

        let first = h
            .advertisements
            .purchase(purchase(post_id, dec!(5.00), 3, Some("ord-1")))
            .await
            .unwrap();
        h.clock.advance(Duration::days(1));
        let merged = h
            .advertisements
            .purchase(purchase(post_id, dec!(8.00), 4, Some("ord-2")))
            .await
            .unwrap();

        assert_eq!(merged.id, first.id);
        assert_eq!(merged.ends_at, first.ends_at + Duration::days(4));
        assert_eq!(merged.amount, dec!(13.00));
        assert_eq!(merged.duration_days, 7);
        assert_eq!(h.store.advertisements.order_count(), 2);
    }

    #[tokio::test]
    async fn test_extend_running_window_accumulates() {
        let h = Harness::new();
        let post_id = with_post(&h).await;
        let ad = h
            .advertisements
            .purchase(purchase(post_id, dec!(10.00), 5, None))
            .await
            .unwrap();

        let extended = h
            .advertisements
            .extend(ad.id, dec!(6.00), 3, None)
            .await
            .unwrap();

        assert_eq!(extended.starts_at, ad.starts_at);
        assert_eq!(extended.ends_at, ad.ends_at + Duration::days(3));
        assert_eq!(extended.amount, dec!(16.00));
        assert_eq!(extended.duration_days, 8);
    }

    #[tokio::test]
    async fn test_extend_ended_window_resets() {
        let h = Harness::new();
        let post_id = with_post(&h).await;
        let ad = h
            .advertisements
            .purchase(purchase(post_id, dec!(10.00), 5, None))
            .await
            .unwrap();

        h.clock.advance(Duration::days(9));
        assert_eq!(h.advertisements.status(&ad), AdvertisementStatus::Expired);

        let restarted = h
            .advertisements
            .extend(ad.id, dec!(4.00), 2, None)
            .await
            .unwrap();

        let now = start() + Duration::days(9);
        assert_eq!(restarted.starts_at, now);
        assert_eq!(restarted.ends_at, now + Duration::days(2));
        assert_eq!(restarted.amount, dec!(4.00));
        assert_eq!(restarted.duration_days, 2);
        assert_eq!(restarted.status, AdvertisementStatus::Active);
    }

    #[tokio::test]
    async fn test_extend_ended_window_from_later_start() {
        let h = Harness::new();
        let post_id = with_post(&h).await;
        let ad = h
            .advertisements
            .purchase(purchase(post_id, dec!(10.00), 1, None))
            .await
            .unwrap();
        h.clock.advance(Duration::days(3));
        let now = start() + Duration::days(3);

        let later = now + Duration::days(2);
        let restarted = h
            .advertisements
            .extend(ad.id, dec!(6.00), 4, Some(later))
            .await
            .unwrap();

        assert_eq!(restarted.id, ad.id);
        assert_eq!(restarted.starts_at, later);
        assert_eq!(restarted.ends_at, later + Duration::days(4));
        assert_eq!(restarted.amount, dec!(6.00));
    }

    #[tokio::test]
    async fn test_extend_ended_window_from_past_start() {
        let h = Harness::new();
        let post_id = with_post(&h).await;
        let ad = h
            .advertisements
            .purchase(purchase(post_id, dec!(10.00), 1, None))
            .await
            .unwrap();
        h.clock.advance(Duration::days(3));

        let err = h
            .advertisements
            .extend(ad.id, dec!(6.00), 4, Some(start()))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidRange(_)));
        let stored = h.store.advertisements.find_by_id(ad.id).await.unwrap().unwrap();
        assert_eq!(stored.ends_at, ad.ends_at);
    }

    #[tokio::test]
    async fn test_extend_ended_window_pushes_running_one() {
        let h = Harness::new();
        let post_id = with_post(&h).await;
        let old = h
            .advertisements
            .purchase(purchase(post_id, dec!(2.00), 1, None))
            .await
            .unwrap();
        h.clock.advance(Duration::days(2));
        let running = h
            .advertisements
            .purchase(purchase(post_id, dec!(10.00), 5, None))
            .await
            .unwrap();
        assert_ne!(running.id, old.id);

        let extended = h
            .advertisements
            .extend(old.id, dec!(3.00), 3, None)
            .await
            .unwrap();

        assert_eq!(extended.id, running.id);
        assert_eq!(extended.ends_at, running.ends_at + Duration::days(3));
        assert_eq!(extended.amount, dec!(13.00));

        let now = h.clock.now();
        let old = h.store.advertisements.find_by_id(old.id).await.unwrap().unwrap();
        assert!(!old.is_active_at(now));
        assert_eq!(
            h.advertisements.active_for_post(post_id).await.unwrap().map(|ad| ad.id),
            Some(running.id)
        );
    }

    #[tokio::test]
    async fn test_extend_duration_bounds() {
        let h = Harness::new();
        let post_id = with_post(&h).await;
        let ad = h
            .advertisements
            .purchase(purchase(post_id, dec!(10.00), 5, None))
            .await
            .unwrap();

        for days in [0, MAX_BOOST_DAYS + 1, i32::MAX] {
            assert!(matches!(
                h.advertisements.extend(ad.id, dec!(1.00), days, None).await,
                Err(AppError::Validation(_))
            ));
        }

        let stored = h.store.advertisements.find_by_id(ad.id).await.unwrap().unwrap();
        assert_eq!(stored, ad);
    }

    #[tokio::test]
    async fn test_extensions_commute() {
        let forward = Harness::new();
        let backward = Harness::new();
        let mut results = Vec::new();

        let runs = [
            (&forward, [(dec!(3.00), 2), (dec!(7.00), 5)]),
            (&backward, [(dec!(7.00), 5), (dec!(3.00), 2)]),
        ];

        for (h, order) in runs {
            let post_id = with_post(h).await;
            let ad = h
                .advertisements
                .purchase(purchase(post_id, dec!(10.00), 4, None))
                .await
                .unwrap();
            for (amount, days) in order {
                h.advertisements.extend(ad.id, amount, days, None).await.unwrap();
            }
            results.push(h.advertisements.active_for_post(post_id).await.unwrap().unwrap());
        }

        assert_eq!(results[0].ends_at, results[1].ends_at);
        assert_eq!(results[0].amount, results[1].amount);
        assert_eq!(results[0].duration_days, results[1].duration_days);
    }

    #[tokio::test]
    async fn test_concurrent_extensions_compose() {
        let h = Arc::new(Harness::new());
        let post_id = with_post(&h).await;
        let ad = h
            .advertisements
            .purchase(purchase(post_id, dec!(1.00), 1, None))
            .await
            .unwrap();

        let ad_id = ad.id;
        let handles = (0..10).map(|_| {
            let h = h.clone();
            tokio::spawn(async move { h.advertisements.extend(ad_id, dec!(1.00), 1, None).await })
        });
        for result in join_all(handles).await {
            result.unwrap().unwrap();
        }

        let stored = h.advertisements.active_for_post(post_id).await.unwrap().unwrap();
        assert_eq!(stored.duration_days, 11);
        assert_eq!(stored.amount, dec!(11.00));
        assert_eq!(stored.ends_at, ad.ends_at + Duration::days(10));
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let h = Harness::new();
        let post_id = with_post(&h).await;
        h.advertisements
            .purchase(purchase(post_id, dec!(5.00), 2, None))
            .await
            .unwrap();

        assert_eq!(h.advertisements.sweep_expired().await.unwrap(), 0);

        h.clock.advance(Duration::days(2));
        assert_eq!(h.advertisements.sweep_expired().await.unwrap(), 1);
        assert_eq!(h.advertisements.sweep_expired().await.unwrap(), 0);
        assert!(h.advertisements.active_for_post(post_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extend_missing_advertisement() {
        let h = Harness::new();
        assert!(matches!(
            h.advertisements.extend(Uuid::new_v4(), dec!(1.00), 1, None).await,
            Err(AppError::NotFound(_))
        ));
    }
}
