//! Reservation lifecycle service
//!
//! Owns the reservation state machine:
//! - Create bookings after range, pricing and availability checks
//! - Edit bookings while dates and prices are still open
//! - Confirm, pay, complete and cancel
//! - Publish a [`ReservationEvent`] for every applied change
//!
//! ```text
//! pending -> confirmed -> paid -> completed
//!    \___________\_________\________\____-> cancelled
//! ```
//!
//! Cancelling a paid or completed reservation requires [`CancelMode::Force`].

use chrono::{DateTime, Utc};
use rentline_core::{
    config::ReservationConfig,
    models::{
        billed_days, validate_range, CancelMode, NewReservation, Reservation, ReservationChanges,
        ReservationEvent, ReservationStatus,
    },
    traits::{Clock, ReservationNumberGenerator, ReservationRepository, VehicleAvailability},
    AppError, AppResult,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{broadcast, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::locks::AggregateLocks;

/// Reservation lifecycle
///
/// Every mutation runs under the reservation's aggregate lock, so two
/// requests on the same reservation never interleave their read and write.
pub struct ReservationLifecycle<R: ReservationRepository> {
    reservation_repo: Arc<R>,
    availability: Arc<dyn VehicleAvailability>,
    numbers: Arc<dyn ReservationNumberGenerator>,
    clock: Arc<dyn Clock>,
    locks: AggregateLocks<Uuid>,
    events: broadcast::Sender<ReservationEvent>,
    number_attempts: u32,
}

impl<R: ReservationRepository> ReservationLifecycle<R> {
    /// Create a new reservation lifecycle
    pub fn new(
        reservation_repo: Arc<R>,
        availability: Arc<dyn VehicleAvailability>,
        numbers: Arc<dyn ReservationNumberGenerator>,
        clock: Arc<dyn Clock>,
        config: &ReservationConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            reservation_repo,
            availability,
            numbers,
            clock,
            locks: AggregateLocks::new(),
            events,
            number_attempts: config.number_attempts.max(1),
        }
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ReservationEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: ReservationEvent) {
        if self.events.send(event).is_err() {
            debug!("No subscribers for reservation events");
        }
    }

    /// Take the aggregate lock of a reservation
    pub(crate) async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        self.locks.acquire(id).await
    }

    /// Write back a loaded reservation stamped with `now`
    ///
    /// Rejected with `ConcurrentUpdate` if the stored row changed since it
    /// was loaded, e.g. by another process.
    async fn save(
        &self,
        mut reservation: Reservation,
        now: DateTime<Utc>,
    ) -> AppResult<Reservation> {
        let seen = reservation.updated_at;
        reservation.updated_at = now;
        self.reservation_repo.update_if_unchanged(&reservation, seen).await
    }

    async fn load(&self, id: Uuid) -> AppResult<Reservation> {
        self.reservation_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Reservation {}", id)))
    }

    /// Create a pending reservation
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The request fails field validation or carries negative prices
    /// - Return is not after pickup, or pickup falls on a past day
    /// - The supplied final amount disagrees with the pricing breakdown
    /// - The vehicle is not available over the window
    /// - No free reservation number was found within the configured attempts
    #[instrument(skip(self, request), fields(vehicle_id = request.vehicle_id))]
    pub async fn create(&self, request: NewReservation) -> AppResult<Reservation> {
        request.validate()?;
        request.pricing.validate_components()?;

        let now = self.clock.now();
        validate_range(request.pickup_date, request.return_date, now)?;

        let days = billed_days(request.pickup_date, request.return_date);
        let final_amount = request.pricing.reconcile(days, request.final_amount)?;

        let available = self
            .availability
            .is_available(request.vehicle_id, request.pickup_date, request.return_date)
            .await?;
        if !available {
            warn!(
                "Vehicle {} unavailable from {} to {}",
                request.vehicle_id, request.pickup_date, request.return_date
            );
            return Err(AppError::VehicleUnavailable(format!(
                "vehicle {} from {} to {}",
                request.vehicle_id, request.pickup_date, request.return_date
            )));
        }

        let mut last_error = None;
        for attempt in 1..=self.number_attempts {
            let reservation = Reservation {
                id: Uuid::new_v4(),
                reservation_number: self.numbers.generate(),
                agency_id: request.agency_id,
                vehicle_id: request.vehicle_id,
                client_id: request.client_id,
                pickup_date: request.pickup_date,
                return_date: request.return_date,
                pickup_mode: request.pickup_mode,
                pricing: request.pricing,
                final_amount,
                status: ReservationStatus::Pending,
                cancellation_reason: None,
                paid_transaction_id: None,
                cancelled_at: None,
                created_at: now,
                updated_at: now,
            };

            match self.reservation_repo.create(&reservation).await {
                Ok(created) => {
                    info!(
                        "Created reservation {} ({}) for client {}: {} over {} days",
                        created.reservation_number,
                        created.id,
                        created.client_id,
                        created.final_amount,
                        days
                    );
                    self.publish(ReservationEvent::Created {
                        reservation_id: created.id,
                        reservation_number: created.reservation_number.clone(),
                    });
                    return Ok(created);
                }
                Err(AppError::DuplicateReservationNumber(number)) => {
                    warn!(
                        "Reservation number {} taken (attempt {}/{})",
                        number, attempt, self.number_attempts
                    );
                    last_error = Some(AppError::DuplicateReservationNumber(number));
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AppError::Internal("reservation number generation exhausted".to_string())
        }))
    }

    /// Edit dates, pickup mode or prices
    ///
    /// Without an explicit `final_amount` the amount is recomputed from the
    /// merged pricing breakdown. Paid reservations only accept a pickup mode
    /// change.
    #[instrument(skip(self, changes))]
    pub async fn update(&self, id: Uuid, changes: ReservationChanges) -> AppResult<Reservation> {
        let _guard = self.lock(id).await;
        let mut reservation = self.load(id).await?;

        if reservation.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "reservation {} is {} and can no longer be edited",
                reservation.reservation_number, reservation.status
            )));
        }
        if reservation.status == ReservationStatus::Paid && changes.touches_billing() {
            return Err(AppError::InvalidState(format!(
                "reservation {} is paid; dates and prices are locked",
                reservation.reservation_number
            )));
        }

        let now = self.clock.now();

        if let Some(mode) = changes.pickup_mode {
            reservation.pickup_mode = mode;
        }

        if changes.touches_billing() {
            if let Some(pickup) = changes.pickup_date {
                reservation.pickup_date = pickup;
            }
            if let Some(ret) = changes.return_date {
                reservation.return_date = ret;
            }
            if let Some(rate) = changes.daily_rate {
                reservation.pricing.daily_rate = rate;
            }
            if let Some(discount) = changes.discount_amount {
                reservation.pricing.discount_amount = discount;
            }
            if let Some(fee) = changes.delivery_fee {
                reservation.pricing.delivery_fee = fee;
            }
            if let Some(cost) = changes.equipment_cost {
                reservation.pricing.equipment_cost = cost;
            }

            reservation.pricing.validate_components()?;

            // A running rental keeps its past pickup; only a moved pickup is checked against today.
            let today = if changes.pickup_date.is_some() {
                now
            } else {
                reservation.pickup_date
            };
            validate_range(reservation.pickup_date, reservation.return_date, today)?;

            let days = reservation.billed_days();
            reservation.final_amount = match changes.final_amount {
                Some(supplied) => reservation.pricing.reconcile(days, supplied)?,
                None => {
                    let expected = reservation.pricing.final_amount(days);
                    if expected < Decimal::ZERO {
                        return Err(AppError::PricingMismatch {
                            expected: expected.to_string(),
                            supplied: expected.to_string(),
                        });
                    }
                    expected
                }
            };
        }

        let updated = self.save(reservation, now).await?;

        debug!(
            "Updated reservation {}: {} -> {}, amount {}",
            updated.reservation_number, updated.pickup_date, updated.return_date, updated.final_amount
        );
        self.publish(ReservationEvent::Updated {
            reservation_id: updated.id,
        });

        Ok(updated)
    }

    /// Agency accepts the booking; confirming twice is a no-op
    #[instrument(skip(self))]
    pub async fn confirm(&self, id: Uuid) -> AppResult<Reservation> {
        let _guard = self.lock(id).await;
        let mut reservation = self.load(id).await?;

        match reservation.status {
            ReservationStatus::Confirmed => Ok(reservation),
            ReservationStatus::Pending => {
                reservation.status = ReservationStatus::Confirmed;
                let updated = self.save(reservation, self.clock.now()).await?;

                info!("Confirmed reservation {}", updated.reservation_number);
                self.publish(ReservationEvent::Confirmed {
                    reservation_id: updated.id,
                });
                Ok(updated)
            }
            other => Err(AppError::InvalidState(format!(
                "cannot confirm reservation {} in status {}",
                reservation.reservation_number, other
            ))),
        }
    }

    /// Cancel a reservation
    ///
    /// `CancelMode::Standard` accepts pending and confirmed reservations only;
    /// `CancelMode::Force` also accepts paid and completed ones.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        id: Uuid,
        reason: Option<String>,
        mode: CancelMode,
    ) -> AppResult<Reservation> {
        let _guard = self.lock(id).await;
        self.cancel_locked(id, reason, mode).await
    }

    /// Cancel while the caller holds the reservation lock
    pub(crate) async fn cancel_locked(
        &self,
        id: Uuid,
        reason: Option<String>,
        mode: CancelMode,
    ) -> AppResult<Reservation> {
        let mut reservation = self.load(id).await?;
        let previous_status = reservation.status;

        let allowed = match previous_status {
            ReservationStatus::Cancelled => false,
            ReservationStatus::Pending | ReservationStatus::Confirmed => true,
            ReservationStatus::Paid | ReservationStatus::Completed => mode == CancelMode::Force,
        };
        if !allowed {
            warn!(
                "Rejected cancellation of reservation {} in status {} ({:?})",
                reservation.reservation_number, previous_status, mode
            );
            return Err(AppError::InvalidState(format!(
                "cannot cancel reservation {} in status {}",
                reservation.reservation_number, previous_status
            )));
        }

        let now = self.clock.now();
        reservation.status = ReservationStatus::Cancelled;
        reservation.cancellation_reason = reason.clone();
        reservation.cancelled_at = Some(now);

        let updated = self.save(reservation, now).await?;

        info!(
            "Cancelled reservation {} (was {}): {}",
            updated.reservation_number,
            previous_status,
            reason.as_deref().unwrap_or("no reason given")
        );
        self.publish(ReservationEvent::Cancelled {
            reservation_id: updated.id,
            previous_status,
            reason,
        });

        Ok(updated)
    }

    /// Record that a processor transaction settled the reservation
    ///
    /// Repeating the call with the same transaction id is a no-op, so a
    /// capture whose follow-up failed can simply be replayed.
    #[instrument(skip(self))]
    pub async fn mark_paid(&self, id: Uuid, transaction_id: &str) -> AppResult<Reservation> {
        let _guard = self.lock(id).await;
        self.mark_paid_locked(id, transaction_id).await
    }

    /// Mark paid while the caller holds the reservation lock
    pub(crate) async fn mark_paid_locked(
        &self,
        id: Uuid,
        transaction_id: &str,
    ) -> AppResult<Reservation> {
        let mut reservation = self.load(id).await?;

        match reservation.status {
            ReservationStatus::Paid
                if reservation.paid_transaction_id.as_deref() == Some(transaction_id) =>
            {
                debug!(
                    "Reservation {} already paid by {}",
                    reservation.reservation_number, transaction_id
                );
                Ok(reservation)
            }
            ReservationStatus::Pending | ReservationStatus::Confirmed => {
                reservation.status = ReservationStatus::Paid;
                reservation.paid_transaction_id = Some(transaction_id.to_string());
                let updated = self.save(reservation, self.clock.now()).await?;

                info!(
                    "Reservation {} paid by transaction {}",
                    updated.reservation_number, transaction_id
                );
                self.publish(ReservationEvent::Paid {
                    reservation_id: updated.id,
                    transaction_id: transaction_id.to_string(),
                });
                Ok(updated)
            }
            other => Err(AppError::InvalidState(format!(
                "cannot mark reservation {} paid by {} in status {}",
                reservation.reservation_number, transaction_id, other
            ))),
        }
    }

    /// Close a paid rental
    #[instrument(skip(self))]
    pub async fn complete(&self, id: Uuid) -> AppResult<Reservation> {
        let _guard = self.lock(id).await;
        let mut reservation = self.load(id).await?;

        if reservation.status != ReservationStatus::Paid {
            return Err(AppError::InvalidState(format!(
                "cannot complete reservation {} in status {}",
                reservation.reservation_number, reservation.status
            )));
        }

        reservation.status = ReservationStatus::Completed;
        let updated = self.save(reservation, self.clock.now()).await?;

        info!("Completed reservation {}", updated.reservation_number);
        self.publish(ReservationEvent::Completed {
            reservation_id: updated.id,
        });

        Ok(updated)
    }

    /// Get a reservation
    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> AppResult<Reservation> {
        self.load(id).await
    }

    /// Look a reservation up by its number
    #[instrument(skip(self))]
    pub async fn find_by_number(&self, number: &str) -> AppResult<Option<Reservation>> {
        self.reservation_repo.find_by_number(number).await
    }

    /// Reservations that are neither cancelled nor completed
    #[instrument(skip(self))]
    pub async fn list_active(&self, limit: i64, offset: i64) -> AppResult<Vec<Reservation>> {
        self.reservation_repo.list_active(limit, offset).await
    }

    /// Every reservation of a client, newest first
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        client_id: i64,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Reservation>> {
        self.reservation_repo
            .list_by_client(client_id, limit, offset)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{booking, start, BookedVehicles, Harness, ScriptedNumbers};
    use crate::RandomReservationNumber;
    use chrono::Duration;
    use proptest::prelude::*;
    use rentline_core::models::{PickupMode, RefundPolicy};
    use rentline_core::traits::Repository;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_create_pending_reservation() {
        let h = Harness::new();
        let mut events = h.reservations.subscribe();

        let reservation = h.reservations.create(booking()).await.unwrap();

        assert_eq!(reservation.status, ReservationStatus::Pending);
        assert_eq!(reservation.final_amount, dec!(85.00));
        assert!(reservation.reservation_number.starts_with("RSV-"));
        assert_eq!(reservation.created_at, start());

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            ReservationEvent::Created {
                reservation_id: reservation.id,
                reservation_number: reservation.reservation_number.clone(),
            }
        );
    }

    #[tokio::test]
    async fn test_create_rejects_bad_ranges() {
        let h = Harness::new();

        let mut inverted = booking();
        inverted.return_date = inverted.pickup_date;
        assert!(matches!(
            h.reservations.create(inverted).await,
            Err(AppError::InvalidRange(_))
        ));

        let mut past = booking();
        past.pickup_date = start() - Duration::days(1);
        past.return_date = past.pickup_date + Duration::days(3);
        assert!(matches!(
            h.reservations.create(past).await,
            Err(AppError::InvalidRange(_))
        ));

        // Earlier the same day is still today.
        let mut this_morning = booking();
        this_morning.pickup_date = start() - Duration::hours(2);
        this_morning.return_date = this_morning.pickup_date + Duration::days(3);
        assert!(h.reservations.create(this_morning).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_rejects_pricing_mismatch() {
        let h = Harness::new();
        let mut request = booking();
        request.final_amount = dec!(84.99);

        let err = h.reservations.create(request).await.unwrap_err();
        assert_eq!(
            err,
            AppError::PricingMismatch {
                expected: "85.00".to_string(),
                supplied: "84.99".to_string(),
            }
        );
        assert_eq!(h.store.reservations.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_rejects_unavailable_vehicle() {
        let h = Harness::build(
            Arc::new(BookedVehicles(HashSet::from([42]))),
            Arc::new(RandomReservationNumber::default()),
            RefundPolicy::KeepReservation,
        );

        let err = h.reservations.create(booking()).await.unwrap_err();
        assert!(matches!(err, AppError::VehicleUnavailable(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_request() {
        let h = Harness::new();
        let mut request = booking();
        request.client_id = 0;

        assert!(matches!(
            h.reservations.create(request).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_number_collision_is_retried() {
        let h = Harness::build(
            Arc::new(crate::AlwaysAvailable),
            Arc::new(ScriptedNumbers::new(&[
                "RSV-AAAAAAAA",
                "RSV-AAAAAAAA",
                "RSV-BBBBBBBB",
            ])),
            RefundPolicy::KeepReservation,
        );

        let first = h.reservations.create(booking()).await.unwrap();
        let second = h.reservations.create(booking()).await.unwrap();

        assert_eq!(first.reservation_number, "RSV-AAAAAAAA");
        assert_eq!(second.reservation_number, "RSV-BBBBBBBB");
    }

    #[tokio::test]
    async fn test_number_collision_gives_up() {
        let h = Harness::build(
            Arc::new(crate::AlwaysAvailable),
            Arc::new(ScriptedNumbers::new(&["RSV-SAME0000"; 6])),
            RefundPolicy::KeepReservation,
        );

        h.reservations.create(booking()).await.unwrap();
        let err = h.reservations.create(booking()).await.unwrap_err();

        assert_eq!(
            err,
            AppError::DuplicateReservationNumber("RSV-SAME0000".to_string())
        );
    }

    #[tokio::test]
    async fn test_update_recomputes_amount() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();

        let changes = ReservationChanges {
            return_date: Some(reservation.return_date + Duration::days(1)),
            pickup_mode: Some(PickupMode::Delivery),
            delivery_fee: Some(dec!(12.50)),
            ..Default::default()
        };
        let updated = h.reservations.update(reservation.id, changes).await.unwrap();

        // 30 x 4 - 10 + 12.50 + 5
        assert_eq!(updated.final_amount, dec!(127.50));
        assert_eq!(updated.pickup_mode, PickupMode::Delivery);
    }

    #[tokio::test]
    async fn test_update_checks_supplied_amount() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();

        let changes = ReservationChanges {
            daily_rate: Some(dec!(40.00)),
            final_amount: Some(dec!(85.00)),
            ..Default::default()
        };
        let err = h.reservations.update(reservation.id, changes).await.unwrap_err();

        assert!(matches!(err, AppError::PricingMismatch { .. }));
        let stored = h.reservations.get(reservation.id).await.unwrap();
        assert_eq!(stored.pricing.daily_rate, dec!(30.00));
    }

    #[tokio::test]
    async fn test_paid_reservation_locks_billing_fields() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();
        h.reservations.mark_paid(reservation.id, "txn_1").await.unwrap();

        let err = h
            .reservations
            .update(
                reservation.id,
                ReservationChanges {
                    equipment_cost: Some(dec!(0.00)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let updated = h
            .reservations
            .update(
                reservation.id,
                ReservationChanges {
                    pickup_mode: Some(PickupMode::Delivery),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.pickup_mode, PickupMode::Delivery);
        assert_eq!(updated.status, ReservationStatus::Paid);
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();

        let first = h.reservations.confirm(reservation.id).await.unwrap();
        let second = h.reservations.confirm(reservation.id).await.unwrap();

        assert_eq!(first.status, ReservationStatus::Confirmed);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_mark_paid_is_idempotent() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();
        let mut events = h.reservations.subscribe();

        let first = h.reservations.mark_paid(reservation.id, "txn_1").await.unwrap();
        let second = h.reservations.mark_paid(reservation.id, "txn_1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.paid_transaction_id.as_deref(), Some("txn_1"));
        assert!(matches!(
            events.try_recv(),
            Ok(ReservationEvent::Paid { .. })
        ));
        assert!(events.try_recv().is_err());

        let other = h.reservations.mark_paid(reservation.id, "txn_2").await;
        assert!(matches!(other, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_cancel_paid_requires_force() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();
        h.reservations.mark_paid(reservation.id, "txn_1").await.unwrap();

        let err = h
            .reservations
            .cancel(reservation.id, Some("changed plans".into()), CancelMode::Standard)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(
            h.reservations.get(reservation.id).await.unwrap().status,
            ReservationStatus::Paid
        );

        let cancelled = h
            .reservations
            .cancel(reservation.id, Some("chargeback".into()), CancelMode::Force)
            .await
            .unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("chargeback"));
        assert_eq!(cancelled.cancelled_at, Some(start()));

        let again = h
            .reservations
            .cancel(reservation.id, None, CancelMode::Force)
            .await;
        assert!(matches!(again, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_cancelled_reservations_leave_active_listing() {
        let h = Harness::new();
        let kept = h.reservations.create(booking()).await.unwrap();
        let dropped = h.reservations.create(booking()).await.unwrap();

        h.reservations
            .cancel(dropped.id, None, CancelMode::Standard)
            .await
            .unwrap();

        let active = h.reservations.list_active(10, 0).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, kept.id);

        let history = h.reservations.history(7, 10, 0).await.unwrap();
        assert_eq!(history.len(), 2);

        let found = h
            .reservations
            .find_by_number(&dropped.reservation_number)
            .await
            .unwrap();
        assert_eq!(found.map(|r| r.status), Some(ReservationStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_complete_requires_paid() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();

        assert!(matches!(
            h.reservations.complete(reservation.id).await,
            Err(AppError::InvalidState(_))
        ));

        h.reservations.confirm(reservation.id).await.unwrap();
        h.reservations.mark_paid(reservation.id, "txn_1").await.unwrap();
        let completed = h.reservations.complete(reservation.id).await.unwrap();
        assert_eq!(completed.status, ReservationStatus::Completed);

        assert!(matches!(
            h.reservations.update(reservation.id, ReservationChanges::default()).await,
            Err(AppError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_reservation() {
        let h = Harness::new();
        assert!(matches!(
            h.reservations.confirm(Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Confirm,
        Pay,
        Complete,
        Cancel,
        ForceCancel,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Confirm),
            Just(Op::Pay),
            Just(Op::Complete),
            Just(Op::Cancel),
            Just(Op::ForceCancel),
        ]
    }

    fn rank(status: ReservationStatus) -> u8 {
        match status {
            ReservationStatus::Pending => 0,
            ReservationStatus::Confirmed => 1,
            ReservationStatus::Paid => 2,
            ReservationStatus::Completed => 3,
            ReservationStatus::Cancelled => 4,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Whatever the call order, statuses only move forward and cancelled is final.
        #[test]
        fn prop_status_never_moves_backwards(ops in prop::collection::vec(op(), 1..12)) {
            tokio_test::block_on(async {
                let h = Harness::new();
                let reservation = h.reservations.create(booking()).await.unwrap();
                let mut previous = reservation.status;

                for op in ops {
                    let _ = match op {
                        Op::Confirm => h.reservations.confirm(reservation.id).await,
                        Op::Pay => h.reservations.mark_paid(reservation.id, "txn_1").await,
                        Op::Complete => h.reservations.complete(reservation.id).await,
                        Op::Cancel => h.reservations.cancel(reservation.id, None, CancelMode::Standard).await,
                        Op::ForceCancel => h.reservations.cancel(reservation.id, None, CancelMode::Force).await,
                    };

                    let current = h.reservations.get(reservation.id).await.unwrap().status;
                    prop_assert!(rank(current) >= rank(previous));
                    if previous == ReservationStatus::Cancelled {
                        prop_assert_eq!(current, ReservationStatus::Cancelled);
                    }
                    previous = current;
                }
                Ok(())
            })?;
        }
    }
}
