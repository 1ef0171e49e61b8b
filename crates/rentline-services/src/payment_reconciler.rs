//! Payment reconciliation service
//!
//! Records captures reported by the payment processor and keeps the owning
//! reservation in step:
//! - A completed capture marks its reservation paid
//! - A capture is recorded once per transaction id
//! - A reservation carries at most one completed payment
//!
//! Capture and mark-paid are two writes. If the second one fails, replaying
//! [`PaymentReconciler::reconcile`] with the transaction id finishes the job.

use rentline_core::{
    models::{
        CancelMode, Payment, PaymentCapture, PaymentChanges, PaymentStatus, RefundPolicy,
        Reservation, ReservationStatus,
    },
    traits::{Clock, PaymentRepository, ReservationRepository},
    AppError, AppResult,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::constants::REFUND_CANCELLATION_REASON;
use crate::reservation_lifecycle::ReservationLifecycle;

/// Payment reconciler
///
/// Payment writes take the reservation's aggregate lock so they serialize
/// with every other change to that reservation.
pub struct PaymentReconciler<P: PaymentRepository, R: ReservationRepository> {
    payment_repo: Arc<P>,
    reservations: Arc<ReservationLifecycle<R>>,
    clock: Arc<dyn Clock>,
    refund_policy: RefundPolicy,
}

impl<P: PaymentRepository, R: ReservationRepository> PaymentReconciler<P, R> {
    /// Create a new payment reconciler
    pub fn new(
        payment_repo: Arc<P>,
        reservations: Arc<ReservationLifecycle<R>>,
        clock: Arc<dyn Clock>,
        refund_policy: RefundPolicy,
    ) -> Self {
        Self {
            payment_repo,
            reservations,
            clock,
            refund_policy,
        }
    }

    async fn load(&self, payment_id: Uuid) -> AppResult<Payment> {
        self.payment_repo
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {}", payment_id)))
    }

    /// Check that a completed payment may settle `reservation`
    async fn ensure_settleable(&self, reservation: &Reservation, payment_id: Uuid) -> AppResult<()> {
        if let Some(existing) = self
            .payment_repo
            .find_completed_for_reservation(reservation.id)
            .await?
        {
            if existing.id != payment_id {
                warn!(
                    "Reservation {} already settled by transaction {}",
                    reservation.reservation_number, existing.transaction_id
                );
                return Err(AppError::AlreadyPaid(reservation.id.to_string()));
            }
        }

        match reservation.status {
            ReservationStatus::Pending | ReservationStatus::Confirmed => Ok(()),
            ReservationStatus::Paid => Err(AppError::AlreadyPaid(reservation.id.to_string())),
            other => Err(AppError::InvalidState(format!(
                "reservation {} is {} and cannot take a payment",
                reservation.reservation_number, other
            ))),
        }
    }

    /// Record a capture reported by the processor
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The capture fails validation or carries a negative amount
    /// - The reservation does not exist
    /// - The transaction id was already recorded (nothing is written)
    /// - The reservation already has a completed payment
    /// - A completed capture targets a reservation that cannot be paid
    #[instrument(skip(self, capture), fields(transaction_id = %capture.transaction_id))]
    pub async fn record_capture(&self, capture: PaymentCapture) -> AppResult<Payment> {
        capture.validate()?;
        if capture.amount < Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "payment amount must not be negative (got {})",
                capture.amount
            )));
        }

        let _guard = self.reservations.lock(capture.reservation_id).await;
        let reservation = self.reservations.get(capture.reservation_id).await?;

        if self
            .payment_repo
            .find_by_transaction_id(&capture.transaction_id)
            .await?
            .is_some()
        {
            warn!("Duplicate capture for transaction {}", capture.transaction_id);
            return Err(AppError::DuplicateTransaction(capture.transaction_id));
        }

        if let Some(existing) = self
            .payment_repo
            .find_completed_for_reservation(reservation.id)
            .await?
        {
            warn!(
                "Capture {} rejected: reservation {} already settled by transaction {}",
                capture.transaction_id, reservation.reservation_number, existing.transaction_id
            );
            return Err(AppError::AlreadyPaid(reservation.id.to_string()));
        }

        let payment = Payment::from_capture(&capture, self.clock.now());

        if payment.is_completed() {
            self.ensure_settleable(&reservation, payment.id).await?;

            if payment.amount != reservation.final_amount {
                warn!(
                    "Capture {} amount {} differs from reservation {} amount {}",
                    payment.transaction_id,
                    payment.amount,
                    reservation.reservation_number,
                    reservation.final_amount
                );
            }
        }

        let payment = self.payment_repo.create(&payment).await?;

        info!(
            "Recorded {} payment {} of {} {} for reservation {}",
            payment.status,
            payment.transaction_id,
            payment.amount,
            payment.currency,
            reservation.reservation_number
        );

        if payment.is_completed() {
            if let Err(e) = self
                .reservations
                .mark_paid_locked(reservation.id, &payment.transaction_id)
                .await
            {
                error!(
                    "Payment {} recorded but reservation {} not marked paid: {}",
                    payment.transaction_id, reservation.reservation_number, e
                );
                return Err(e);
            }
        }

        Ok(payment)
    }

    /// Apply a missing mark-paid for a completed payment
    ///
    /// Safe to call any number of times.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, transaction_id: &str) -> AppResult<Payment> {
        let payment = self
            .payment_repo
            .find_by_transaction_id(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {}", transaction_id)))?;

        if !payment.is_completed() {
            debug!(
                "Payment {} is {}; nothing to reconcile",
                transaction_id, payment.status
            );
            return Ok(payment);
        }

        let _guard = self.reservations.lock(payment.reservation_id).await;
        let reservation = self.reservations.get(payment.reservation_id).await?;

        if reservation.paid_transaction_id.as_deref() == Some(transaction_id) {
            debug!(
                "Reservation {} already reflects payment {}",
                reservation.reservation_number, transaction_id
            );
            return Ok(payment);
        }

        self.reservations
            .mark_paid_locked(reservation.id, transaction_id)
            .await?;

        info!(
            "Reconciled payment {} with reservation {}",
            transaction_id, reservation.reservation_number
        );

        Ok(payment)
    }

    /// Manually correct a recorded payment
    ///
    /// Status moves are one-way. Reaching `completed` marks the reservation
    /// paid; reaching `refunded` follows the configured refund policy.
    #[instrument(skip(self, changes))]
    pub async fn update(&self, payment_id: Uuid, changes: PaymentChanges) -> AppResult<Payment> {
        let current = self.load(payment_id).await?;
        let _guard = self.reservations.lock(current.reservation_id).await;
        let mut payment = self.load(payment_id).await?;

        let transition = match changes.status {
            Some(next) if next != payment.status => {
                if !payment.status.can_transition_to(next) {
                    return Err(AppError::InvalidState(format!(
                        "payment {} cannot move from {} to {}",
                        payment.transaction_id, payment.status, next
                    )));
                }
                Some(next)
            }
            _ => None,
        };

        if transition == Some(PaymentStatus::Completed) {
            let reservation = self.reservations.get(payment.reservation_id).await?;
            self.ensure_settleable(&reservation, payment.id).await?;
        }

        if let Some(next) = transition {
            payment.status = next;
        }
        if let Some(payload) = changes.payload {
            payment.payload = payload;
        }
        payment.updated_at = self.clock.now();

        let updated = self.payment_repo.update(&payment).await?;

        match transition {
            Some(PaymentStatus::Completed) => {
                info!("Payment {} completed manually", updated.transaction_id);
                self.reservations
                    .mark_paid_locked(updated.reservation_id, &updated.transaction_id)
                    .await?;
            }
            Some(PaymentStatus::Refunded) => self.apply_refund(&updated).await?,
            Some(other) => debug!("Payment {} moved to {}", updated.transaction_id, other),
            None => debug!("Payment {} payload updated", updated.transaction_id),
        }

        Ok(updated)
    }

    async fn apply_refund(&self, payment: &Payment) -> AppResult<()> {
        match self.refund_policy {
            RefundPolicy::KeepReservation => {
                info!(
                    "Payment {} refunded; reservation {} left as is",
                    payment.transaction_id, payment.reservation_id
                );
                Ok(())
            }
            RefundPolicy::CancelReservation => {
                let reservation = self.reservations.get(payment.reservation_id).await?;
                if reservation.status == ReservationStatus::Cancelled {
                    return Ok(());
                }

                info!(
                    "Payment {} refunded; cancelling reservation {}",
                    payment.transaction_id, reservation.reservation_number
                );
                self.reservations
                    .cancel_locked(
                        reservation.id,
                        Some(REFUND_CANCELLATION_REASON.to_string()),
                        CancelMode::Force,
                    )
                    .await?;
                Ok(())
            }
        }
    }

    /// Remove a payment record
    ///
    /// The reservation keeps whatever status the payment gave it.
    #[instrument(skip(self))]
    pub async fn delete(&self, payment_id: Uuid) -> AppResult<()> {
        let payment = self.load(payment_id).await?;
        let _guard = self.reservations.lock(payment.reservation_id).await;

        if !self.payment_repo.delete(payment_id).await? {
            return Err(AppError::NotFound(format!("Payment {}", payment_id)));
        }

        info!(
            "Deleted payment {} of reservation {}",
            payment.transaction_id, payment.reservation_id
        );
        Ok(())
    }

    /// Get a payment
    #[instrument(skip(self))]
    pub async fn get(&self, payment_id: Uuid) -> AppResult<Payment> {
        self.load(payment_id).await
    }

    /// Payments of a reservation, oldest first
    #[instrument(skip(self))]
    pub async fn list_for_reservation(&self, reservation_id: Uuid) -> AppResult<Vec<Payment>> {
        self.payment_repo.find_by_reservation(reservation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{booking, capture, Harness};
    use crate::{AlwaysAvailable, RandomReservationNumber};
    use rentline_core::models::ReservationEvent;
    use rentline_core::traits::Repository;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_completed_capture_marks_reservation_paid() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();

        let payment = h
            .payments
            .record_capture(capture(reservation.id, "txn_1", PaymentStatus::Completed))
            .await
            .unwrap();

        assert_eq!(payment.currency, "EUR");
        let paid = h.reservations.get(reservation.id).await.unwrap();
        assert_eq!(paid.status, ReservationStatus::Paid);
        assert_eq!(paid.paid_transaction_id.as_deref(), Some("txn_1"));
    }

    #[tokio::test]
    async fn test_pending_capture_leaves_reservation() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();

        h.payments
            .record_capture(capture(reservation.id, "txn_1", PaymentStatus::Approved))
            .await
            .unwrap();

        let stored = h.reservations.get(reservation.id).await.unwrap();
        assert_eq!(stored.status, ReservationStatus::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_capture_is_rejected() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();
        h.payments
            .record_capture(capture(reservation.id, "txn_1", PaymentStatus::Completed))
            .await
            .unwrap();

        let mut events = h.reservations.subscribe();
        let err = h
            .payments
            .record_capture(capture(reservation.id, "txn_1", PaymentStatus::Completed))
            .await
            .unwrap_err();

        assert_eq!(err, AppError::DuplicateTransaction("txn_1".to_string()));
        assert_eq!(h.store.payments.count().await.unwrap(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_completed_capture_is_already_paid() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();
        h.payments
            .record_capture(capture(reservation.id, "txn_1", PaymentStatus::Completed))
            .await
            .unwrap();

        let err = h
            .payments
            .record_capture(capture(reservation.id, "txn_2", PaymentStatus::Completed))
            .await
            .unwrap_err();

        assert_eq!(err, AppError::AlreadyPaid(reservation.id.to_string()));
        assert_eq!(h.store.payments.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_any_capture_after_settlement_is_already_paid() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();
        h.payments
            .record_capture(capture(reservation.id, "txn_1", PaymentStatus::Completed))
            .await
            .unwrap();

        for (txn, status) in [
            ("txn_2", PaymentStatus::Approved),
            ("txn_3", PaymentStatus::Created),
            ("txn_4", PaymentStatus::Failed),
        ] {
            let err = h
                .payments
                .record_capture(capture(reservation.id, txn, status))
                .await
                .unwrap_err();
            assert_eq!(err, AppError::AlreadyPaid(reservation.id.to_string()));
        }

        assert_eq!(h.store.payments.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_completed_captures_settle_once() {
        let h = Arc::new(Harness::new());
        let reservation = h.reservations.create(booking()).await.unwrap();

        let handles = ["txn_a", "txn_b"].map(|txn| {
            let h = h.clone();
            tokio::spawn(async move {
                h.payments
                    .record_capture(capture(reservation.id, txn, PaymentStatus::Completed))
                    .await
            })
        });

        let mut settled = 0;
        for result in futures::future::join_all(handles).await {
            match result.unwrap() {
                Ok(_) => settled += 1,
                Err(e) => assert_eq!(e, AppError::AlreadyPaid(reservation.id.to_string())),
            }
        }

        assert_eq!(settled, 1);
        assert_eq!(h.store.payments.count().await.unwrap(), 1);
        assert_eq!(
            h.reservations.get(reservation.id).await.unwrap().status,
            ReservationStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_capture_validation() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();

        let mut bad_currency = capture(reservation.id, "txn_1", PaymentStatus::Completed);
        bad_currency.currency = "EURO".to_string();
        assert!(matches!(
            h.payments.record_capture(bad_currency).await,
            Err(AppError::Validation(_))
        ));

        let mut negative = capture(reservation.id, "txn_2", PaymentStatus::Completed);
        negative.amount = dec!(-1.00);
        assert!(matches!(
            h.payments.record_capture(negative).await,
            Err(AppError::Validation(_))
        ));

        let orphan = capture(Uuid::new_v4(), "txn_3", PaymentStatus::Completed);
        assert!(matches!(
            h.payments.record_capture(orphan).await,
            Err(AppError::NotFound(_))
        ));

        assert_eq!(h.store.payments.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_capture_on_cancelled_reservation_is_rejected() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();
        h.reservations
            .cancel(reservation.id, None, CancelMode::Standard)
            .await
            .unwrap();

        let err = h
            .payments
            .record_capture(capture(reservation.id, "txn_1", PaymentStatus::Completed))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(h.store.payments.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_recovers_failed_mark_paid() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();

        h.store.reservations.fail_next_update();
        let err = h
            .payments
            .record_capture(capture(reservation.id, "txn_1", PaymentStatus::Completed))
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let stored = h.reservations.get(reservation.id).await.unwrap();
        assert_eq!(stored.status, ReservationStatus::Pending);
        assert_eq!(h.store.payments.count().await.unwrap(), 1);

        h.payments.reconcile("txn_1").await.unwrap();
        h.payments.reconcile("txn_1").await.unwrap();

        let stored = h.reservations.get(reservation.id).await.unwrap();
        assert_eq!(stored.status, ReservationStatus::Paid);
        assert_eq!(stored.paid_transaction_id.as_deref(), Some("txn_1"));
    }

    #[tokio::test]
    async fn test_manual_completion_marks_paid() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();
        let payment = h
            .payments
            .record_capture(capture(reservation.id, "txn_1", PaymentStatus::Created))
            .await
            .unwrap();

        let updated = h
            .payments
            .update(
                payment.id,
                PaymentChanges {
                    status: Some(PaymentStatus::Completed),
                    payload: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, PaymentStatus::Completed);
        assert_eq!(
            h.reservations.get(reservation.id).await.unwrap().status,
            ReservationStatus::Paid
        );

        let backwards = h
            .payments
            .update(
                payment.id,
                PaymentChanges {
                    status: Some(PaymentStatus::Approved),
                    payload: None,
                },
            )
            .await;
        assert!(matches!(backwards, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_refund_keeps_reservation_by_default() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();
        let payment = h
            .payments
            .record_capture(capture(reservation.id, "txn_1", PaymentStatus::Completed))
            .await
            .unwrap();

        h.payments
            .update(
                payment.id,
                PaymentChanges {
                    status: Some(PaymentStatus::Refunded),
                    payload: Some(serde_json::json!({ "refund": "rf_1" })),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            h.reservations.get(reservation.id).await.unwrap().status,
            ReservationStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_refund_can_cancel_reservation() {
        let h = Harness::build(
            Arc::new(AlwaysAvailable),
            Arc::new(RandomReservationNumber::default()),
            RefundPolicy::CancelReservation,
        );
        let reservation = h.reservations.create(booking()).await.unwrap();
        let payment = h
            .payments
            .record_capture(capture(reservation.id, "txn_1", PaymentStatus::Completed))
            .await
            .unwrap();
        let mut events = h.reservations.subscribe();

        h.payments
            .update(
                payment.id,
                PaymentChanges {
                    status: Some(PaymentStatus::Refunded),
                    payload: None,
                },
            )
            .await
            .unwrap();

        let cancelled = h.reservations.get(reservation.id).await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(
            cancelled.cancellation_reason.as_deref(),
            Some(REFUND_CANCELLATION_REASON)
        );
        assert_eq!(
            events.try_recv().unwrap(),
            ReservationEvent::Cancelled {
                reservation_id: reservation.id,
                previous_status: ReservationStatus::Paid,
                reason: Some(REFUND_CANCELLATION_REASON.to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_delete_keeps_reservation_state() {
        let h = Harness::new();
        let reservation = h.reservations.create(booking()).await.unwrap();
        let payment = h
            .payments
            .record_capture(capture(reservation.id, "txn_1", PaymentStatus::Completed))
            .await
            .unwrap();

        h.payments.delete(payment.id).await.unwrap();

        assert!(h
            .payments
            .list_for_reservation(reservation.id)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            h.reservations.get(reservation.id).await.unwrap().status,
            ReservationStatus::Paid
        );
        assert!(matches!(
            h.payments.delete(payment.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
