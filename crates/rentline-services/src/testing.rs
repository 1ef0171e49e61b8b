//! Shared fixtures for service tests

use crate::{
    AdvertisementLifecycle, AlwaysAvailable, FixedClock, PaymentReconciler, RatingAggregator,
    RandomReservationNumber, ReservationLifecycle,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use rentline_core::{
    config::ReservationConfig,
    models::{
        NewReservation, PaymentCapture, PaymentStatus, PickupMode, PricingBreakdown,
        RefundPolicy,
    },
    traits::{ReservationNumberGenerator, VehicleAvailability},
    AppResult,
};
use rentline_db::{
    MemoryAdvertisementRepository, MemoryPaymentRepository, MemoryPostRepository,
    MemoryReservationRepository, MemoryStore,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
}

/// Hands out scripted numbers, then falls back to random ones
pub struct ScriptedNumbers {
    queue: Mutex<VecDeque<String>>,
    fallback: RandomReservationNumber,
}

impl ScriptedNumbers {
    pub fn new(numbers: &[&str]) -> Self {
        Self {
            queue: Mutex::new(numbers.iter().map(|n| n.to_string()).collect()),
            fallback: RandomReservationNumber::default(),
        }
    }
}

impl ReservationNumberGenerator for ScriptedNumbers {
    fn generate(&self) -> String {
        self.queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.generate())
    }
}

/// Rejects the listed vehicles
#[derive(Default)]
pub struct BookedVehicles(pub HashSet<i64>);

#[async_trait]
impl VehicleAvailability for BookedVehicles {
    async fn is_available(
        &self,
        vehicle_id: i64,
        _pickup_date: DateTime<Utc>,
        _return_date: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(!self.0.contains(&vehicle_id))
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub clock: Arc<FixedClock>,
    pub reservations: Arc<ReservationLifecycle<MemoryReservationRepository>>,
    pub payments: PaymentReconciler<MemoryPaymentRepository, MemoryReservationRepository>,
    pub advertisements: AdvertisementLifecycle<MemoryAdvertisementRepository, MemoryPostRepository>,
    pub ratings: RatingAggregator<MemoryPostRepository>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(
            Arc::new(AlwaysAvailable),
            Arc::new(RandomReservationNumber::default()),
            RefundPolicy::KeepReservation,
        )
    }

    pub fn build(
        availability: Arc<dyn VehicleAvailability>,
        numbers: Arc<dyn ReservationNumberGenerator>,
        refund_policy: RefundPolicy,
    ) -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(FixedClock::new(start()));

        let reservations = Arc::new(ReservationLifecycle::new(
            store.reservations.clone(),
            availability,
            numbers,
            clock.clone(),
            &ReservationConfig::default(),
        ));
        let payments = PaymentReconciler::new(
            store.payments.clone(),
            reservations.clone(),
            clock.clone(),
            refund_policy,
        );
        let advertisements = AdvertisementLifecycle::new(
            store.advertisements.clone(),
            store.posts.clone(),
            clock.clone(),
        );
        let ratings = RatingAggregator::new(store.posts.clone());

        Self {
            store,
            clock,
            reservations,
            payments,
            advertisements,
            ratings,
        }
    }
}

/// Three-day booking starting tomorrow at 10:00
pub fn booking() -> NewReservation {
    let pickup = start() + Duration::days(1) + Duration::hours(1);
    NewReservation {
        agency_id: 3,
        vehicle_id: 42,
        client_id: 7,
        pickup_date: pickup,
        return_date: pickup + Duration::days(3),
        pickup_mode: PickupMode::SelfPickup,
        pricing: PricingBreakdown {
            daily_rate: dec!(30.00),
            discount_amount: dec!(10.00),
            delivery_fee: Decimal::ZERO,
            equipment_cost: dec!(5.00),
        },
        final_amount: dec!(85.00),
    }
}

pub fn capture(reservation_id: Uuid, transaction_id: &str, status: PaymentStatus) -> PaymentCapture {
    PaymentCapture {
        reservation_id,
        transaction_id: transaction_id.to_string(),
        amount: dec!(85.00),
        currency: "eur".to_string(),
        processor_status: status,
        payload: serde_json::json!({ "processor": "test" }),
    }
}
