//! Vehicle reservation model
//!
//! A reservation books one vehicle for a client over a date range and carries
//! the price breakdown the client agreed to. Status moves forward along
//! `pending -> confirmed -> paid -> completed`; `cancelled` is terminal.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Seconds in one billed rental day
const SECONDS_PER_DAY: i64 = 86_400;

/// Round a money amount to cents
#[inline]
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Reservation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Booking requested, not yet confirmed by the agency
    #[default]
    Pending,
    /// Agency accepted the booking
    Confirmed,
    /// A completed payment settled the booking
    Paid,
    /// Booking withdrawn (terminal)
    Cancelled,
    /// Rental finished (terminal)
    Completed,
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationStatus::Pending => write!(f, "pending"),
            ReservationStatus::Confirmed => write!(f, "confirmed"),
            ReservationStatus::Paid => write!(f, "paid"),
            ReservationStatus::Cancelled => write!(f, "cancelled"),
            ReservationStatus::Completed => write!(f, "completed"),
        }
    }
}

impl ReservationStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(ReservationStatus::Pending),
            "confirmed" => Some(ReservationStatus::Confirmed),
            "paid" => Some(ReservationStatus::Paid),
            "cancelled" => Some(ReservationStatus::Cancelled),
            "completed" => Some(ReservationStatus::Completed),
            _ => None,
        }
    }

    /// Position along the forward path, `None` for cancelled
    fn rank(&self) -> Option<u8> {
        match self {
            ReservationStatus::Pending => Some(0),
            ReservationStatus::Confirmed => Some(1),
            ReservationStatus::Paid => Some(2),
            ReservationStatus::Completed => Some(3),
            ReservationStatus::Cancelled => None,
        }
    }

    /// Check if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Cancelled | ReservationStatus::Completed
        )
    }

    /// Check if the default cancellation path accepts this status
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Pending | ReservationStatus::Confirmed
        )
    }

    /// Check if moving to `next` follows the forward path
    ///
    /// Cancellation is handled separately by the lifecycle since it depends
    /// on the cancel mode.
    pub fn can_advance_to(&self, next: ReservationStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }
}

/// How the client receives the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PickupMode {
    /// Client collects the vehicle at the agency
    #[default]
    SelfPickup,
    /// Agency delivers the vehicle
    Delivery,
}

impl fmt::Display for PickupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PickupMode::SelfPickup => write!(f, "self_pickup"),
            PickupMode::Delivery => write!(f, "delivery"),
        }
    }
}

impl PickupMode {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "self_pickup" => Some(PickupMode::SelfPickup),
            "delivery" => Some(PickupMode::Delivery),
            _ => None,
        }
    }
}

/// Number of started 24h periods between pickup and return, at least one
pub fn billed_days(pickup_date: DateTime<Utc>, return_date: DateTime<Utc>) -> i64 {
    let seconds = (return_date - pickup_date).num_seconds();
    if seconds <= 0 {
        return 1;
    }
    ((seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY).max(1)
}

/// Price components agreed at booking time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PricingBreakdown {
    /// Price of one rental day
    pub daily_rate: Decimal,
    /// Discount subtracted from the rental price
    pub discount_amount: Decimal,
    /// Fee charged for delivery pickup mode
    pub delivery_fee: Decimal,
    /// Cost of extra equipment (child seat, GPS, ...)
    pub equipment_cost: Decimal,
}

impl PricingBreakdown {
    /// `daily_rate x billed_days - discount + delivery_fee + equipment_cost`, in cents
    pub fn final_amount(&self, billed_days: i64) -> Decimal {
        round_money(
            self.daily_rate * Decimal::from(billed_days) - self.discount_amount
                + self.delivery_fee
                + self.equipment_cost,
        )
    }

    /// Reject negative components
    pub fn validate_components(&self) -> Result<(), AppError> {
        let components = [
            ("daily_rate", self.daily_rate),
            ("discount_amount", self.discount_amount),
            ("delivery_fee", self.delivery_fee),
            ("equipment_cost", self.equipment_cost),
        ];

        for (name, value) in components {
            if value < Decimal::ZERO {
                return Err(AppError::Validation(format!(
                    "{} must not be negative (got {})",
                    name, value
                )));
            }
        }

        Ok(())
    }

    /// Check a supplied final amount against the formula
    ///
    /// Returns the reconciled amount. Fails with `PricingMismatch` when the
    /// two disagree after rounding to cents or when the formula goes negative.
    pub fn reconcile(&self, billed_days: i64, supplied: Decimal) -> Result<Decimal, AppError> {
        let expected = self.final_amount(billed_days);

        if expected < Decimal::ZERO || expected != round_money(supplied) {
            return Err(AppError::PricingMismatch {
                expected: expected.to_string(),
                supplied: supplied.to_string(),
            });
        }

        Ok(expected)
    }
}

/// Validate the rental window
///
/// `today` is the current instant; pickup must not fall on an earlier
/// calendar day.
pub fn validate_range(
    pickup_date: DateTime<Utc>,
    return_date: DateTime<Utc>,
    today: DateTime<Utc>,
) -> Result<(), AppError> {
    if return_date <= pickup_date {
        return Err(AppError::InvalidRange(format!(
            "return date {} must be after pickup date {}",
            return_date, pickup_date
        )));
    }

    if pickup_date.date_naive() < today.date_naive() {
        return Err(AppError::InvalidRange(format!(
            "pickup date {} is in the past",
            pickup_date
        )));
    }

    Ok(())
}

/// Reservation entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique identifier (UUID)
    pub id: Uuid,

    /// Human-readable unique number (e.g. `RSV-7K2M9QXA`)
    pub reservation_number: String,

    /// Renting agency
    pub agency_id: i64,

    /// Booked vehicle
    pub vehicle_id: i64,

    /// Booking client
    pub client_id: i64,

    /// Start of the rental
    pub pickup_date: DateTime<Utc>,

    /// End of the rental
    pub return_date: DateTime<Utc>,

    /// How the vehicle is handed over
    pub pickup_mode: PickupMode,

    /// Agreed price components
    pub pricing: PricingBreakdown,

    /// Amount owed, reconciled against `pricing`
    pub final_amount: Decimal,

    /// Current status
    pub status: ReservationStatus,

    /// Reason given when cancelled
    pub cancellation_reason: Option<String>,

    /// Processor transaction that settled the reservation
    pub paid_transaction_id: Option<String>,

    /// Soft-removal timestamp
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Billed days of the current window
    pub fn billed_days(&self) -> i64 {
        billed_days(self.pickup_date, self.return_date)
    }

    /// Amount the pricing breakdown yields for the current window
    pub fn expected_amount(&self) -> Decimal {
        self.pricing.final_amount(self.billed_days())
    }

    /// Check if the reservation shows up in active listings
    pub fn is_active(&self) -> bool {
        self.cancelled_at.is_none() && !self.status.is_terminal()
    }
}

impl Default for Reservation {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reservation_number: String::new(),
            agency_id: 0,
            vehicle_id: 0,
            client_id: 0,
            pickup_date: now,
            return_date: now + chrono::Duration::days(1),
            pickup_mode: PickupMode::SelfPickup,
            pricing: PricingBreakdown::default(),
            final_amount: Decimal::ZERO,
            status: ReservationStatus::Pending,
            cancellation_reason: None,
            paid_transaction_id: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Booking request handed over by the transport layer
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewReservation {
    #[validate(range(min = 1))]
    pub agency_id: i64,

    #[validate(range(min = 1))]
    pub vehicle_id: i64,

    #[validate(range(min = 1))]
    pub client_id: i64,

    pub pickup_date: DateTime<Utc>,

    pub return_date: DateTime<Utc>,

    #[serde(default)]
    pub pickup_mode: PickupMode,

    pub pricing: PricingBreakdown,

    /// Amount the client was quoted
    pub final_amount: Decimal,
}

/// Partial update of a reservation; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReservationChanges {
    pub pickup_date: Option<DateTime<Utc>>,
    pub return_date: Option<DateTime<Utc>>,
    pub pickup_mode: Option<PickupMode>,
    pub daily_rate: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
    pub delivery_fee: Option<Decimal>,
    pub equipment_cost: Option<Decimal>,
    /// New quoted amount; recomputed from the formula when absent
    pub final_amount: Option<Decimal>,
}

impl ReservationChanges {
    /// Check if any date or pricing field is touched
    pub fn touches_billing(&self) -> bool {
        self.pickup_date.is_some()
            || self.return_date.is_some()
            || self.daily_rate.is_some()
            || self.discount_amount.is_some()
            || self.delivery_fee.is_some()
            || self.equipment_cost.is_some()
            || self.final_amount.is_some()
    }
}

/// How hard a cancellation pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CancelMode {
    /// Only pending or confirmed reservations
    #[default]
    Standard,
    /// Also paid or completed reservations (financial cleanup)
    Force,
}

/// Domain events published by the reservation lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReservationEvent {
    Created {
        reservation_id: Uuid,
        reservation_number: String,
    },
    Updated {
        reservation_id: Uuid,
    },
    Confirmed {
        reservation_id: Uuid,
    },
    Paid {
        reservation_id: Uuid,
        transaction_id: String,
    },
    Completed {
        reservation_id: Uuid,
    },
    Cancelled {
        reservation_id: Uuid,
        previous_status: ReservationStatus,
        reason: Option<String>,
    },
}

impl ReservationEvent {
    /// Reservation the event is about
    pub fn reservation_id(&self) -> Uuid {
        match self {
            ReservationEvent::Created { reservation_id, .. }
            | ReservationEvent::Updated { reservation_id }
            | ReservationEvent::Confirmed { reservation_id }
            | ReservationEvent::Paid { reservation_id, .. }
            | ReservationEvent::Completed { reservation_id }
            | ReservationEvent::Cancelled { reservation_id, .. } => *reservation_id,
        }
    }
}
