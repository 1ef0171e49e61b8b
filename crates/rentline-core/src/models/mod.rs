//! Domain models for Rentline
//!
//! This module contains all the core domain models used throughout the engine.

pub mod advertisement;
pub mod payment;
pub mod post;
pub mod reservation;

pub use advertisement::{
    Advertisement, AdvertisementOrder, AdvertisementStatus, BoostPurchase, MAX_BOOST_DAYS,
};
pub use payment::{Payment, PaymentCapture, PaymentChanges, PaymentStatus, RefundPolicy};
pub use post::{Post, PostRating, MAX_STARS, MIN_STARS};
pub use reservation::{
    billed_days, round_money, validate_range, CancelMode, NewReservation, PickupMode,
    PricingBreakdown, Reservation, ReservationChanges, ReservationEvent, ReservationStatus,
};
