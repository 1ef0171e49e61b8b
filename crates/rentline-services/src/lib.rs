//! Business logic services for Rentline
//!
//! This crate contains the lifecycle and aggregation services of the
//! vehicle rental marketplace, built on the repository traits of
//! `rentline-core`.
//!
//! # Architecture
//!
//! Services are designed to be composable and testable:
//! - Each service owns its dependencies (repositories, clock, collaborators)
//! - Services are wrapped in Arc for safe sharing across async tasks
//! - Read-modify-write sequences are serialized per aggregate
//! - All operations are instrumented with tracing
//!
//! # Services
//!
//! - `ReservationLifecycle` - Booking state machine, pricing and range checks
//! - `PaymentReconciler` - Processor captures and their effect on reservations
//! - `AdvertisementLifecycle` - Post boost windows, merges and expiry sweep
//! - `RatingAggregator` - Per-post star counters and average

pub mod advertisement_lifecycle;
pub mod availability;
pub mod clock;
pub mod locks;
pub mod numbering;
pub mod payment_reconciler;
pub mod rating_aggregator;
pub mod reservation_lifecycle;

#[cfg(test)]
mod testing;

pub use advertisement_lifecycle::AdvertisementLifecycle;
pub use availability::AlwaysAvailable;
pub use clock::{FixedClock, SystemClock};
pub use locks::AggregateLocks;
pub use numbering::RandomReservationNumber;
pub use payment_reconciler::PaymentReconciler;
pub use rating_aggregator::RatingAggregator;
pub use reservation_lifecycle::ReservationLifecycle;

/// Business logic constants
pub mod constants {
    /// Buffered reservation events per subscriber before it starts lagging
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;

    /// Cancellation reason recorded when a refund cancels its reservation
    pub const REFUND_CANCELLATION_REASON: &str = "payment refunded";
}
