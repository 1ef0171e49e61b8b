//! Rentline Database Layer
//!
//! This crate provides storage for the Rentline lifecycle engine:
//!
//! - Connection pool management and embedded migrations with sqlx
//! - PostgreSQL repository implementations for every domain entity
//! - Unique-constraint violations translated to domain errors
//! - An in-memory store implementing the same traits, for tests and local runs

pub mod memory;
pub mod pool;
pub mod repositories;

pub use memory::{
    MemoryAdvertisementRepository, MemoryPaymentRepository, MemoryPostRepository,
    MemoryReservationRepository, MemoryStore,
};
pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use rentline_core::{AppError, AppResult};
pub use sqlx::PgPool;
