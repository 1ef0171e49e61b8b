//! Repository implementations
//!
//! This module contains concrete implementations of all repository traits
//! defined in rentline-core, using sqlx for PostgreSQL access.

pub mod advertisement_repo;
pub mod payment_repo;
pub mod post_repo;
pub mod reservation_repo;

pub use advertisement_repo::PgAdvertisementRepository;
pub use payment_repo::PgPaymentRepository;
pub use post_repo::PgPostRepository;
pub use reservation_repo::PgReservationRepository;

use rentline_core::AppError;
use tracing::error;

/// Wrap a sqlx failure as a retryable database error
pub(crate) fn db_error(action: &str, e: sqlx::Error) -> AppError {
    error!("Database error ({}): {}", action, e);
    AppError::Database(format!("Failed to {}: {}", action, e))
}

/// A stored enum column holding a value the code does not know
pub(crate) fn corrupt_column(column: &str, value: &str) -> AppError {
    error!("Unknown {} in database: {:?}", column, value);
    AppError::Internal(format!("unknown {} {:?}", column, value))
}

/// Check if a sqlx failure is a unique constraint violation
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Name of the violated constraint, when the database reports one
pub(crate) fn violated_constraint(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db_err) => db_err.constraint().map(str::to_string),
        _ => None,
    }
}
