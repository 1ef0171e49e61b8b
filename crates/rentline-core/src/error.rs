//! Unified error handling for Rentline
//!
//! Every failure the engine can report is a variant of [`AppError`]. Domain
//! variants are kept distinct so transports can map each of them to its own
//! user-facing response through [`AppError::error_code`] and
//! [`AppError::http_status`].

use thiserror::Error;

/// Main application error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Lookup Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    // ==================== Lifecycle Errors ====================
    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Pricing mismatch: expected {expected}, got {supplied}")]
    PricingMismatch { expected: String, supplied: String },

    #[error("Vehicle unavailable: {0}")]
    VehicleUnavailable(String),

    #[error("Concurrent update: {0}")]
    ConcurrentUpdate(String),

    // ==================== Uniqueness Errors ====================
    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Duplicate order: {0}")]
    DuplicateOrder(String),

    #[error("Duplicate reservation number: {0}")]
    DuplicateReservationNumber(String),

    #[error("Reservation already paid: {0}")]
    AlreadyPaid(String),

    // ==================== Rating Errors ====================
    #[error("Invalid rating: {0}")]
    InvalidRating(i32),

    #[error("Inconsistent aggregate: {0}")]
    Inconsistent(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status a transport should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidRange(_) | AppError::InvalidRating(_) => {
                400
            }

            // 404 Not Found
            AppError::NotFound(_) => 404,

            // 409 Conflict
            AppError::InvalidState(_)
            | AppError::VehicleUnavailable(_)
            | AppError::ConcurrentUpdate(_)
            | AppError::DuplicateTransaction(_)
            | AppError::DuplicateOrder(_)
            | AppError::DuplicateReservationNumber(_)
            | AppError::AlreadyPaid(_)
            | AppError::Inconsistent(_) => 409,

            // 422 Unprocessable Entity
            AppError::PricingMismatch { .. } => 422,

            // 503 Service Unavailable (retryable)
            AppError::Database(_) | AppError::Pool(_) | AppError::Transaction(_) => 503,

            // 500 Internal Server Error
            AppError::Internal(_) | AppError::Config(_) | AppError::Serialization(_) => 500,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidState(_) => "invalid_state",
            AppError::InvalidRange(_) => "invalid_range",
            AppError::PricingMismatch { .. } => "pricing_mismatch",
            AppError::VehicleUnavailable(_) => "vehicle_unavailable",
            AppError::ConcurrentUpdate(_) => "concurrent_update",
            AppError::DuplicateTransaction(_) => "duplicate_transaction",
            AppError::DuplicateOrder(_) => "duplicate_order",
            AppError::DuplicateReservationNumber(_) => "duplicate_reservation_number",
            AppError::AlreadyPaid(_) => "already_paid",
            AppError::InvalidRating(_) => "invalid_rating",
            AppError::Inconsistent(_) => "inconsistent",
            AppError::Validation(_) => "validation_error",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the caller may retry the same operation unchanged
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Pool(_)
                | AppError::Transaction(_)
                | AppError::ConcurrentUpdate(_)
        )
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
