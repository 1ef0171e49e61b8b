//! Rentline Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the Rentline lifecycle engine. It includes:
//!
//! - Domain models (Reservation, Payment, Advertisement, Post rating)
//! - Repository and collaborator traits (store, clock, availability, numbering)
//! - Unified error handling with transport status mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
