//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use crate::models::RefundPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use tracing::debug;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub reservations: ReservationConfig,
    #[serde(default)]
    pub payments: PaymentConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL (falls back to `DATABASE_URL`)
    #[serde(default)]
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Run embedded migrations at startup
    #[serde(default)]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

/// Reservation lifecycle configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReservationConfig {
    /// Prefix of generated reservation numbers
    #[serde(default = "default_number_prefix")]
    pub number_prefix: String,

    /// How many generated numbers to try before giving up on collisions
    #[serde(default = "default_number_attempts")]
    pub number_attempts: u32,
}

fn default_number_prefix() -> String {
    "RSV".to_string()
}

fn default_number_attempts() -> u32 {
    5
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            number_prefix: default_number_prefix(),
            number_attempts: default_number_attempts(),
        }
    }
}

/// Payment reconciliation configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PaymentConfig {
    /// What a refund does to the owning reservation
    #[serde(default)]
    pub refund_policy: RefundPolicy,
}

/// Advertisement expiry sweeper configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SweeperConfig {
    /// Seconds between two expiry sweeps
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());
        debug!("Loading configuration for run mode {}", run_mode);

        let config = Config::builder()
            // Start with default values
            .set_default("database.max_connections", 10)?
            .set_default("database.run_migrations", false)?
            .set_default("reservations.number_prefix", "RSV")?
            .set_default("reservations.number_attempts", 5)?
            .set_default("payments.refund_policy", "keep_reservation")?
            .set_default("sweeper.interval_secs", 300)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with RENTLINE_ prefix
            .add_source(
                Environment::with_prefix("RENTLINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app: AppConfig = config.try_deserialize()?;

        // Plain DATABASE_URL wins over an empty configured url
        if app.database.url.is_empty() {
            if let Ok(url) = env::var("DATABASE_URL") {
                app.database.url = url;
            }
        }

        Ok(app)
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("RENTLINE").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
