//! Reservation number generation

use rand::Rng;
use rentline_core::{
    config::ReservationConfig, traits::ReservationNumberGenerator, AppError, AppResult,
};

/// Characters allowed in the random part of a reservation number
const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of the random part
pub const NUMBER_LENGTH: usize = 8;

/// Length of the letter prefix
pub const PREFIX_LENGTH: usize = 3;

const DEFAULT_PREFIX: &str = "RSV";

/// Generates `PREFIX-XXXXXXXX` numbers from uppercase letters and digits
///
/// Collisions are possible; the store rejects them and the lifecycle draws
/// again.
#[derive(Debug, Clone)]
pub struct RandomReservationNumber {
    prefix: String,
}

impl RandomReservationNumber {
    /// Generator with a custom prefix of three uppercase ASCII letters
    pub fn new(prefix: impl Into<String>) -> AppResult<Self> {
        let prefix = prefix.into();
        if prefix.len() != PREFIX_LENGTH || !prefix.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(AppError::Config(format!(
                "reservation number prefix must be {} uppercase letters (got {:?})",
                PREFIX_LENGTH, prefix
            )));
        }
        Ok(Self { prefix })
    }

    /// Generator using the configured prefix
    pub fn from_config(config: &ReservationConfig) -> AppResult<Self> {
        Self::new(config.number_prefix.clone())
    }
}

impl Default for RandomReservationNumber {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl ReservationNumberGenerator for RandomReservationNumber {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..NUMBER_LENGTH)
            .map(|_| char::from(CHARSET[rng.gen_range(0..CHARSET.len())]))
            .collect();

        format!("{}-{}", self.prefix, suffix)
    }
}
