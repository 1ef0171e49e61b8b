//! Vehicle availability adapters

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rentline_core::{traits::VehicleAvailability, AppResult};

/// Availability check that accepts every window
///
/// Used when the fleet side performs its own conflict detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAvailable;

#[async_trait]
impl VehicleAvailability for AlwaysAvailable {
    async fn is_available(
        &self,
        _vehicle_id: i64,
        _pickup_date: DateTime<Utc>,
        _return_date: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(true)
    }
}
