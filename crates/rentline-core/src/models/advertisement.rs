//! Advertisement (boost) model
//!
//! A boost is a paid visibility window attached to a post. The window is the
//! only truth about whether a boost is running: [`Advertisement::status_at`]
//! derives the status from `ends_at`, and the stored `status` column is
//! rewritten from it on every write and by the expiry sweep.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::AppResult;

/// Longest window a single purchase or extension may buy
pub const MAX_BOOST_DAYS: i32 = 3650;

/// End of a window of `duration_days` starting at `starts_at`
fn window_end(starts_at: DateTime<Utc>, duration_days: i32) -> AppResult<DateTime<Utc>> {
    starts_at
        .checked_add_signed(Duration::days(i64::from(duration_days)))
        .ok_or_else(|| {
            AppError::Validation(format!(
                "boost window of {} days from {} is out of range",
                duration_days, starts_at
            ))
        })
}

/// Advertisement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdvertisementStatus {
    /// Window still running
    #[default]
    Active,
    /// Window has ended
    Expired,
}

impl fmt::Display for AdvertisementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvertisementStatus::Active => write!(f, "active"),
            AdvertisementStatus::Expired => write!(f, "expired"),
        }
    }
}

impl AdvertisementStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(AdvertisementStatus::Active),
            "expired" => Some(AdvertisementStatus::Expired),
            _ => None,
        }
    }
}

/// Advertisement entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Unique identifier (UUID)
    pub id: Uuid,

    /// Boosted post
    pub post_id: i64,

    /// Total amount paid for the current window
    pub amount: Decimal,

    /// Total days bought for the current window
    pub duration_days: i32,

    /// Window start
    pub starts_at: DateTime<Utc>,

    /// Window end (exclusive)
    pub ends_at: DateTime<Utc>,

    /// Stored status, synchronized with `status_at` on every write
    pub status: AdvertisementStatus,

    /// Order that opened the current window
    pub external_order_id: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Advertisement {
    /// Open a new window
    pub fn open(
        post_id: i64,
        amount: Decimal,
        duration_days: i32,
        starts_at: DateTime<Utc>,
        external_order_id: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        let mut ad = Self {
            id: Uuid::new_v4(),
            post_id,
            amount,
            duration_days,
            starts_at,
            ends_at: window_end(starts_at, duration_days)?,
            status: AdvertisementStatus::Active,
            external_order_id,
            created_at: now,
            updated_at: now,
        };
        ad.sync_status(now);
        Ok(ad)
    }

    /// Derived status at `now`
    #[inline]
    pub fn status_at(&self, now: DateTime<Utc>) -> AdvertisementStatus {
        if now < self.ends_at {
            AdvertisementStatus::Active
        } else {
            AdvertisementStatus::Expired
        }
    }

    /// Check if the window is still running at `now`
    #[inline]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == AdvertisementStatus::Active
    }

    /// Push the end of a running window and accumulate what was paid
    ///
    /// Leaves the window untouched when the result would overflow.
    pub fn extend_window(
        &mut self,
        amount: Decimal,
        duration_days: i32,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let ends_at = window_end(self.ends_at, duration_days)?;
        let total_days = self.duration_days.checked_add(duration_days).ok_or_else(|| {
            AppError::Validation(format!(
                "boost {} cannot hold {} more days",
                self.id, duration_days
            ))
        })?;
        let total_amount = self.amount.checked_add(amount).ok_or_else(|| {
            AppError::Validation(format!("boost {} amount overflow", self.id))
        })?;

        self.ends_at = ends_at;
        self.duration_days = total_days;
        self.amount = total_amount;
        self.updated_at = now;
        self.sync_status(now);
        Ok(())
    }

    /// Replace an ended window with a fresh one
    pub fn restart_window(
        &mut self,
        amount: Decimal,
        duration_days: i32,
        starts_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.ends_at = window_end(starts_at, duration_days)?;
        self.starts_at = starts_at;
        self.amount = amount;
        self.duration_days = duration_days;
        self.updated_at = now;
        self.sync_status(now);
        Ok(())
    }

    /// Rewrite the stored status from the window; returns true if it changed
    pub fn sync_status(&mut self, now: DateTime<Utc>) -> bool {
        let derived = self.status_at(now);
        let changed = self.status != derived;
        self.status = derived;
        changed
    }
}

/// Ledger row of one boost order
///
/// Orders merge into a single running window, so order ids are tracked here
/// to stay unique across merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertisementOrder {
    /// External order identifier (unique)
    pub order_id: String,

    /// Advertisement the order was applied to
    pub advertisement_id: Uuid,

    /// Amount paid by this order
    pub amount: Decimal,

    /// Days bought by this order
    pub duration_days: i32,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Boost purchase request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BoostPurchase {
    #[validate(range(min = 1))]
    pub post_id: i64,

    pub amount: Decimal,

    #[validate(range(min = 1, max = 3650, message = "Duration must be between 1 and 3650 days"))]
    pub duration_days: i32,

    /// Window start; defaults to now
    pub starts_at: Option<DateTime<Utc>>,

    #[validate(length(min = 1, max = 255))]
    pub external_order_id: Option<String>,
}
