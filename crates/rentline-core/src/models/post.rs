//! Rental post model
//!
//! A post publishes one vehicle and carries the aggregated review statistics.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Lowest accepted star value
pub const MIN_STARS: i32 = 1;

/// Highest accepted star value
pub const MAX_STARS: i32 = 5;

/// Star-bucket counters and the values derived from them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PostRating {
    pub one_star: i32,
    pub two_star: i32,
    pub three_star: i32,
    pub four_star: i32,
    pub five_star: i32,

    /// Sum of the five buckets
    pub total_reviews: i32,

    /// Weighted mean rounded to one decimal, zero without reviews
    pub average_rating: Decimal,
}

impl PostRating {
    /// Build from raw bucket counts, deriving total and average
    pub fn from_buckets(buckets: [i32; 5]) -> Self {
        let mut rating = Self {
            one_star: buckets[0],
            two_star: buckets[1],
            three_star: buckets[2],
            four_star: buckets[3],
            five_star: buckets[4],
            ..Default::default()
        };
        rating.recompute();
        rating
    }

    /// Buckets ordered from one to five stars
    pub fn buckets(&self) -> [i32; 5] {
        [
            self.one_star,
            self.two_star,
            self.three_star,
            self.four_star,
            self.five_star,
        ]
    }

    fn bucket_mut(&mut self, stars: i32) -> Result<&mut i32, AppError> {
        match stars {
            1 => Ok(&mut self.one_star),
            2 => Ok(&mut self.two_star),
            3 => Ok(&mut self.three_star),
            4 => Ok(&mut self.four_star),
            5 => Ok(&mut self.five_star),
            other => Err(AppError::InvalidRating(other)),
        }
    }

    /// Count one more review with `stars`
    pub fn apply(&mut self, stars: i32) -> Result<(), AppError> {
        let bucket = self.bucket_mut(stars)?;
        *bucket += 1;
        self.recompute();
        Ok(())
    }

    /// Remove one review with `stars`
    ///
    /// Leaves the counters untouched when the bucket is already empty.
    pub fn retract(&mut self, stars: i32) -> Result<(), AppError> {
        let bucket = self.bucket_mut(stars)?;
        if *bucket <= 0 {
            return Err(AppError::Inconsistent(format!(
                "no {}-star review left to retract",
                stars
            )));
        }
        *bucket -= 1;
        self.recompute();
        Ok(())
    }

    /// Derive total and average from the buckets
    pub fn recompute(&mut self) {
        let buckets = self.buckets();
        self.total_reviews = buckets.iter().sum();
        self.average_rating = Self::average(&buckets);
    }

    /// Check that the stored derived values agree with the buckets
    pub fn is_consistent(&self) -> bool {
        let buckets = self.buckets();
        buckets.iter().all(|count| *count >= 0)
            && self.total_reviews == buckets.iter().sum::<i32>()
            && self.average_rating == Self::average(&buckets)
    }

    fn average(buckets: &[i32; 5]) -> Decimal {
        let total: i64 = buckets.iter().map(|count| i64::from(*count)).sum();
        if total <= 0 {
            return Decimal::ZERO;
        }

        let weighted: i64 = buckets
            .iter()
            .zip(MIN_STARS..=MAX_STARS)
            .map(|(count, stars)| i64::from(*count) * i64::from(stars))
            .sum();

        (Decimal::from(weighted) / Decimal::from(total))
            .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// Post entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Unique identifier
    pub id: i64,

    /// Publishing agency
    pub agency_id: i64,

    /// Published vehicle
    pub vehicle_id: i64,

    /// Listing title
    pub title: String,

    /// Aggregated review statistics
    pub rating: PostRating,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// Create a post without reviews
    pub fn new(id: i64, agency_id: i64, vehicle_id: i64, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            agency_id,
            vehicle_id,
            title: title.into(),
            rating: PostRating::default(),
            created_at: now,
            updated_at: now,
        }
    }
}
