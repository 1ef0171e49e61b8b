//! Rating aggregation service
//!
//! Maintains the per-post review statistics: one counter per star value,
//! the total and the average rounded to one decimal. Every change is a
//! read-modify-write the repository performs atomically; the in-process
//! post lock only keeps local writers from queueing on the database.

use rentline_core::{
    models::{Post, PostRating, MAX_STARS, MIN_STARS},
    traits::{PostRepository, RatingChange},
    AppError, AppResult,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::locks::AggregateLocks;

/// Rating aggregator
pub struct RatingAggregator<P: PostRepository> {
    post_repo: Arc<P>,
    locks: AggregateLocks<i64>,
}

impl<P: PostRepository> RatingAggregator<P> {
    /// Create a new rating aggregator
    pub fn new(post_repo: Arc<P>) -> Self {
        Self {
            post_repo,
            locks: AggregateLocks::new(),
        }
    }

    fn check_stars(stars: i32) -> AppResult<()> {
        if !(MIN_STARS..=MAX_STARS).contains(&stars) {
            return Err(AppError::InvalidRating(stars));
        }
        Ok(())
    }

    async fn load(&self, post_id: i64) -> AppResult<Post> {
        self.post_repo
            .find_by_id(post_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {}", post_id)))
    }

    /// Read-modify-write the rating of a post under its lock
    async fn modify(&self, post_id: i64, change: &RatingChange<'_>) -> AppResult<Post> {
        let _guard = self.locks.acquire(post_id).await;
        self.post_repo.modify_rating(post_id, change).await
    }

    /// Count a new review
    #[instrument(skip(self))]
    pub async fn apply_review(&self, post_id: i64, stars: i32) -> AppResult<Post> {
        Self::check_stars(stars)?;

        let post = self.modify(post_id, &|rating| rating.apply(stars)).await?;

        debug!(
            "Post {} rated {}: {} reviews, average {}",
            post_id, stars, post.rating.total_reviews, post.rating.average_rating
        );
        Ok(post)
    }

    /// Remove a previously counted review
    ///
    /// Fails with `Inconsistent` and writes nothing when no review with
    /// that star value is left.
    #[instrument(skip(self))]
    pub async fn retract_review(&self, post_id: i64, stars: i32) -> AppResult<Post> {
        Self::check_stars(stars)?;

        let post = self
            .modify(post_id, &|rating| {
                rating.retract(stars).map_err(|e| {
                    warn!("Cannot retract {}-star review of post {}: {}", stars, post_id, e);
                    e
                })
            })
            .await?;

        debug!(
            "Post {} lost a {}-star review: {} reviews, average {}",
            post_id, stars, post.rating.total_reviews, post.rating.average_rating
        );
        Ok(post)
    }

    fn check_counters(post_id: i64, rating: &PostRating) -> AppResult<()> {
        if rating.buckets().iter().any(|count| *count < 0) {
            return Err(AppError::Inconsistent(format!(
                "post {} has negative star counters",
                post_id
            )));
        }
        Ok(())
    }

    /// Rebuild total and average from the star counters
    #[instrument(skip(self))]
    pub async fn recalculate(&self, post_id: i64) -> AppResult<Post> {
        let post = self.load(post_id).await?;
        Self::check_counters(post_id, &post.rating)?;

        if post.rating.is_consistent() {
            debug!("Rating of post {} already consistent", post_id);
            return Ok(post);
        }

        let repaired = self
            .modify(post_id, &|rating| {
                Self::check_counters(post_id, rating)?;
                rating.recompute();
                Ok(())
            })
            .await?;

        info!(
            "Repaired rating of post {}: {} reviews / {} -> {} reviews / {}",
            post_id,
            post.rating.total_reviews,
            post.rating.average_rating,
            repaired.rating.total_reviews,
            repaired.rating.average_rating
        );
        Ok(repaired)
    }
}
