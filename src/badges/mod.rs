//! Points and badge awards.
//!
//! Every award is one database transaction:
//!
//! 1. `UPDATE profiles SET points = points + delta ... RETURNING points` takes
//!    the profile row lock and yields the new total.
//! 2. All badges with `requirement_points <= total` that the user does not
//!    hold are inserted into `user_badges` with `ON CONFLICT DO NOTHING`.
//!
//! A failure at either step rolls back both. Concurrent awards to the same
//! user queue on the row lock, so the final total is the sum of every delta.
//! The `user_badges` primary key keeps grants idempotent, and only rows
//! inserted by a call are reported back as new.

pub mod models;
pub mod repo;

pub use models::{AwardOutcome, Badge, EarnedBadge};
pub use repo::BadgeRepo;

use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::{Instrument, info, info_span};

/// Points granted for sharing a material.
pub const UPLOAD_POINTS: i32 = 5;

#[derive(Debug, Error)]
pub enum AwardError {
    #[error("points delta must be positive, got {0}")]
    InvalidDelta(i32),
    #[error("user not found")]
    UserNotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Increment a user's points and grant newly qualified badges atomically.
///
/// # Errors
/// Returns [`AwardError::InvalidDelta`] for non-positive deltas before touching
/// the database, [`AwardError::UserNotFound`] for unknown users, and
/// [`AwardError::Database`] when any statement or the commit fails.
pub async fn award_points(
    pool: &PgPool,
    user_id: &str,
    delta: i32,
) -> Result<AwardOutcome, AwardError> {
    ensure_positive(delta)?;
    let mut tx = pool.begin().await?;
    let outcome = award_points_in(&mut tx, user_id, delta).await?;
    tx.commit().await?;
    Ok(outcome)
}

/// Same as [`award_points`] inside a caller-owned transaction.
///
/// Nothing is committed here; dropping the transaction on error rolls back
/// the increment together with the caller's own writes.
///
/// # Errors
/// See [`award_points`].
pub async fn award_points_in(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    delta: i32,
) -> Result<AwardOutcome, AwardError> {
    ensure_positive(delta)?;
    let span = info_span!("badges.award", user_id = %user_id, delta);
    async {
        let points = BadgeRepo::increment_points_in(tx, user_id, delta)
            .await?
            .ok_or(AwardError::UserNotFound)?;
        let new_badges = BadgeRepo::grant_qualified_in(tx, user_id, points).await?;
        let outcome = AwardOutcome { points, new_badges };
        if !outcome.new_badges.is_empty() {
            info!(points, badges = ?outcome.badge_names(), "badges awarded");
        }
        Ok::<_, AwardError>(outcome)
    }
    .instrument(span)
    .await
}

fn ensure_positive(delta: i32) -> Result<(), AwardError> {
    if delta > 0 {
        Ok(())
    } else {
        Err(AwardError::InvalidDelta(delta))
    }
}
