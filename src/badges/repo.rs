use crate::badges::models::{Badge, EarnedBadge};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Instrument, info_span};

pub struct BadgeRepo;

impl BadgeRepo {
    /// Full catalog ordered by threshold.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn catalog(pool: &PgPool) -> Result<Vec<Badge>, sqlx::Error> {
        let query = r"
            SELECT id, name, description, image_url, requirement_points
            FROM badges
            ORDER BY requirement_points, id
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, Badge>(query)
            .fetch_all(pool)
            .instrument(span)
            .await
    }

    /// Badges held by a user, oldest grant first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn earned_by(pool: &PgPool, user_id: &str) -> Result<Vec<EarnedBadge>, sqlx::Error> {
        let query = r#"
            SELECT badges.id, badges.name, badges.description, badges.image_url,
                   badges.requirement_points,
                   to_char(user_badges.awarded_date AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS awarded_date
            FROM user_badges
            JOIN badges ON badges.id = user_badges.badge_id
            WHERE user_badges.user_id = $1
            ORDER BY badges.requirement_points, badges.id
        "#;
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_as::<_, EarnedBadge>(query)
            .bind(user_id)
            .fetch_all(pool)
            .instrument(span)
            .await
    }

    /// Add `delta` to the profile total and return the new value.
    ///
    /// The UPDATE takes the profile row lock, so concurrent awards for one
    /// user serialize here until the surrounding transaction ends.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn increment_points_in(
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        delta: i32,
    ) -> Result<Option<i32>, sqlx::Error> {
        let query = r"
            UPDATE profiles
            SET points = points + $1,
                updated_at = NOW()
            WHERE id = $2
            RETURNING points
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(delta)
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .instrument(span)
            .await?;
        row.map(|row| row.try_get::<i32, _>("points")).transpose()
    }

    /// Grant every badge with a threshold at or below `total` that the user
    /// does not hold yet. Only rows inserted by this statement are returned.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn grant_qualified_in(
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        total: i32,
    ) -> Result<Vec<Badge>, sqlx::Error> {
        let query = r"
            WITH granted AS (
                INSERT INTO user_badges (user_id, badge_id)
                SELECT $1, badges.id
                FROM badges
                WHERE badges.requirement_points <= $2
                  AND NOT EXISTS (
                      SELECT 1 FROM user_badges held
                      WHERE held.user_id = $1 AND held.badge_id = badges.id
                  )
                ON CONFLICT (user_id, badge_id) DO NOTHING
                RETURNING badge_id
            )
            SELECT badges.id, badges.name, badges.description, badges.image_url,
                   badges.requirement_points
            FROM badges
            JOIN granted ON granted.badge_id = badges.id
            ORDER BY badges.requirement_points, badges.id
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query_as::<_, Badge>(query)
            .bind(user_id)
            .bind(total)
            .fetch_all(&mut **tx)
            .instrument(span)
            .await
    }
}
