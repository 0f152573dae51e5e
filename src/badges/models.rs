use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};
use utoipa::ToSchema;

/// Catalog entry from `badges`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Badge {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub image_url: String,
    pub requirement_points: i32,
}

impl<'r> FromRow<'r, PgRow> for Badge {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            image_url: row.try_get("image_url")?,
            requirement_points: row.try_get("requirement_points")?,
        })
    }
}

/// A badge held by a user, with the time it was granted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EarnedBadge {
    #[serde(flatten)]
    pub badge: Badge,
    pub awarded_date: String,
}

impl<'r> FromRow<'r, PgRow> for EarnedBadge {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            badge: Badge::from_row(row)?,
            awarded_date: row.try_get("awarded_date")?,
        })
    }
}

/// Result of a points award: the new total and the badges granted by that call.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AwardOutcome {
    pub points: i32,
    pub new_badges: Vec<Badge>,
}

impl AwardOutcome {
    #[must_use]
    pub fn badge_names(&self) -> Vec<&str> {
        self.new_badges
            .iter()
            .map(|badge| badge.name.as_str())
            .collect()
    }
}
