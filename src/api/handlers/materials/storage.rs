//! SQL for materials, votes, bookmarks, and reports.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::{Instrument, info_span};

use super::types::{
    Material, MaterialChanges, MaterialFields, Report, ReportStatus, VoteType,
};
use crate::badges::{AwardError, AwardOutcome, UPLOAD_POINTS, award_points_in};

/// Material columns joined with the uploader name and net vote count.
macro_rules! material_select {
    () => {
        r#"
            SELECT m.id, m.title, m.description, m.subject, m.college, m.course,
                   m.file_url, m.filename, m.uploader_id,
                   p.first_name || ' ' || p.last_name AS uploader_name,
                   to_char(m.upload_date AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS upload_date,
                   COALESCE((
                       SELECT SUM(CASE WHEN v.vote_type = 'upvote' THEN 1 ELSE -1 END)
                       FROM votes v
                       WHERE v.material_id = m.id
                   ), 0)::BIGINT AS vote_count
            FROM materials m
            JOIN profiles p ON p.id = m.uploader_id
        "#
    };
}

macro_rules! report_select {
    () => {
        r#"
            SELECT r.id, r.material_id, m.title AS material_title, r.reporter_id,
                   r.reason, r.note, r.status::text AS status, r.resolved_by,
                   r.resolution_notes,
                   to_char(r.resolved_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS resolved_at,
                   to_char(r.created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at
            FROM reports r
            JOIN materials m ON m.id = r.material_id
        "#
    };
}

/// Material plus the uploader's award from the same transaction.
#[derive(Debug)]
pub(crate) struct CreatedMaterial {
    pub(crate) material: Material,
    pub(crate) award: AwardOutcome,
}

/// Filters already trimmed; `None` skips the predicate.
#[derive(Debug, Default)]
pub(crate) struct MaterialFilter {
    pub(crate) subject: Option<String>,
    pub(crate) college: Option<String>,
    pub(crate) course: Option<String>,
    pub(crate) title: Option<String>,
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_foreign_key_violation())
}

/// The referenced row that was gone when a vote, bookmark or report was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Missing {
    Material,
    /// The caller's account was deleted after its token was issued.
    User,
}

/// Classify a foreign-key failure by the constraint Postgres names.
fn missing_reference(err: &sqlx::Error) -> Option<Missing> {
    let db_err = err.as_database_error()?;
    if !db_err.is_foreign_key_violation() {
        return None;
    }
    match db_err.constraint() {
        Some(name) if name.ends_with("_user_id_fkey") || name.ends_with("_reporter_id_fkey") => {
            Some(Missing::User)
        }
        _ => Some(Missing::Material),
    }
}

/// Escape `ILIKE` wildcards so user input matches literally.
fn like_pattern(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('%');
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

pub(crate) async fn list_materials(pool: &PgPool, filter: &MaterialFilter) -> Result<Vec<Material>> {
    let query = concat!(
        material_select!(),
        r"
            WHERE ($1::text IS NULL OR m.subject = $1)
              AND ($2::text IS NULL OR m.college = $2)
              AND ($3::text IS NULL OR m.course = $3)
              AND ($4::text IS NULL OR m.title ILIKE $4)
            ORDER BY m.upload_date DESC, m.id DESC
        "
    );
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_as::<_, Material>(query)
        .bind(filter.subject.as_deref())
        .bind(filter.college.as_deref())
        .bind(filter.course.as_deref())
        .bind(filter.title.as_deref().map(like_pattern))
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list materials")
}

pub(crate) async fn material_by_id(pool: &PgPool, material_id: i64) -> Result<Option<Material>> {
    let query = concat!(material_select!(), " WHERE m.id = $1");
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_as::<_, Material>(query)
        .bind(material_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch material")
}

/// Insert a material and award the upload points in one transaction.
pub(crate) async fn create_material(
    pool: &PgPool,
    uploader_id: &str,
    fields: &MaterialFields,
) -> Result<CreatedMaterial, AwardError> {
    let mut tx = pool.begin().await?;

    let query = r"
        INSERT INTO materials (title, description, subject, college, course, file_url, filename, uploader_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let inserted = sqlx::query(query)
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(&fields.subject)
        .bind(&fields.college)
        .bind(&fields.course)
        .bind(&fields.file_url)
        .bind(&fields.filename)
        .bind(uploader_id)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;
    let material_id: i64 = match inserted {
        Ok(row) => row.try_get("id")?,
        Err(err) if is_foreign_key_violation(&err) => return Err(AwardError::UserNotFound),
        Err(err) => return Err(err.into()),
    };

    let award = award_points_in(&mut tx, uploader_id, UPLOAD_POINTS).await?;

    let query = concat!(material_select!(), " WHERE m.id = $1");
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let material = sqlx::query_as::<_, Material>(query)
        .bind(material_id)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await?;

    tx.commit().await?;
    Ok(CreatedMaterial { material, award })
}

pub(crate) async fn material_owner(pool: &PgPool, material_id: i64) -> Result<Option<String>> {
    let query = "SELECT uploader_id FROM materials WHERE id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(material_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch material owner")?;
    row.map(|row| row.try_get("uploader_id"))
        .transpose()
        .context("failed to decode material owner")
}

/// Apply a partial update; `false` when the material is gone.
pub(crate) async fn update_material(
    pool: &PgPool,
    material_id: i64,
    changes: &MaterialChanges,
) -> Result<bool> {
    let query = r"
        UPDATE materials
        SET title = COALESCE($2, title),
            description = COALESCE($3, description),
            subject = COALESCE($4, subject),
            college = COALESCE($5, college),
            course = COALESCE($6, course),
            file_url = COALESCE($7, file_url),
            filename = COALESCE($8, filename),
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(material_id)
        .bind(changes.title.as_deref())
        .bind(changes.description.as_deref())
        .bind(changes.subject.as_deref())
        .bind(changes.college.as_deref())
        .bind(changes.course.as_deref())
        .bind(changes.file_url.as_deref())
        .bind(changes.filename.as_deref())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update material")?;
    Ok(result.rows_affected() > 0)
}

/// Votes, bookmarks, and reports go with it through cascades.
pub(crate) async fn delete_material(pool: &PgPool, material_id: i64) -> Result<bool> {
    let query = "DELETE FROM materials WHERE id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(material_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete material")?;
    Ok(result.rows_affected() > 0)
}

/// Insert or overwrite the caller's vote and return the new net count.
pub(crate) async fn upsert_vote(
    pool: &PgPool,
    material_id: i64,
    user_id: &str,
    vote_type: VoteType,
) -> Result<Result<i64, Missing>> {
    let mut tx = pool.begin().await.context("failed to begin vote")?;

    let query = r"
        INSERT INTO votes (material_id, user_id, vote_type)
        VALUES ($1, $2, $3::vote_type)
        ON CONFLICT (material_id, user_id)
        DO UPDATE SET vote_type = EXCLUDED.vote_type, created_at = NOW()
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let upserted = sqlx::query(query)
        .bind(material_id)
        .bind(user_id)
        .bind(vote_type.as_str())
        .execute(&mut *tx)
        .instrument(span)
        .await;
    match upserted {
        Ok(_) => {}
        Err(err) => match missing_reference(&err) {
            Some(missing) => return Ok(Err(missing)),
            None => return Err(err).context("failed to upsert vote"),
        },
    }

    let query = r"
        SELECT COALESCE(SUM(CASE WHEN vote_type = 'upvote' THEN 1 ELSE -1 END), 0)::BIGINT AS vote_count
        FROM votes
        WHERE material_id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let count: i64 = sqlx::query(query)
        .bind(material_id)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await
        .and_then(|row| row.try_get("vote_count"))
        .context("failed to count votes")?;

    tx.commit().await.context("failed to commit vote")?;
    Ok(Ok(count))
}

/// Whether a row was added; an existing bookmark is left as is.
pub(crate) async fn add_bookmark(
    pool: &PgPool,
    material_id: i64,
    user_id: &str,
) -> Result<Result<bool, Missing>> {
    let query = r"
        INSERT INTO bookmarks (material_id, user_id)
        VALUES ($1, $2)
        ON CONFLICT (material_id, user_id) DO NOTHING
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    match sqlx::query(query)
        .bind(material_id)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
    {
        Ok(result) => Ok(Ok(result.rows_affected() > 0)),
        Err(err) => match missing_reference(&err) {
            Some(missing) => Ok(Err(missing)),
            None => Err(err).context("failed to add bookmark"),
        },
    }
}

pub(crate) async fn remove_bookmark(pool: &PgPool, material_id: i64, user_id: &str) -> Result<bool> {
    let query = "DELETE FROM bookmarks WHERE material_id = $1 AND user_id = $2";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(material_id)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to remove bookmark")?;
    Ok(result.rows_affected() > 0)
}

/// Bookmarked materials, newest bookmark first.
pub(crate) async fn bookmarked_materials(pool: &PgPool, user_id: &str) -> Result<Vec<Material>> {
    let query = concat!(
        material_select!(),
        r"
            JOIN bookmarks b ON b.material_id = m.id
            WHERE b.user_id = $1
            ORDER BY b.created_at DESC, m.id DESC
        "
    );
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_as::<_, Material>(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list bookmarks")
}

pub(crate) async fn create_report(
    pool: &PgPool,
    material_id: i64,
    reporter_id: &str,
    reason: &str,
    note: &str,
) -> Result<Result<Report, Missing>> {
    let query = r"
        INSERT INTO reports (material_id, reporter_id, reason, note)
        VALUES ($1, $2, $3, $4)
        RETURNING id
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let report_id: i64 = match sqlx::query(query)
        .bind(material_id)
        .bind(reporter_id)
        .bind(reason)
        .bind(note)
        .fetch_one(pool)
        .instrument(span)
        .await
    {
        Ok(row) => row.try_get("id").context("failed to decode report id")?,
        Err(err) => match missing_reference(&err) {
            Some(missing) => return Ok(Err(missing)),
            None => return Err(err).context("failed to insert report"),
        },
    };
    // The material can vanish between the insert and this read.
    Ok(report_by_id(pool, report_id)
        .await?
        .ok_or(Missing::Material))
}

pub(crate) async fn report_by_id(pool: &PgPool, report_id: i64) -> Result<Option<Report>> {
    let query = concat!(report_select!(), " WHERE r.id = $1");
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_as::<_, Report>(query)
        .bind(report_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch report")
}

/// Reports newest first, optionally filtered by status.
pub(crate) async fn list_reports(pool: &PgPool, status: Option<ReportStatus>) -> Result<Vec<Report>> {
    let query = concat!(
        report_select!(),
        r"
            WHERE ($1::text IS NULL OR r.status = $1::report_status)
            ORDER BY r.created_at DESC, r.id DESC
        "
    );
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_as::<_, Report>(query)
        .bind(status.map(ReportStatus::as_str))
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list reports")
}

/// Record the moderation decision; `None` when the report does not exist.
pub(crate) async fn resolve_report(
    pool: &PgPool,
    report_id: i64,
    status: ReportStatus,
    resolver_id: &str,
    notes: Option<&str>,
) -> Result<Option<Report>> {
    let query = r"
        UPDATE reports
        SET status = $2::report_status,
            resolved_by = $3,
            resolution_notes = $4,
            resolved_at = NOW()
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(report_id)
        .bind(status.as_str())
        .bind(resolver_id)
        .bind(notes)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to resolve report")?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }
    report_by_id(pool, report_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::{borrow::Cow, error::Error as StdError, fmt};

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("calc"), "%calc%");
        assert_eq!(like_pattern("100%_done"), r"%100\%\_done%");
        assert_eq!(like_pattern(r"a\b"), r"%a\\b%");
    }

    #[test]
    fn material_queries_filter_by_id() {
        let query = concat!(material_select!(), " WHERE m.id = $1");
        assert!(query.contains("FROM materials m"));
        assert!(query.trim_end().ends_with("WHERE m.id = $1"));
    }

    #[derive(Debug)]
    struct ForeignKeyError(&'static str);

    impl fmt::Display for ForeignKeyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "violates foreign key constraint {}", self.0)
        }
    }

    impl StdError for ForeignKeyError {}

    impl DatabaseError for ForeignKeyError {
        fn message(&self) -> &str {
            "insert or update violates foreign key constraint"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed("23503"))
        }

        fn constraint(&self) -> Option<&str> {
            Some(self.0)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::ForeignKeyViolation
        }
    }

    fn fk_error(constraint: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(ForeignKeyError(constraint)))
    }

    #[test]
    fn non_database_errors_are_not_fk_violations() {
        assert!(!is_foreign_key_violation(&sqlx::Error::RowNotFound));
        assert_eq!(missing_reference(&sqlx::Error::RowNotFound), None);
    }

    #[test]
    fn fk_violations_name_the_missing_row() {
        assert_eq!(
            missing_reference(&fk_error("votes_material_id_fkey")),
            Some(Missing::Material)
        );
        assert_eq!(
            missing_reference(&fk_error("bookmarks_material_id_fkey")),
            Some(Missing::Material)
        );
        assert_eq!(
            missing_reference(&fk_error("votes_user_id_fkey")),
            Some(Missing::User)
        );
        assert_eq!(
            missing_reference(&fk_error("bookmarks_user_id_fkey")),
            Some(Missing::User)
        );
        assert_eq!(
            missing_reference(&fk_error("reports_reporter_id_fkey")),
            Some(Missing::User)
        );
    }
}
