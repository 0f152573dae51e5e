//! Admin-only moderation endpoints.
//!
//! Every handler calls [`require_admin`] first, so students get 403 and
//! anonymous callers 401 before any query runs.

use axum::{
    Json,
    extract::{
        Extension, Path, Query,
        rejection::{PathRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{Instrument, info, info_span};
use utoipa::{IntoParams, ToSchema};

use super::auth::{AuthState, require_admin, utils::normalize_student_number};
use super::error::{ApiError, ErrorBody};
use super::materials::{
    storage::{delete_material as remove_material, list_reports as fetch_reports, resolve_report},
    types::{Report, ReportStatus},
};
use super::users::UserSummary;

const NOTES_MAX: usize = 2000;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DashboardStats {
    pub total_users: i64,
    pub total_students: i64,
    pub total_admins: i64,
    pub total_materials: i64,
    pub pending_reports: i64,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportQuery {
    /// `pending`, `resolved`, or `dismissed`.
    pub status: Option<ReportStatus>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveReportRequest {
    /// `resolved` or `dismissed`.
    pub status: ReportStatus,
    #[serde(default)]
    pub resolution_notes: Option<String>,
}

fn validate_resolution(request: &ResolveReportRequest) -> Result<Option<String>, ApiError> {
    if request.status == ReportStatus::Pending {
        return Err(ApiError::bad_request(
            "status must be \"resolved\" or \"dismissed\"",
        ));
    }
    let notes = request
        .resolution_notes
        .as_deref()
        .map(str::trim)
        .filter(|notes| !notes.is_empty());
    if notes.is_some_and(|notes| notes.chars().count() > NOTES_MAX) {
        return Err(ApiError::bad_request(format!(
            "resolution_notes must be at most {NOTES_MAX} characters"
        )));
    }
    Ok(notes.map(str::to_string))
}

#[utoipa::path(
    get,
    path = "/api/admin/dashboard",
    responses(
        (status = 200, description = "Platform counts", body = DashboardStats),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 403, description = "Admin role required", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn dashboard(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&headers, &auth_state)?;
    let stats = fetch_dashboard_stats(&pool).await?;
    Ok((StatusCode::OK, Json(stats)))
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    responses(
        (status = 200, description = "All profiles, newest first", body = [UserSummary]),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 403, description = "Admin role required", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn list_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&headers, &auth_state)?;
    let users = fetch_users(&pool).await?;
    Ok((StatusCode::OK, Json(users)))
}

#[utoipa::path(
    delete,
    path = "/api/admin/users/{id}",
    params(("id" = String, Path, description = "Student number")),
    responses(
        (status = 204, description = "User and everything they own deleted"),
        (status = 400, description = "Admins cannot delete themselves", body = ErrorBody),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 403, description = "Admin role required", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn delete_user(
    Path(id): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_admin(&headers, &auth_state)?;
    let user_id = normalize_student_number(&id);
    if user_id == principal.user_id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    if delete_account(&pool, &user_id).await? {
        info!(user_id = %user_id, admin_id = %principal.user_id, "user deleted by admin");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("User"))
    }
}

#[utoipa::path(
    get,
    path = "/api/admin/reports",
    params(ReportQuery),
    responses(
        (status = 200, description = "Reports, newest first", body = [Report]),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 403, description = "Admin role required", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn list_reports(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&headers, &auth_state)?;
    let Query(query) = query?;
    let reports = fetch_reports(&pool, query.status).await?;
    Ok((StatusCode::OK, Json(reports)))
}

#[utoipa::path(
    put,
    path = "/api/admin/reports/{id}",
    params(("id" = i64, Path, description = "Report id")),
    request_body = ResolveReportRequest,
    responses(
        (status = 200, description = "Report resolved or dismissed", body = Report),
        (status = 400, description = "Invalid status or notes", body = ErrorBody),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 403, description = "Admin role required", body = ErrorBody),
        (status = 404, description = "Report not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn update_report(
    id: Result<Path<i64>, PathRejection>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResolveReportRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_admin(&headers, &auth_state)?;
    let Path(id) = id?;
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };
    let notes = validate_resolution(&request)?;

    let report = resolve_report(
        &pool,
        id,
        request.status,
        &principal.user_id,
        notes.as_deref(),
    )
    .await?
    .ok_or(ApiError::NotFound("Report"))?;
    info!(
        report_id = id,
        status = request.status.as_str(),
        admin_id = %principal.user_id,
        "report moderated"
    );
    Ok((StatusCode::OK, Json(report)))
}

#[utoipa::path(
    delete,
    path = "/api/admin/materials/{id}",
    operation_id = "admin_delete_material",
    params(("id" = i64, Path, description = "Material id")),
    responses(
        (status = 204, description = "Material removed"),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 403, description = "Admin role required", body = ErrorBody),
        (status = 404, description = "Material not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn delete_material(
    id: Result<Path<i64>, PathRejection>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_admin(&headers, &auth_state)?;
    let Path(id) = id?;
    if remove_material(&pool, id).await? {
        info!(material_id = id, admin_id = %principal.user_id, "material removed by admin");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Material"))
    }
}

async fn fetch_dashboard_stats(pool: &PgPool) -> Result<DashboardStats, sqlx::Error> {
    let query = r"
        SELECT
            (SELECT COUNT(*) FROM profiles) AS total_users,
            (SELECT COUNT(*) FROM profiles WHERE role = 'student') AS total_students,
            (SELECT COUNT(*) FROM profiles WHERE role = 'admin') AS total_admins,
            (SELECT COUNT(*) FROM materials) AS total_materials,
            (SELECT COUNT(*) FROM reports WHERE status = 'pending') AS pending_reports
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query).fetch_one(pool).instrument(span).await?;
    Ok(DashboardStats {
        total_users: row.try_get("total_users")?,
        total_students: row.try_get("total_students")?,
        total_admins: row.try_get("total_admins")?,
        total_materials: row.try_get("total_materials")?,
        pending_reports: row.try_get("pending_reports")?,
    })
}

async fn fetch_users(pool: &PgPool) -> Result<Vec<UserSummary>, sqlx::Error> {
    let query = r#"
        SELECT id, first_name, last_name, email, role::text AS role, points, email_verified,
               to_char(created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at
        FROM profiles
        ORDER BY created_at DESC, id
    "#;
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query).fetch_all(pool).instrument(span).await?;
    rows.iter().map(UserSummary::from_row).collect()
}

/// Deleting the credentials cascades to the profile and everything it owns.
async fn delete_account(pool: &PgPool, user_id: &str) -> Result<bool, sqlx::Error> {
    let query = "DELETE FROM credentials WHERE id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await?;
    Ok(result.rows_affected() > 0)
}
