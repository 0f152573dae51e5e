//! Profile, bookmarks, and leaderboard endpoints.
//!
//! Flow Overview:
//! 1) Authenticate the request via bearer token or access cookie.
//! 2) Read or update the caller's own profile, or read a public profile.
//! 3) Attach earned badges to every profile response.

use axum::{
    Json,
    extract::{Extension, Path, Query, rejection::QueryRejection},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::sync::Arc;
use tracing::{Instrument, info, info_span};
use utoipa::{IntoParams, ToSchema};

use super::auth::{
    AuthState, Role, require_auth,
    utils::{normalize_name, normalize_student_number},
};
use super::error::{ApiError, ErrorBody};
use super::materials::{storage::bookmarked_materials, types::Material};
use crate::badges::{BadgeRepo, EarnedBadge};

const LEADERBOARD_DEFAULT: i64 = 10;
const LEADERBOARD_MAX: i64 = 100;

/// Profile row as seen by its owner and by admins.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub points: i32,
    pub email_verified: bool,
    pub created_at: String,
}

impl UserSummary {
    pub(crate) fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let role: String = row.try_get("role")?;
        Ok(Self {
            id: row.try_get("id")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            email: row.try_get("email")?,
            role: Role::from_db(&role)?,
            points: row.try_get("points")?,
            email_verified: row.try_get("email_verified")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MyProfile {
    #[serde(flatten)]
    pub user: UserSummary,
    pub badges: Vec<EarnedBadge>,
}

/// Profile fields visible to any signed-in user.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PublicProfile {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub points: i32,
    pub created_at: String,
    pub badges: Vec<EarnedBadge>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LeaderboardQuery {
    /// Defaults to 10, capped at 100.
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardEntry {
    pub rank: i64,
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub points: i32,
    pub badge_count: i64,
}

fn leaderboard_limit(requested: Option<i64>) -> i64 {
    requested.map_or(LEADERBOARD_DEFAULT, |limit| limit.clamp(1, LEADERBOARD_MAX))
}

#[utoipa::path(
    get,
    path = "/api/users/me",
    responses(
        (status = 200, description = "Caller's profile with badges", body = MyProfile),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 404, description = "Profile no longer exists", body = ErrorBody)
    ),
    tag = "users"
)]
pub async fn get_me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &auth_state)?;
    let user = fetch_user_summary(&pool, &principal.user_id)
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    let badges = BadgeRepo::earned_by(&pool, &principal.user_id).await?;
    Ok((StatusCode::OK, Json(MyProfile { user, badges })))
}

#[utoipa::path(
    put,
    path = "/api/users/me",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = MyProfile),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 404, description = "Profile no longer exists", body = ErrorBody)
    ),
    tag = "users"
)]
pub async fn update_me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<UpdateProfileRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &auth_state)?;
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };
    if request.first_name.is_none() && request.last_name.is_none() {
        return Err(ApiError::bad_request("No updates provided"));
    }
    let first_name = request
        .first_name
        .as_deref()
        .map(|name| {
            normalize_name(name)
                .ok_or_else(|| ApiError::bad_request("First name must be 1 to 100 characters"))
        })
        .transpose()?;
    let last_name = request
        .last_name
        .as_deref()
        .map(|name| {
            normalize_name(name)
                .ok_or_else(|| ApiError::bad_request("Last name must be 1 to 100 characters"))
        })
        .transpose()?;

    let user = update_profile_names(
        &pool,
        &principal.user_id,
        first_name.as_deref(),
        last_name.as_deref(),
    )
    .await?
    .ok_or(ApiError::NotFound("User"))?;
    info!(user_id = %principal.user_id, "profile updated");

    let badges = BadgeRepo::earned_by(&pool, &principal.user_id).await?;
    Ok((StatusCode::OK, Json(MyProfile { user, badges })))
}

#[utoipa::path(
    get,
    path = "/api/users/me/bookmarks",
    responses(
        (status = 200, description = "Bookmarked materials, newest bookmark first", body = [Material]),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody)
    ),
    tag = "users"
)]
pub async fn my_bookmarks(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &auth_state)?;
    let materials = bookmarked_materials(&pool, &principal.user_id).await?;
    Ok((StatusCode::OK, Json(materials)))
}

#[utoipa::path(
    get,
    path = "/api/users/leaderboard",
    params(LeaderboardQuery),
    responses(
        (status = 200, description = "Students ranked by points", body = [LeaderboardEntry]),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody)
    ),
    tag = "users"
)]
pub async fn leaderboard(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    query: Result<Query<LeaderboardQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    require_auth(&headers, &auth_state)?;
    let Query(query) = query?;
    let entries = fetch_leaderboard(&pool, leaderboard_limit(query.limit)).await?;
    Ok((StatusCode::OK, Json(entries)))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = String, Path, description = "Student number")),
    responses(
        (status = 200, description = "Public profile with badges", body = PublicProfile),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody)
    ),
    tag = "users"
)]
pub async fn get_user(
    Path(id): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    require_auth(&headers, &auth_state)?;
    let user_id = normalize_student_number(&id);
    let user = fetch_user_summary(&pool, &user_id)
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    let badges = BadgeRepo::earned_by(&pool, &user.id).await?;
    Ok((
        StatusCode::OK,
        Json(PublicProfile {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            points: user.points,
            created_at: user.created_at,
            badges,
        }),
    ))
}

async fn fetch_user_summary(pool: &PgPool, user_id: &str) -> Result<Option<UserSummary>, sqlx::Error> {
    let query = r#"
        SELECT id, first_name, last_name, email, role::text AS role, points, email_verified,
               to_char(created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at
        FROM profiles
        WHERE id = $1
    "#;
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    row.as_ref().map(UserSummary::from_row).transpose()
}

async fn update_profile_names(
    pool: &PgPool,
    user_id: &str,
    first_name: Option<&str>,
    last_name: Option<&str>,
) -> Result<Option<UserSummary>, sqlx::Error> {
    let query = r#"
        UPDATE profiles
        SET first_name = COALESCE($2, first_name),
            last_name = COALESCE($3, last_name),
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, first_name, last_name, email, role::text AS role, points, email_verified,
                  to_char(created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at
    "#;
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(first_name)
        .bind(last_name)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    row.as_ref().map(UserSummary::from_row).transpose()
}

async fn fetch_leaderboard(pool: &PgPool, limit: i64) -> Result<Vec<LeaderboardEntry>, sqlx::Error> {
    let query = r"
        SELECT ROW_NUMBER() OVER (ORDER BY p.points DESC, p.created_at ASC) AS rank,
               p.id, p.first_name, p.last_name, p.points,
               (SELECT COUNT(*) FROM user_badges ub WHERE ub.user_id = p.id) AS badge_count
        FROM profiles p
        WHERE p.role = 'student'
        ORDER BY p.points DESC, p.created_at ASC
        LIMIT $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(limit)
        .fetch_all(pool)
        .instrument(span)
        .await?;
    rows.into_iter()
        .map(|row| {
            Ok(LeaderboardEntry {
                rank: row.try_get("rank")?,
                id: row.try_get("id")?,
                first_name: row.try_get("first_name")?,
                last_name: row.try_get("last_name")?,
                points: row.try_get("points")?,
                badge_count: row.try_get("badge_count")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::AuthConfig;
    use anyhow::Result;
    use axum::http::{HeaderValue, header::AUTHORIZATION};
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;

    fn auth_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(
            AuthConfig::new("http://localhost:3000".to_string()),
            &SecretString::from("0123456789abcdef0123456789abcdef"),
        ))
    }

    fn lazy_pool() -> Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    #[test]
    fn leaderboard_limit_defaults_and_caps() {
        assert_eq!(leaderboard_limit(None), 10);
        assert_eq!(leaderboard_limit(Some(25)), 25);
        assert_eq!(leaderboard_limit(Some(1000)), 100);
        assert_eq!(leaderboard_limit(Some(0)), 1);
        assert_eq!(leaderboard_limit(Some(-5)), 1);
    }

    #[test]
    fn my_profile_flattens_user_fields() -> Result<()> {
        let profile = MyProfile {
            user: UserSummary {
                id: "2021-00123-MN-0".to_string(),
                first_name: "Juan".to_string(),
                last_name: "Dela Cruz".to_string(),
                email: "juan@up.edu.ph".to_string(),
                role: Role::Student,
                points: 5,
                email_verified: true,
                created_at: "2024-06-01T00:00:00Z".to_string(),
            },
            badges: Vec::new(),
        };
        let value = serde_json::to_value(&profile)?;
        assert_eq!(value["id"], "2021-00123-MN-0");
        assert_eq!(value["role"], "student");
        assert!(value["badges"].as_array().is_some_and(Vec::is_empty));
        Ok(())
    }

    #[tokio::test]
    async fn me_requires_token() -> Result<()> {
        let response = get_me(HeaderMap::new(), Extension(lazy_pool()?), Extension(auth_state()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn update_me_needs_a_field() -> Result<()> {
        let state = auth_state();
        let token = state.tokens().issue(
            "2021-00123-MN-0",
            Role::Student,
            crate::api::handlers::auth::TokenKind::Access,
        )?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token.token))?,
        );

        let response = update_me(
            headers.clone(),
            Extension(lazy_pool()?),
            Extension(state.clone()),
            Some(Json(UpdateProfileRequest {
                first_name: None,
                last_name: None,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = update_me(
            headers,
            Extension(lazy_pool()?),
            Extension(state),
            Some(Json(UpdateProfileRequest {
                first_name: Some("   ".to_string()),
                last_name: None,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
