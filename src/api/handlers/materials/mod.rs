//! Study materials and the interactions on them.
//!
//! Every route requires an access token. Uploading is worth
//! [`UPLOAD_POINTS`](crate::badges::UPLOAD_POINTS); the material row and the
//! points award commit together, so a failed award leaves no material behind.
//! Only the uploader or an admin may edit or delete a material.

pub(crate) mod storage;
pub mod types;

use axum::{
    Json,
    extract::{
        Extension, Path, Query,
        rejection::{PathRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, info};

use self::storage::{
    MaterialFilter, Missing, add_bookmark, create_material as insert_material, create_report,
    delete_material as remove_material, list_materials as fetch_materials, material_by_id,
    material_owner, remove_bookmark as delete_bookmark, update_material as store_material_update,
    upsert_vote,
};
use self::types::{
    BookmarkResponse, CreateMaterialResponse, Material, MaterialQuery, NewMaterialRequest,
    Report, ReportRequest, UpdateMaterialRequest, VoteRequest, VoteResponse, filter_value,
    validate_material_update, validate_new_material, validate_report,
};
use super::auth::{AuthState, Principal, require_auth};
use super::error::{ApiError, ErrorBody};

impl From<Missing> for ApiError {
    fn from(missing: Missing) -> Self {
        match missing {
            Missing::Material => Self::NotFound("Material"),
            Missing::User => Self::Unauthorized,
        }
    }
}

/// Load the owner of `material_id` and check the caller may modify it.
async fn authorize_owner(
    pool: &PgPool,
    principal: &Principal,
    material_id: i64,
) -> Result<(), ApiError> {
    let owner = material_owner(pool, material_id)
        .await?
        .ok_or(ApiError::NotFound("Material"))?;
    if principal.can_modify(&owner) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

#[utoipa::path(
    get,
    path = "/api/materials",
    params(MaterialQuery),
    responses(
        (status = 200, description = "Materials, newest first", body = [Material]),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody)
    ),
    tag = "materials"
)]
pub async fn list_materials(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    query: Result<Query<MaterialQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    require_auth(&headers, &auth_state)?;
    let Query(query) = query?;
    let filter = MaterialFilter {
        subject: filter_value(query.subject.as_deref()),
        college: filter_value(query.college.as_deref()),
        course: filter_value(query.course.as_deref()),
        title: filter_value(query.q.as_deref()),
    };
    let materials = fetch_materials(&pool, &filter).await?;
    Ok((StatusCode::OK, Json(materials)))
}

#[utoipa::path(
    post,
    path = "/api/materials",
    request_body = NewMaterialRequest,
    responses(
        (status = 201, description = "Material created and upload points awarded", body = CreateMaterialResponse),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody)
    ),
    tag = "materials"
)]
pub async fn create_material(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<NewMaterialRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &auth_state)?;
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };
    let fields = validate_new_material(&request)?;

    let created = insert_material(&pool, &principal.user_id, &fields).await?;
    info!(
        material_id = created.material.id,
        user_id = %principal.user_id,
        points = created.award.points,
        "material uploaded"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateMaterialResponse {
            material: created.material,
            points: created.award.points,
            new_badges: created.award.new_badges,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/materials/{id}",
    params(("id" = i64, Path, description = "Material id")),
    responses(
        (status = 200, description = "Material detail", body = Material),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 404, description = "Material not found", body = ErrorBody)
    ),
    tag = "materials"
)]
pub async fn get_material(
    id: Result<Path<i64>, PathRejection>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    require_auth(&headers, &auth_state)?;
    let Path(id) = id?;
    let material = material_by_id(&pool, id)
        .await?
        .ok_or(ApiError::NotFound("Material"))?;
    Ok((StatusCode::OK, Json(material)))
}

#[utoipa::path(
    put,
    path = "/api/materials/{id}",
    params(("id" = i64, Path, description = "Material id")),
    request_body = UpdateMaterialRequest,
    responses(
        (status = 200, description = "Material updated", body = Material),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 403, description = "Not the uploader", body = ErrorBody),
        (status = 404, description = "Material not found", body = ErrorBody)
    ),
    tag = "materials"
)]
pub async fn update_material(
    id: Result<Path<i64>, PathRejection>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<UpdateMaterialRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &auth_state)?;
    let Path(id) = id?;
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };
    let changes = validate_material_update(&request)?;
    authorize_owner(&pool, &principal, id).await?;

    if !store_material_update(&pool, id, &changes).await? {
        return Err(ApiError::NotFound("Material"));
    }
    let material = material_by_id(&pool, id)
        .await?
        .ok_or(ApiError::NotFound("Material"))?;
    info!(material_id = id, user_id = %principal.user_id, "material updated");
    Ok((StatusCode::OK, Json(material)))
}

#[utoipa::path(
    delete,
    path = "/api/materials/{id}",
    params(("id" = i64, Path, description = "Material id")),
    responses(
        (status = 204, description = "Material deleted"),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 403, description = "Not the uploader", body = ErrorBody),
        (status = 404, description = "Material not found", body = ErrorBody)
    ),
    tag = "materials"
)]
pub async fn delete_material(
    id: Result<Path<i64>, PathRejection>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &auth_state)?;
    let Path(id) = id?;
    authorize_owner(&pool, &principal, id).await?;

    if remove_material(&pool, id).await? {
        info!(material_id = id, user_id = %principal.user_id, "material deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Material"))
    }
}

#[utoipa::path(
    post,
    path = "/api/materials/{id}/vote",
    params(("id" = i64, Path, description = "Material id")),
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Vote recorded; net count returned", body = VoteResponse),
        (status = 400, description = "Invalid vote type", body = ErrorBody),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 404, description = "Material not found", body = ErrorBody)
    ),
    tag = "materials"
)]
pub async fn vote_material(
    id: Result<Path<i64>, PathRejection>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VoteRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &auth_state)?;
    let Path(id) = id?;
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request(
            "vote_type must be \"upvote\" or \"downvote\"",
        ));
    };

    let vote_count = upsert_vote(&pool, id, &principal.user_id, request.vote_type).await??;
    debug!(material_id = id, vote = request.vote_type.as_str(), vote_count, "vote recorded");
    Ok((
        StatusCode::OK,
        Json(VoteResponse {
            material_id: id,
            vote_type: request.vote_type,
            vote_count,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/materials/{id}/bookmark",
    params(("id" = i64, Path, description = "Material id")),
    responses(
        (status = 200, description = "Material bookmarked", body = BookmarkResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 404, description = "Material not found", body = ErrorBody)
    ),
    tag = "materials"
)]
pub async fn bookmark_material(
    id: Result<Path<i64>, PathRejection>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &auth_state)?;
    let Path(id) = id?;
    let added = add_bookmark(&pool, id, &principal.user_id).await??;
    debug!(material_id = id, added, "bookmark stored");
    Ok((
        StatusCode::OK,
        Json(BookmarkResponse {
            material_id: id,
            bookmarked: true,
        }),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/materials/{id}/bookmark",
    params(("id" = i64, Path, description = "Material id")),
    responses(
        (status = 204, description = "Bookmark removed"),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody)
    ),
    tag = "materials"
)]
pub async fn remove_bookmark(
    id: Result<Path<i64>, PathRejection>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &auth_state)?;
    let Path(id) = id?;
    let removed = delete_bookmark(&pool, id, &principal.user_id).await?;
    debug!(material_id = id, removed, "bookmark removed");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/materials/{id}/report",
    params(("id" = i64, Path, description = "Material id")),
    request_body = ReportRequest,
    responses(
        (status = 201, description = "Report filed", body = Report),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
        (status = 404, description = "Material not found", body = ErrorBody)
    ),
    tag = "materials"
)]
pub async fn report_material(
    id: Result<Path<i64>, PathRejection>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ReportRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_auth(&headers, &auth_state)?;
    let Path(id) = id?;
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };
    let (reason, note) = validate_report(&request)?;

    let report = create_report(&pool, id, &principal.user_id, &reason, &note).await??;
    info!(material_id = id, report_id = report.id, "material reported");
    Ok((StatusCode::CREATED, Json(report)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::{AuthConfig, Role, TokenKind};
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

    fn student_headers(state: &AuthState) -> Result<HeaderMap> {
        let token = state
            .tokens()
            .issue("2021-00123-MN-0", Role::Student, TokenKind::Access)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token.token))?,
        );
        Ok(headers)
    }

    #[tokio::test]
    async fn list_requires_token() -> Result<()> {
        let response = list_materials(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Ok(Query(MaterialQuery::default())),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn create_rejects_invalid_url_before_insert() -> Result<()> {
        let state = auth_state();
        let response = create_material(
            student_headers(&state)?,
            Extension(lazy_pool()?),
            Extension(state),
            Some(Json(NewMaterialRequest {
                title: "Physics 71 notes".to_string(),
                description: None,
                subject: "Physics 71".to_string(),
                college: "CS".to_string(),
                course: "BS Physics".to_string(),
                file_url: "file:///etc/passwd".to_string(),
                filename: "notes.pdf".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn create_requires_payload() -> Result<()> {
        let state = auth_state();
        let response = create_material(
            student_headers(&state)?,
            Extension(lazy_pool()?),
            Extension(state),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn empty_update_is_rejected() -> Result<()> {
        let state = auth_state();
        let response = update_material(
            Ok(Path(1)),
            student_headers(&state)?,
            Extension(lazy_pool()?),
            Extension(state),
            Some(Json(UpdateMaterialRequest::default())),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn vote_without_payload_is_bad_request() -> Result<()> {
        let state = auth_state();
        let response = vote_material(
            Ok(Path(1)),
            student_headers(&state)?,
            Extension(lazy_pool()?),
            Extension(state),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn report_requires_reason() -> Result<()> {
        let state = auth_state();
        let response = report_material(
            Ok(Path(1)),
            student_headers(&state)?,
            Extension(lazy_pool()?),
            Extension(state),
            Some(Json(ReportRequest {
                reason: String::new(),
                note: None,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
