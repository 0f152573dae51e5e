//! Email verification endpoints.

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use super::state::AuthState;
use super::storage::{ResendOutcome, consume_verification_token, enqueue_resend_verification};
use super::types::{MessageResponse, ResendVerificationRequest, VerifyEmailQuery};
use super::utils::{hash_token, normalize_email, valid_email};
use crate::api::handlers::error::{ApiError, ErrorBody};

const RESEND_MESSAGE: &str =
    "If the account exists and is not yet verified, a new verification email has been sent.";

/// Verify the email link by consuming the hashed token and flagging the profile.
#[utoipa::path(
    get,
    path = "/api/auth/verify-email",
    params(VerifyEmailQuery),
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Missing, invalid, or expired token", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    pool: Extension<PgPool>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let token = query.token.as_deref().map(str::trim).unwrap_or_default();
    if token.is_empty() {
        return Err(ApiError::bad_request("Missing token"));
    }

    // Hash before lookup; raw tokens are never stored server-side.
    let token_hash = hash_token(token);
    if consume_verification_token(&pool, &token_hash).await? {
        info!("email verified");
        Ok((
            StatusCode::OK,
            Json(MessageResponse::new(
                "Email verified successfully. You can now log in.",
            )),
        ))
    } else {
        Err(ApiError::bad_request("Invalid or expired token"))
    }
}

/// Resend a verification email. Unknown, verified and cooling-down accounts
/// all get the same 200; only storage failures differ.
#[utoipa::path(
    post,
    path = "/api/auth/resend-verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 200, description = "Resend accepted", body = MessageResponse),
        (status = 400, description = "Missing payload", body = ErrorBody),
        (status = 500, description = "Email could not be queued", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };
    let accepted = (StatusCode::OK, Json(MessageResponse::new(RESEND_MESSAGE)));

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Ok(accepted);
    }

    match enqueue_resend_verification(&pool, &email, auth_state.config()).await? {
        ResendOutcome::Queued => info!("verification email re-queued"),
        ResendOutcome::Cooldown | ResendOutcome::Noop => {}
    }
    Ok(accepted)
}
