//! Password reset by emailed one-time code.
//!
//! Flow Overview:
//! 1) `forgot-password` stores a hashed 6-digit OTP (15 minutes) and queues an
//!    email; the response never reveals whether the account exists.
//! 2) `verify-otp` consumes the OTP and returns a random reset token
//!    (15 minutes). Five wrong codes drop the OTP.
//! 3) `reset-password` consumes the reset token and stores the new hash.

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use super::{
    password::{hash_password, validate_password},
    state::AuthState,
    storage::{OtpOutcome, reset_password as store_new_password, store_reset_otp, verify_reset_otp},
    types::{
        ForgotPasswordRequest, MessageResponse, ResetPasswordRequest, VerifyOtpRequest,
        VerifyOtpResponse,
    },
    utils::{hash_token, normalize_email, valid_email, valid_otp},
};
use crate::api::handlers::error::{ApiError, ErrorBody};

const FORGOT_MESSAGE: &str =
    "If an account exists for that email, a password reset code has been sent.";

#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset code queued when the account exists", body = MessageResponse),
        (status = 400, description = "Missing payload or malformed email", body = ErrorBody),
        (status = 500, description = "Code could not be stored", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email address"));
    }

    // Unknown accounts get the same answer. Storage failures do not.
    if store_reset_otp(&pool, &email, auth_state.config()).await? {
        info!("password reset code queued");
    }
    Ok((StatusCode::OK, Json(MessageResponse::new(FORGOT_MESSAGE))))
}

#[utoipa::path(
    post,
    path = "/api/auth/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Code accepted; reset token issued", body = VerifyOtpResponse),
        (status = 400, description = "Invalid or expired code", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn verify_otp(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };
    let email = normalize_email(&request.email);
    let otp = request.otp.trim();
    if !valid_email(&email) || !valid_otp(otp) {
        return Err(ApiError::bad_request("Invalid or expired code"));
    }

    match verify_reset_otp(&pool, &email, otp, auth_state.config()).await? {
        OtpOutcome::Verified { reset_token } => {
            Ok((StatusCode::OK, Json(VerifyOtpResponse { reset_token })))
        }
        OtpOutcome::Invalid => Err(ApiError::bad_request("Invalid or expired code")),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Invalid token or password", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };
    let email = normalize_email(&request.email);
    let reset_token = request.reset_token.trim();
    if !valid_email(&email) || reset_token.is_empty() {
        return Err(ApiError::bad_request("Invalid or expired reset token"));
    }
    validate_password(&request.new_password, &request.confirm_password)
        .map_err(|err| ApiError::bad_request(err.to_string()))?;

    let token_hash = hash_token(reset_token);
    let password_hash =
        hash_password(request.new_password, auth_state.config().bcrypt_cost()).await?;

    if store_new_password(&pool, &email, &token_hash, &password_hash).await? {
        info!("password reset completed");
        Ok((
            StatusCode::OK,
            Json(MessageResponse::new("Password has been reset. You can now log in.")),
        ))
    } else {
        Err(ApiError::bad_request("Invalid or expired reset token"))
    }
}
