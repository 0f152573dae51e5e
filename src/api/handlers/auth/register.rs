//! Account registration.
//!
//! Flow Overview:
//! 1) Normalize and validate the student number, names, email, and password.
//! 2) Hash the password with bcrypt off the async runtime.
//! 3) Insert credentials, profile, starting badges, a verification token, and
//!    the verification email outbox row in one transaction.

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use super::{
    password::{hash_password, validate_password},
    state::AuthState,
    storage::{NewAccount, SignupOutcome, insert_account},
    types::{RegisterRequest, RegisterResponse},
    utils::{
        normalize_email, normalize_name, normalize_student_number, valid_email,
        valid_student_number,
    },
};
use crate::api::handlers::error::{ApiError, ErrorBody};

/// Registration input after normalization, before hashing.
#[derive(Debug, PartialEq, Eq)]
struct ValidatedRegistration {
    student_number: String,
    first_name: String,
    last_name: String,
    email: String,
}

fn validate_registration(request: &RegisterRequest) -> Result<ValidatedRegistration, ApiError> {
    let student_number = normalize_student_number(&request.student_number);
    if !valid_student_number(&student_number) {
        return Err(ApiError::bad_request(
            "Student number must look like 2021-00123-MN-0",
        ));
    }
    let first_name = normalize_name(&request.first_name)
        .ok_or_else(|| ApiError::bad_request("First name must be 1 to 100 characters"))?;
    let last_name = normalize_name(&request.last_name)
        .ok_or_else(|| ApiError::bad_request("Last name must be 1 to 100 characters"))?;
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    validate_password(&request.password, &request.confirm_password)
        .map_err(|err| ApiError::bad_request(err.to_string()))?;

    Ok(ValidatedRegistration {
        student_number,
        first_name,
        last_name,
        email,
    })
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created; verification email queued", body = RegisterResponse),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 409, description = "Email or student number already registered", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn register(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };
    let validated = validate_registration(&request)?;

    let password_hash =
        hash_password(request.password, auth_state.config().bcrypt_cost()).await?;
    let account = NewAccount {
        student_number: validated.student_number,
        first_name: validated.first_name,
        last_name: validated.last_name,
        email: validated.email,
        password_hash,
    };

    match insert_account(&pool, &account, auth_state.config()).await? {
        SignupOutcome::Created => {
            info!(user_id = %account.student_number, "account registered");
            Ok((
                StatusCode::CREATED,
                Json(RegisterResponse {
                    message: "Registration successful. Please check your email to verify your account."
                        .to_string(),
                    user_id: account.student_number,
                }),
            ))
        }
        SignupOutcome::EmailTaken => Err(ApiError::Conflict("Email already registered")),
        SignupOutcome::StudentNumberTaken => {
            Err(ApiError::Conflict("Student number already registered"))
        }
    }
}
