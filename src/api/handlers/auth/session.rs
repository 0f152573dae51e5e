//! Login, logout, and token refresh.
//!
//! Tokens are returned in the JSON body and as `HttpOnly` cookies. Nothing is
//! stored server-side, so logout only clears the cookies.

use anyhow::Context;
use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, COOKIE, InvalidHeaderValue, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    password::verify_password,
    state::{AuthConfig, AuthState},
    storage::{lookup_login, lookup_role},
    token::TokenKind,
    types::{
        LoginRequest, LoginResponse, MessageResponse, RefreshRequest, RefreshResponse,
        TOKEN_TYPE_BEARER,
    },
    utils::normalize_student_number,
};
use crate::api::handlers::error::{ApiError, ErrorBody};

pub(crate) const ACCESS_COOKIE_NAME: &str = "access_token";
pub(crate) const REFRESH_COOKIE_NAME: &str = "refresh_token";

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; tokens also set as cookies", body = LoginResponse),
        (status = 400, description = "Missing fields", body = ErrorBody),
        (status = 401, description = "Invalid credentials or email not verified", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };

    let student_number = normalize_student_number(&request.student_number);
    if student_number.is_empty() || request.password.is_empty() {
        return Err(ApiError::bad_request(
            "Student number and password are required",
        ));
    }

    let record = lookup_login(&pool, &student_number).await?;
    // Unknown accounts still pay for one bcrypt comparison.
    let stored_hash = record.as_ref().map(|record| record.password_hash.clone());
    let valid = verify_password(
        request.password,
        stored_hash,
        auth_state.config().bcrypt_cost(),
    )
    .await?;

    let Some(record) = record.filter(|_| valid) else {
        return Err(ApiError::InvalidCredentials);
    };
    if !record.email_verified {
        return Err(ApiError::EmailNotVerified);
    }

    let account = record.account;
    let tokens = auth_state.tokens();
    let access = tokens.issue(&account.id, account.role, TokenKind::Access)?;
    let refresh = tokens.issue(&account.id, account.role, TokenKind::Refresh)?;

    let config = auth_state.config();
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        token_cookie(config, ACCESS_COOKIE_NAME, &access.token, access.expires_in)
            .context("failed to build access cookie")?,
    );
    headers.append(
        SET_COOKIE,
        token_cookie(config, REFRESH_COOKIE_NAME, &refresh.token, refresh.expires_in)
            .context("failed to build refresh cookie")?,
    );

    info!(user_id = %account.id, "user logged in");

    let body = LoginResponse {
        user: account,
        access_token: access.token,
        refresh_token: refresh.token,
        token_type: TOKEN_TYPE_BEARER.to_string(),
        expires_in: access.expires_in,
    };
    Ok((StatusCode::OK, headers, Json(body)).into_response())
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Auth cookies cleared", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn logout(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    for name in [ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME] {
        match clear_cookie(auth_state.config(), name) {
            Ok(cookie) => {
                headers.append(SET_COOKIE, cookie);
            }
            Err(err) => warn!("Failed to build clearing cookie for {name}: {err}"),
        }
    }
    (
        StatusCode::OK,
        headers,
        Json(MessageResponse::new("Logged out successfully")),
    )
}

#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    request_body(content = RefreshRequest, description = "Optional when the refresh_token cookie is sent"),
    responses(
        (status = 200, description = "New access token", body = RefreshResponse),
        (status = 401, description = "Missing, invalid, or expired refresh token", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Response, ApiError> {
    let from_body = payload
        .and_then(|Json(request)| request.refresh_token)
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());
    let token = from_body
        .or_else(|| extract_cookie(&headers, REFRESH_COOKIE_NAME))
        .ok_or(ApiError::Unauthorized)?;

    let claims = auth_state.tokens().validate(&token, TokenKind::Refresh)?;

    // The role may have changed since the refresh token was issued.
    let role = lookup_role(&pool, &claims.sub)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let access = auth_state
        .tokens()
        .issue(&claims.sub, role, TokenKind::Access)?;

    let mut response_headers = HeaderMap::new();
    response_headers.append(
        SET_COOKIE,
        token_cookie(
            auth_state.config(),
            ACCESS_COOKIE_NAME,
            &access.token,
            access.expires_in,
        )
        .context("failed to build access cookie")?,
    );

    let body = RefreshResponse {
        access_token: access.token,
        token_type: TOKEN_TYPE_BEARER.to_string(),
        expires_in: access.expires_in,
    };
    Ok((StatusCode::OK, response_headers, Json(body)).into_response())
}

/// `HttpOnly`, `SameSite=Strict` cookie carrying a token.
pub(super) fn token_cookie(
    config: &AuthConfig,
    name: &str,
    token: &str,
    max_age_seconds: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{name}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age_seconds}");
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_cookie(config: &AuthConfig, name: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{name}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT"
    );
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Value of cookie `name` across all `Cookie` headers.
pub(crate) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;

    fn auth_state(secure: bool) -> Arc<AuthState> {
        let config =
            AuthConfig::new("http://localhost:3000".to_string()).with_cookie_secure(secure);
        Arc::new(AuthState::new(
            config,
            &SecretString::from("0123456789abcdef0123456789abcdef"),
        ))
    }

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok().map(str::to_string))
            .collect()
    }

    #[test]
    fn token_cookie_attributes() -> Result<()> {
        let plain = token_cookie(auth_state(false).config(), ACCESS_COOKIE_NAME, "abc", 60)?;
        assert_eq!(
            plain.to_str()?,
            "access_token=abc; Path=/; HttpOnly; SameSite=Strict; Max-Age=60"
        );
        let secure = token_cookie(auth_state(true).config(), REFRESH_COOKIE_NAME, "xyz", 60)?;
        assert!(secure.to_str()?.ends_with("; Secure"));
        Ok(())
    }

    #[test]
    fn extract_cookie_finds_named_value() -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(
            COOKIE,
            HeaderValue::from_static("refresh_token=r1; access_token=a1"),
        );
        assert_eq!(
            extract_cookie(&headers, ACCESS_COOKIE_NAME),
            Some("a1".to_string())
        );
        assert_eq!(
            extract_cookie(&headers, REFRESH_COOKIE_NAME),
            Some("r1".to_string())
        );
        assert_eq!(extract_cookie(&headers, "missing"), None);
        Ok(())
    }

    #[test]
    fn extract_bearer_token_requires_scheme() -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer  tok "));
        assert_eq!(extract_bearer_token(&headers), Some("tok".to_string()));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(extract_bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);
        Ok(())
    }

    #[tokio::test]
    async fn logout_clears_both_cookies() {
        let response = logout(Extension(auth_state(true))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 2);
        for cookie in cookies {
            assert!(cookie.contains("Max-Age=0"));
            assert!(cookie.contains("Expires=Thu, 01 Jan 1970 00:00:00 GMT"));
            assert!(cookie.ends_with("; Secure"));
        }
    }

    #[tokio::test]
    async fn login_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(Extension(pool), Extension(auth_state(false)), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn login_blank_fields() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(
            Extension(pool),
            Extension(auth_state(false)),
            Some(Json(LoginRequest {
                student_number: "  ".to_string(),
                password: "Secret123".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_without_token_is_unauthorized() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = refresh(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state(false)),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rejects_access_token() -> Result<()> {
        let state = auth_state(false);
        let access = state.tokens().issue(
            "2021-00123-MN-0",
            super::super::principal::Role::Student,
            TokenKind::Access,
        )?;
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = refresh(
            HeaderMap::new(),
            Extension(pool),
            Extension(state),
            Some(Json(RefreshRequest {
                refresh_token: Some(access.token),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
