//! Authenticated principal extraction and role checks.
//!
//! Flow Overview: read the access token (bearer header first, then the
//! `access_token` cookie), validate it, and hand handlers a `Principal` built
//! from its claims. Role checks use the role embedded at issue time.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{
    session::{ACCESS_COOKIE_NAME, extract_bearer_token, extract_cookie},
    state::AuthState,
    token::TokenKind,
};
use crate::api::handlers::error::ApiError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Admin => "admin",
        }
    }

    /// Parse the persisted `user_role` value.
    ///
    /// # Errors
    /// Returns a decode error for unknown values.
    pub fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        match value {
            "student" => Ok(Self::Student),
            "admin" => Ok(Self::Admin),
            _ => Err(sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid profiles.role value: {value}"),
            )))),
        }
    }
}

/// Authenticated user context derived from the access token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
}

impl Principal {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners and admins may modify a resource.
    #[must_use]
    pub fn can_modify(&self, owner_id: &str) -> bool {
        self.is_admin() || self.user_id == owner_id
    }
}

/// Resolve the request's access token into a principal, or 401.
///
/// # Errors
/// Returns [`ApiError::Unauthorized`] when the token is missing or fails validation.
pub fn require_auth(headers: &HeaderMap, auth_state: &AuthState) -> Result<Principal, ApiError> {
    let token = extract_bearer_token(headers)
        .or_else(|| extract_cookie(headers, ACCESS_COOKIE_NAME))
        .ok_or(ApiError::Unauthorized)?;
    let claims = auth_state
        .tokens()
        .validate(&token, TokenKind::Access)
        .map_err(|err| {
            tracing::debug!(error = %err, "rejected access token");
            ApiError::Unauthorized
        })?;
    Ok(Principal {
        user_id: claims.sub,
        role: claims.role,
    })
}

/// Like [`require_auth`], then 403 unless the principal is an admin.
///
/// # Errors
/// Returns [`ApiError::Unauthorized`] or [`ApiError::Forbidden`].
pub fn require_admin(headers: &HeaderMap, auth_state: &AuthState) -> Result<Principal, ApiError> {
    let principal = require_auth(headers, auth_state)?;
    if principal.is_admin() {
        Ok(principal)
    } else {
        Err(ApiError::Forbidden)
    }
}
