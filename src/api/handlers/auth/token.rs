//! HS256 access and refresh tokens.
//!
//! Both kinds carry the same claims; `typ` keeps a refresh token from being
//! replayed as an access token and the other way around. Expiry is checked
//! with zero leeway and the algorithm is pinned to HS256.

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::principal::Role;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub typ: TokenKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token signature mismatch")]
    InvalidSignature,
    #[error("token algorithm not accepted")]
    InvalidAlgorithm,
    #[error("token malformed")]
    Malformed,
    #[error("unexpected token kind")]
    WrongKind,
    #[error("failed to sign token")]
    Signing,
}

/// A freshly signed token with its absolute and relative expiry.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
    pub expires_in: i64,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("access_ttl_seconds", &self.access_ttl_seconds)
            .field("refresh_ttl_seconds", &self.refresh_ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    #[must_use]
    pub fn new(secret: &SecretString, access_ttl_seconds: i64, refresh_ttl_seconds: i64) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            access_ttl_seconds,
            refresh_ttl_seconds,
        }
    }

    #[must_use]
    pub fn ttl_seconds(&self, kind: TokenKind) -> i64 {
        match kind {
            TokenKind::Access => self.access_ttl_seconds,
            TokenKind::Refresh => self.refresh_ttl_seconds,
        }
    }

    /// Sign a token of `kind` for `user_id` starting now.
    ///
    /// # Errors
    /// Returns [`TokenError::Signing`] if encoding fails.
    pub fn issue(
        &self,
        user_id: &str,
        role: Role,
        kind: TokenKind,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(user_id, role, kind, now_unix_seconds())
    }

    /// Sign a token with an explicit `iat`.
    ///
    /// # Errors
    /// Returns [`TokenError::Signing`] if encoding fails.
    pub fn issue_at(
        &self,
        user_id: &str,
        role: Role,
        kind: TokenKind,
        issued_at: i64,
    ) -> Result<IssuedToken, TokenError> {
        let ttl = self.ttl_seconds(kind);
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            iat: issued_at,
            exp: issued_at.saturating_add(ttl),
            typ: kind,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| TokenError::Signing)?;
        Ok(IssuedToken {
            token,
            expires_at: claims.exp,
            expires_in: ttl,
        })
    }

    /// Verify signature, algorithm, expiry, and kind.
    ///
    /// # Errors
    /// Returns the matching [`TokenError`] variant for each failure.
    pub fn validate(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub", "iat"]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::InvalidAlgorithm => TokenError::InvalidAlgorithm,
                _ => TokenError::Malformed,
            }
        })?;

        if data.claims.typ != expected {
            return Err(TokenError::WrongKind);
        }
        Ok(data.claims)
    }
}

fn now_unix_seconds() -> i64 {
    i64::try_from(jsonwebtoken::get_current_timestamp()).unwrap_or(i64::MAX)
}
