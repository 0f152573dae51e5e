//! Auth handlers and supporting modules.
//!
//! Students register with a student number, verify their email through a
//! one-time link, and log in with student number and password. Sessions are
//! stateless HS256 JWTs:
//!
//! - **Access token:** 24h by default, presented as `Authorization: Bearer` or
//!   the `access_token` cookie.
//! - **Refresh token:** 7 days by default, exchanged at `/api/auth/refresh`
//!   for a new access token. It is never reissued.
//!
//! One-time secrets (verification links, reset codes, reset tokens) are
//! stored as SHA-256 hashes and pruned after expiry by a background task.

pub(crate) mod password;
pub(crate) mod password_reset;
pub(crate) mod principal;
mod pruner;
pub(crate) mod register;
pub(crate) mod session;
mod state;
mod storage;
pub(crate) mod token;
pub(crate) mod types;
pub(crate) mod utils;
pub(crate) mod verification;

pub use principal::{Principal, Role, require_admin, require_auth};
pub use pruner::spawn_token_pruner;
pub use state::{AuthConfig, AuthState};
pub use token::{Claims, IssuedToken, TokenError, TokenIssuer, TokenKind};
