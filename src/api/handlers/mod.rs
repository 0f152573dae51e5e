//! API handlers for ISKOnnect.
//!
//! Handlers resolve the caller with [`auth::require_auth`] or
//! [`auth::require_admin`], validate input, and return [`error::ApiError`] for
//! every non-2xx response so clients always receive `{"error": "..."}`.

pub mod admin;
pub mod auth;
pub mod error;
pub mod health;
pub mod materials;
pub mod root;
pub mod users;
