//! # ISKOnnect
//!
//! `iskonnect` is the API backend of a study-materials sharing platform for
//! university students.
//!
//! ## Accounts
//!
//! Students register with their student number, which doubles as the account
//! identifier. A verification email is queued in the same transaction as the
//! account, and login is refused until the address is verified.
//!
//! ## Sessions
//!
//! Login returns an HS256 access token and a longer-lived refresh token, both in
//! the JSON body and as `HttpOnly` cookies. Tokens are not revoked server-side;
//! logout clears the cookies.
//!
//! ## Points and badges
//!
//! Uploading a material is worth points. Every award increments the profile and
//! grants newly qualified badges in one database transaction, see [`badges`].

pub mod api;
pub mod badges;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_commit_hash_is_hex_or_unknown() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn app_user_agent_names_the_crate() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
