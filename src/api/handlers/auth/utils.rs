//! Small helpers for auth validation and one-time token handling.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{Rng, RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};

const MAX_NAME_LEN: usize = 100;

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Student numbers are compared in upper case, e.g. `2021-00123-MN-0`.
pub(crate) fn normalize_student_number(value: &str) -> String {
    value.trim().to_uppercase()
}

pub(crate) fn valid_student_number(normalized: &str) -> bool {
    Regex::new(r"^\d{4}-\d{5}-[A-Z]{2}-\d$").is_ok_and(|regex| regex.is_match(normalized))
}

/// Trim a display name and enforce 1..=100 characters.
pub(crate) fn normalize_name(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let length = trimmed.chars().count();
    (1..=MAX_NAME_LEN)
        .contains(&length)
        .then(|| trimmed.to_string())
}

/// Random URL-safe token for email links and password reset.
///
/// Only the caller sees the raw value; the database stores [`hash_token`].
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Six decimal digits, zero padded.
pub(crate) fn generate_otp() -> String {
    let code: u32 = OsRng.gen_range(0..1_000_000);
    format!("{code:06}")
}

pub(crate) fn valid_otp(otp: &str) -> bool {
    otp.len() == 6 && otp.bytes().all(|b| b.is_ascii_digit())
}

/// SHA-256 of a one-time secret; raw values never touch the database.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Build the frontend verification link included in outbound emails.
pub(crate) fn build_verify_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/verify-email?token={token}")
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Name of the violated constraint, when the driver reports one.
pub(crate) fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Juan@UP.edu.PH "), "juan@up.edu.ph");
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(valid_email("juan@up.edu.ph"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
        assert!(!valid_email("two words@up.edu.ph"));
    }

    #[test]
    fn student_number_format() {
        let normalized = normalize_student_number(" 2021-00123-mn-0 ");
        assert_eq!(normalized, "2021-00123-MN-0");
        assert!(valid_student_number(&normalized));
        assert!(!valid_student_number("2021-0123-MN-0"));
        assert!(!valid_student_number("2021-00123-M1-0"));
        assert!(!valid_student_number("2021-00123-MN-00"));
        assert!(!valid_student_number("x2021-00123-MN-0"));
    }

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(normalize_name("  Juan "), Some("Juan".to_string()));
        assert_eq!(normalize_name("   "), None);
        assert_eq!(normalize_name(&"a".repeat(101)), None);
        assert!(normalize_name(&"ñ".repeat(100)).is_some());
    }

    #[test]
    fn generated_token_is_32_bytes() {
        let decoded_len = generate_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..50 {
            assert!(valid_otp(&generate_otp()));
        }
        assert!(!valid_otp("12345"));
        assert!(!valid_otp("12345a"));
        assert!(!valid_otp("1234567"));
    }

    #[test]
    fn hash_token_stable() {
        assert_eq!(hash_token("token"), hash_token("token"));
        assert_ne!(hash_token("token"), hash_token("other"));
        assert_eq!(hash_token("token").len(), 32);
    }

    #[test]
    fn build_verify_url_trims_trailing_slash() {
        assert_eq!(
            build_verify_url("https://iskonnect.com/", "abc"),
            "https://iskonnect.com/verify-email?token=abc"
        );
    }

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
        constraint: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn unique_violation_reports_constraint() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
            constraint: Some("credentials_email_key"),
        }));
        assert!(is_unique_violation(&err));
        assert_eq!(violated_constraint(&err), Some("credentials_email_key"));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
            constraint: None,
        }));
        assert!(!is_unique_violation(&err));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert_eq!(violated_constraint(&sqlx::Error::RowNotFound), None);
    }
}
