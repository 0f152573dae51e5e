//! Password rules and bcrypt hashing.
//!
//! bcrypt is CPU-bound, so hashing and verification run on the blocking pool.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use thiserror::Error;

const MIN_PASSWORD_LEN: usize = 8;
/// bcrypt ignores everything past 72 bytes.
const MAX_PASSWORD_BYTES: usize = 72;

/// Hash compared against when the account does not exist, so unknown and
/// known users take the same time to reject.
static DUMMY_HASH: OnceCell<String> = OnceCell::new();

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("Password must be at least 8 characters")]
    TooShort,
    #[error("Password must be at most 72 bytes")]
    TooLong,
    #[error("Password must contain an uppercase letter")]
    MissingUppercase,
    #[error("Password must contain a lowercase letter")]
    MissingLowercase,
    #[error("Password must contain a digit")]
    MissingDigit,
    #[error("Passwords do not match")]
    Mismatch,
}

/// Check complexity rules and that both entries agree.
///
/// # Errors
/// Returns the first rule the password breaks.
pub fn validate_password(password: &str, confirm: &str) -> Result<(), PasswordError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PasswordError::TooShort);
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(PasswordError::TooLong);
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(PasswordError::MissingUppercase);
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(PasswordError::MissingLowercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(PasswordError::MissingDigit);
    }
    if password != confirm {
        return Err(PasswordError::Mismatch);
    }
    Ok(())
}

/// # Errors
/// Returns an error if bcrypt fails or the blocking task panics.
pub async fn hash_password(password: String, cost: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .context("password hashing task failed")?
        .context("failed to hash password")
}

/// Verify `password` against `stored`, or against a throwaway hash when the
/// account is unknown. Always false in the latter case.
///
/// # Errors
/// Returns an error if bcrypt fails or the blocking task panics.
pub async fn verify_password(password: String, stored: Option<String>, cost: u32) -> Result<bool> {
    tokio::task::spawn_blocking(move || match stored {
        Some(hash) => bcrypt::verify(password, &hash),
        None => {
            let dummy = DUMMY_HASH.get_or_try_init(|| bcrypt::hash("iskonnect-timing", cost))?;
            bcrypt::verify(password, dummy).map(|_| false)
        }
    })
    .await
    .context("password verification task failed")?
    .context("failed to verify password")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_compliant_password() {
        assert_eq!(validate_password("Secret123", "Secret123"), Ok(()));
    }

    #[test]
    fn rejects_each_broken_rule() {
        assert_eq!(
            validate_password("Ab1", "Ab1"),
            Err(PasswordError::TooShort)
        );
        assert_eq!(
            validate_password("secret123", "secret123"),
            Err(PasswordError::MissingUppercase)
        );
        assert_eq!(
            validate_password("SECRET123", "SECRET123"),
            Err(PasswordError::MissingLowercase)
        );
        assert_eq!(
            validate_password("SecretPass", "SecretPass"),
            Err(PasswordError::MissingDigit)
        );
        assert_eq!(
            validate_password("Secret123", "Secret124"),
            Err(PasswordError::Mismatch)
        );
    }

    #[test]
    fn length_limit_counts_bytes() {
        let longest = format!("Aa1{}", "x".repeat(69));
        assert_eq!(validate_password(&longest, &longest), Ok(()));

        let over = format!("{longest}y");
        assert_eq!(validate_password(&over, &over), Err(PasswordError::TooLong));

        // 38 characters, 73 bytes.
        let multibyte = format!("Aa1{}", "ñ".repeat(35));
        assert_eq!(
            validate_password(&multibyte, &multibyte),
            Err(PasswordError::TooLong)
        );
    }

    #[tokio::test]
    async fn hash_then_verify() -> anyhow::Result<()> {
        let hash = hash_password("Secret123".to_string(), 4).await?;
        assert!(hash.starts_with("$2"));
        assert!(verify_password("Secret123".to_string(), Some(hash.clone()), 4).await?);
        assert!(!verify_password("Secret124".to_string(), Some(hash), 4).await?);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_account_never_verifies() -> anyhow::Result<()> {
        assert!(!verify_password("iskonnect-timing".to_string(), None, 4).await?);
        Ok(())
    }
}
