//! Auth state and configuration.

use secrecy::SecretString;

use super::token::TokenIssuer;

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_VERIFICATION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 60;
const DEFAULT_OTP_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_OTP_MAX_ATTEMPTS: i32 = 5;
const DEFAULT_BCRYPT_COST: u32 = 12;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    verification_token_ttl_seconds: i64,
    resend_cooldown_seconds: i64,
    otp_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    otp_max_attempts: i32,
    cookie_secure: bool,
    bcrypt_cost: u32,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            verification_token_ttl_seconds: DEFAULT_VERIFICATION_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            otp_max_attempts: DEFAULT_OTP_MAX_ATTEMPTS,
            cookie_secure: false,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verification_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    pub(super) fn verification_token_ttl_seconds(&self) -> i64 {
        self.verification_token_ttl_seconds
    }

    pub(super) fn resend_cooldown_seconds(&self) -> i64 {
        self.resend_cooldown_seconds
    }

    pub(super) fn otp_ttl_seconds(&self) -> i64 {
        self.otp_ttl_seconds
    }

    pub(super) fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    pub(super) fn otp_max_attempts(&self) -> i32 {
        self.otp_max_attempts
    }

    pub(super) fn bcrypt_cost(&self) -> u32 {
        self.bcrypt_cost
    }
}

/// Shared auth context: configuration plus the token issuer built from the
/// injected signing secret.
#[derive(Debug)]
pub struct AuthState {
    config: AuthConfig,
    tokens: TokenIssuer,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, jwt_secret: &SecretString) -> Self {
        let tokens = TokenIssuer::new(
            jwt_secret,
            config.access_ttl_seconds(),
            config.refresh_ttl_seconds(),
        );
        Self { config, tokens }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::token::TokenKind;

    #[test]
    fn defaults_match_documented_values() {
        let config = AuthConfig::new("http://localhost:3000".to_string());
        assert_eq!(config.access_ttl_seconds(), 86_400);
        assert_eq!(config.refresh_ttl_seconds(), 604_800);
        assert_eq!(config.verification_token_ttl_seconds(), 86_400);
        assert_eq!(config.resend_cooldown_seconds(), 60);
        assert_eq!(config.otp_ttl_seconds(), 900);
        assert_eq!(config.reset_token_ttl_seconds(), 900);
        assert_eq!(config.otp_max_attempts(), 5);
        assert_eq!(config.bcrypt_cost(), 12);
        assert!(!config.cookie_secure());
    }

    #[test]
    fn issuer_uses_configured_ttls() {
        let config = AuthConfig::new("http://localhost:3000".to_string())
            .with_access_ttl_seconds(60)
            .with_refresh_ttl_seconds(600);
        let state = AuthState::new(
            config,
            &SecretString::from("0123456789abcdef0123456789abcdef"),
        );
        assert_eq!(state.tokens().ttl_seconds(TokenKind::Access), 60);
        assert_eq!(state.tokens().ttl_seconds(TokenKind::Refresh), 600);
    }
}
