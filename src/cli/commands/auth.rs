use anyhow::{Result, anyhow};
use clap::{Arg, ArgAction, Command};
use secrecy::SecretString;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_ACCESS_TTL_HOURS: &str = "access-token-ttl-hours";
pub const ARG_REFRESH_TTL_HOURS: &str = "refresh-token-ttl-hours";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_BCRYPT_COST: &str = "bcrypt-cost";
pub const ARG_VERIFICATION_TTL: &str = "verification-token-ttl-seconds";
pub const ARG_PRUNE_INTERVAL: &str = "token-prune-interval-seconds";

const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub access_token_ttl_hours: u64,
    pub refresh_token_ttl_hours: u64,
    pub cookie_secure: bool,
    pub bcrypt_cost: u32,
    pub verification_token_ttl_seconds: i64,
    pub token_prune_interval_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if the signing secret is missing or too short, or the
    /// refresh TTL does not exceed the access TTL.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .cloned()
            .ok_or_else(|| anyhow!("missing required argument: --{ARG_JWT_SECRET}"))?;
        if secret.len() < MIN_JWT_SECRET_LEN {
            return Err(anyhow!(
                "--{ARG_JWT_SECRET} must be at least {MIN_JWT_SECRET_LEN} bytes"
            ));
        }

        let access_token_ttl_hours = matches
            .get_one::<u64>(ARG_ACCESS_TTL_HOURS)
            .copied()
            .unwrap_or(24);
        let refresh_token_ttl_hours = matches
            .get_one::<u64>(ARG_REFRESH_TTL_HOURS)
            .copied()
            .unwrap_or(168);
        if refresh_token_ttl_hours <= access_token_ttl_hours {
            return Err(anyhow!(
                "--{ARG_REFRESH_TTL_HOURS} must be greater than --{ARG_ACCESS_TTL_HOURS}"
            ));
        }

        Ok(Self {
            jwt_secret: SecretString::from(secret),
            access_token_ttl_hours,
            refresh_token_ttl_hours,
            cookie_secure: matches.get_flag(ARG_COOKIE_SECURE),
            bcrypt_cost: matches.get_one::<u32>(ARG_BCRYPT_COST).copied().unwrap_or(12),
            verification_token_ttl_seconds: matches
                .get_one::<i64>(ARG_VERIFICATION_TTL)
                .copied()
                .unwrap_or(86_400),
            token_prune_interval_seconds: matches
                .get_one::<u64>(ARG_PRUNE_INTERVAL)
                .copied()
                .unwrap_or(3600),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HS256 signing secret for access and refresh tokens")
                .env("ISKONNECT_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL_HOURS)
                .long(ARG_ACCESS_TTL_HOURS)
                .help("Access token lifetime in hours")
                .env("ISKONNECT_ACCESS_TOKEN_TTL_HOURS")
                .default_value("24")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL_HOURS)
                .long(ARG_REFRESH_TTL_HOURS)
                .help("Refresh token lifetime in hours")
                .env("ISKONNECT_REFRESH_TOKEN_TTL_HOURS")
                .default_value("168")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Mark auth cookies Secure (enable behind HTTPS)")
                .env("ISKONNECT_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_BCRYPT_COST)
                .long(ARG_BCRYPT_COST)
                .help("bcrypt work factor for password hashes")
                .env("ISKONNECT_BCRYPT_COST")
                .default_value("12")
                .value_parser(clap::value_parser!(u32).range(4..=31)),
        )
        .arg(
            Arg::new(ARG_VERIFICATION_TTL)
                .long(ARG_VERIFICATION_TTL)
                .help("Email verification link lifetime in seconds")
                .env("ISKONNECT_VERIFICATION_TOKEN_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(60..)),
        )
        .arg(
            Arg::new(ARG_PRUNE_INTERVAL)
                .long(ARG_PRUNE_INTERVAL)
                .help("Interval between expired token sweeps")
                .env("ISKONNECT_TOKEN_PRUNE_INTERVAL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
}
