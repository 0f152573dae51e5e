//! Database helpers for accounts, verification, and password reset state.

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::Instrument;

use super::principal::Role;
use super::state::AuthConfig;
use super::types::AccountSummary;
use super::utils::{
    build_verify_url, generate_otp, generate_token, hash_token, is_unique_violation,
    violated_constraint,
};
use crate::api::email::templates::{PASSWORD_RESET_OTP_TEMPLATE, VERIFY_EMAIL_TEMPLATE};
use crate::badges::BadgeRepo;

/// Outcome when attempting to create a new account.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum SignupOutcome {
    Created,
    EmailTaken,
    StudentNumberTaken,
}

/// Outcome for a resend request (always 200 to avoid account probing).
#[derive(Debug, PartialEq, Eq)]
pub(super) enum ResendOutcome {
    Queued,
    Cooldown,
    Noop,
}

#[derive(Debug)]
pub(super) enum OtpOutcome {
    Verified { reset_token: String },
    Invalid,
}

/// Validated registration input with the password already hashed.
pub(super) struct NewAccount {
    pub(super) student_number: String,
    pub(super) first_name: String,
    pub(super) last_name: String,
    pub(super) email: String,
    pub(super) password_hash: String,
}

/// Fields needed to check a login attempt.
pub(super) struct LoginRecord {
    pub(super) password_hash: String,
    pub(super) email_verified: bool,
    pub(super) account: AccountSummary,
}

/// Create credentials, profile, starting badges, verification token, and the
/// verification email in one transaction.
pub(super) async fn insert_account(
    pool: &PgPool,
    account: &NewAccount,
    config: &AuthConfig,
) -> Result<SignupOutcome> {
    let mut tx = pool.begin().await.context("begin signup transaction")?;

    let query = r"
        INSERT INTO credentials (id, email, password_hash)
        VALUES ($1, $2, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(&account.student_number)
        .bind(&account.email)
        .bind(&account.password_hash)
        .execute(&mut *tx)
        .instrument(span)
        .await;
    if let Err(err) = result {
        if is_unique_violation(&err) {
            let _ = tx.rollback().await;
            return Ok(conflict_outcome(violated_constraint(&err)));
        }
        return Err(err).context("failed to insert credentials");
    }

    let query = r"
        INSERT INTO profiles (id, first_name, last_name, email)
        VALUES ($1, $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(&account.student_number)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.email)
        .execute(&mut *tx)
        .instrument(span)
        .await;
    if let Err(err) = result {
        if is_unique_violation(&err) {
            let _ = tx.rollback().await;
            return Ok(SignupOutcome::EmailTaken);
        }
        return Err(err).context("failed to insert profile");
    }

    // Zero-point badges are held from the start.
    BadgeRepo::grant_qualified_in(&mut tx, &account.student_number, 0)
        .await
        .context("failed to grant starting badges")?;

    insert_verification_records(
        &mut tx,
        &account.student_number,
        &account.email,
        &account.first_name,
        config,
    )
    .await?;

    tx.commit().await.context("commit signup transaction")?;

    Ok(SignupOutcome::Created)
}

fn conflict_outcome(constraint: Option<&str>) -> SignupOutcome {
    match constraint {
        Some(name) if name.contains("email") => SignupOutcome::EmailTaken,
        _ => SignupOutcome::StudentNumberTaken,
    }
}

/// Store a hashed verification token and queue the email carrying the raw one.
async fn insert_verification_records(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    email: &str,
    first_name: &str,
    config: &AuthConfig,
) -> Result<()> {
    let token = generate_token()?;
    let token_hash = hash_token(&token);

    let query = r"
        INSERT INTO email_verification_tokens
            (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(token_hash)
        .bind(config.verification_token_ttl_seconds())
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email verification token")?;

    let payload = json!({
        "first_name": first_name,
        "verify_url": build_verify_url(config.frontend_base_url(), &token),
    });
    enqueue_email(tx, email, VERIFY_EMAIL_TEMPLATE, &payload).await
}

async fn enqueue_email(
    tx: &mut Transaction<'_, Postgres>,
    to_email: &str,
    template: &str,
    payload: &serde_json::Value,
) -> Result<()> {
    let payload_text = serde_json::to_string(payload).context("failed to serialize email payload")?;
    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(to_email)
        .bind(template)
        .bind(payload_text)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;
    Ok(())
}

/// Consume a verification token and mark the profile verified.
pub(super) async fn consume_verification_token(pool: &PgPool, token_hash: &[u8]) -> Result<bool> {
    let mut tx = pool.begin().await.context("begin verify-email transaction")?;

    let query = r"
        DELETE FROM email_verification_tokens
        WHERE token_hash = $1
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to consume verification token")?;

    let Some(row) = row else {
        tx.rollback().await.context("rollback verify-email")?;
        return Ok(false);
    };
    let user_id: String = row.get("user_id");

    let query = r"
        UPDATE profiles
        SET email_verified = TRUE,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to mark email verified")?;

    // Older links for the same account are no longer needed.
    let query = "DELETE FROM email_verification_tokens WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to clear verification tokens")?;

    tx.commit().await.context("commit verify-email transaction")?;
    Ok(true)
}

pub(super) async fn enqueue_resend_verification(
    pool: &PgPool,
    email: &str,
    config: &AuthConfig,
) -> Result<ResendOutcome> {
    let mut tx = pool.begin().await.context("begin resend transaction")?;

    let query = r"
        SELECT id, first_name, email_verified
        FROM profiles
        WHERE email = $1
        FOR UPDATE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup profile for resend")?;

    let Some(row) = row else {
        tx.commit().await.context("commit resend noop")?;
        return Ok(ResendOutcome::Noop);
    };
    let verified: bool = row.get("email_verified");
    if verified {
        tx.commit().await.context("commit resend noop")?;
        return Ok(ResendOutcome::Noop);
    }

    let user_id: String = row.get("id");
    if resend_cooldown_active(&mut tx, &user_id, config.resend_cooldown_seconds()).await? {
        tx.commit().await.context("commit resend cooldown")?;
        return Ok(ResendOutcome::Cooldown);
    }

    let first_name: String = row.get("first_name");
    insert_verification_records(&mut tx, &user_id, email, &first_name, config).await?;
    tx.commit().await.context("commit resend enqueue")?;
    Ok(ResendOutcome::Queued)
}

async fn resend_cooldown_active(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    cooldown_seconds: i64,
) -> Result<bool> {
    let query = r"
        SELECT 1
        FROM email_verification_tokens
        WHERE user_id = $1
          AND created_at > NOW() - ($2 * INTERVAL '1 second')
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(cooldown_seconds)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check resend cooldown")?;
    Ok(row.is_some())
}

/// Look up login data by student number.
pub(super) async fn lookup_login(pool: &PgPool, student_number: &str) -> Result<Option<LoginRecord>> {
    let query = r"
        SELECT credentials.password_hash,
               profiles.id, profiles.first_name, profiles.last_name, profiles.email,
               profiles.role::text AS role, profiles.points, profiles.email_verified
        FROM credentials
        JOIN profiles ON profiles.id = credentials.id
        WHERE credentials.id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(student_number)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup login record")?;

    let Some(row) = row else {
        return Ok(None);
    };
    let role: String = row.get("role");
    Ok(Some(LoginRecord {
        password_hash: row.get("password_hash"),
        email_verified: row.get("email_verified"),
        account: AccountSummary {
            id: row.get("id"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            email: row.get("email"),
            role: Role::from_db(&role)?,
            points: row.get("points"),
        },
    }))
}

/// Current role of a user, re-read on token refresh.
pub(super) async fn lookup_role(pool: &PgPool, user_id: &str) -> Result<Option<Role>> {
    let query = "SELECT role::text AS role FROM profiles WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup role")?;
    row.map(|row| {
        let role: String = row.get("role");
        Role::from_db(&role).map_err(anyhow::Error::from)
    })
    .transpose()
}

/// Replace any pending OTP for the account and queue the email.
///
/// Returns `false` when no account uses this email.
pub(super) async fn store_reset_otp(pool: &PgPool, email: &str, config: &AuthConfig) -> Result<bool> {
    let mut tx = pool.begin().await.context("begin forgot-password transaction")?;

    let query = r"
        SELECT credentials.id, profiles.first_name
        FROM credentials
        JOIN profiles ON profiles.id = credentials.id
        WHERE credentials.email = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup account for password reset")?;
    let Some(row) = row else {
        tx.commit().await.context("commit forgot-password noop")?;
        return Ok(false);
    };
    let user_id: String = row.get("id");
    let first_name: String = row.get("first_name");

    let otp = generate_otp();
    let query = r"
        INSERT INTO password_reset_otps (user_id, otp_hash, attempts, expires_at)
        VALUES ($1, $2, 0, NOW() + ($3 * INTERVAL '1 second'))
        ON CONFLICT (user_id) DO UPDATE
        SET otp_hash = EXCLUDED.otp_hash,
            attempts = 0,
            expires_at = EXCLUDED.expires_at,
            created_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&user_id)
        .bind(hash_token(&otp))
        .bind(config.otp_ttl_seconds())
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to store password reset otp")?;

    let payload = json!({
        "first_name": first_name,
        "otp": otp,
        "expires_minutes": config.otp_ttl_seconds() / 60,
    });
    enqueue_email(&mut tx, email, PASSWORD_RESET_OTP_TEMPLATE, &payload).await?;

    tx.commit().await.context("commit forgot-password transaction")?;
    Ok(true)
}

/// Check an OTP. A match consumes it and issues a short-lived reset token;
/// a miss counts against the attempt limit and the OTP is dropped once the
/// limit is reached.
pub(super) async fn verify_reset_otp(
    pool: &PgPool,
    email: &str,
    otp: &str,
    config: &AuthConfig,
) -> Result<OtpOutcome> {
    let mut tx = pool.begin().await.context("begin verify-otp transaction")?;

    let query = r"
        SELECT password_reset_otps.user_id,
               password_reset_otps.otp_hash,
               password_reset_otps.attempts,
               password_reset_otps.expires_at > NOW() AS live
        FROM password_reset_otps
        JOIN credentials ON credentials.id = password_reset_otps.user_id
        WHERE credentials.email = $1
        FOR UPDATE OF password_reset_otps
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup password reset otp")?;
    let Some(row) = row else {
        tx.commit().await.context("commit verify-otp noop")?;
        return Ok(OtpOutcome::Invalid);
    };

    let user_id: String = row.get("user_id");
    let stored_hash: Vec<u8> = row.get("otp_hash");
    let attempts: i32 = row.get("attempts");
    let live: bool = row.get("live");

    if !live {
        delete_reset_otp(&mut tx, &user_id).await?;
        tx.commit().await.context("commit expired otp cleanup")?;
        return Ok(OtpOutcome::Invalid);
    }

    if stored_hash != hash_token(otp) {
        let attempts = attempts.saturating_add(1);
        if attempts >= config.otp_max_attempts() {
            delete_reset_otp(&mut tx, &user_id).await?;
        } else {
            let query = "UPDATE password_reset_otps SET attempts = $2 WHERE user_id = $1";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(&user_id)
                .bind(attempts)
                .execute(&mut *tx)
                .instrument(span)
                .await
                .context("failed to record otp attempt")?;
        }
        tx.commit().await.context("commit otp attempt")?;
        return Ok(OtpOutcome::Invalid);
    }

    delete_reset_otp(&mut tx, &user_id).await?;

    let reset_token = generate_token()?;
    let query = r"
        INSERT INTO password_reset_tokens (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ON CONFLICT (user_id) DO UPDATE
        SET token_hash = EXCLUDED.token_hash,
            expires_at = EXCLUDED.expires_at,
            created_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&user_id)
        .bind(hash_token(&reset_token))
        .bind(config.reset_token_ttl_seconds())
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to store password reset token")?;

    tx.commit().await.context("commit verify-otp transaction")?;
    Ok(OtpOutcome::Verified { reset_token })
}

async fn delete_reset_otp(tx: &mut Transaction<'_, Postgres>, user_id: &str) -> Result<()> {
    let query = "DELETE FROM password_reset_otps WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to delete password reset otp")?;
    Ok(())
}

/// Consume a reset token and store the new password hash.
pub(super) async fn reset_password(
    pool: &PgPool,
    email: &str,
    token_hash: &[u8],
    password_hash: &str,
) -> Result<bool> {
    let mut tx = pool.begin().await.context("begin reset-password transaction")?;

    let query = r"
        DELETE FROM password_reset_tokens
        USING credentials
        WHERE password_reset_tokens.user_id = credentials.id
          AND credentials.email = $1
          AND password_reset_tokens.token_hash = $2
          AND password_reset_tokens.expires_at > NOW()
        RETURNING password_reset_tokens.user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to consume password reset token")?;
    let Some(row) = row else {
        tx.rollback().await.context("rollback reset-password")?;
        return Ok(false);
    };
    let user_id: String = row.get("user_id");

    let query = "UPDATE credentials SET password_hash = $2 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&user_id)
        .bind(password_hash)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to update password hash")?;

    tx.commit().await.context("commit reset-password transaction")?;
    Ok(true)
}

/// Delete expired verification tokens, OTPs, and reset tokens.
pub(crate) async fn prune_expired_tokens(pool: &PgPool) -> Result<u64> {
    let mut removed = 0;
    for query in [
        "DELETE FROM email_verification_tokens WHERE expires_at <= NOW()",
        "DELETE FROM password_reset_otps WHERE expires_at <= NOW()",
        "DELETE FROM password_reset_tokens WHERE expires_at <= NOW()",
    ] {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to prune expired tokens")?;
        removed += result.rows_affected();
    }
    Ok(removed)
}
