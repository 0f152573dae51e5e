use crate::api::{
    self, ServerConfig,
    email::{EmailSender, EmailWorkerConfig, LogEmailSender, SmtpEmailSender, SmtpSettings},
    handlers::auth::{AuthConfig, AuthState},
};
use crate::cli::commands::{auth, database, email, server};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Args {
    pub server: server::Options,
    pub database: database::Options,
    pub auth: auth::Options,
    pub email: email::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the SMTP transport cannot be built, the database is
/// unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let dsn = args.database.dsn()?;

    let auth_config = AuthConfig::new(args.server.frontend_base_url.clone())
        .with_access_ttl_seconds(hours_to_seconds(args.auth.access_token_ttl_hours))
        .with_refresh_ttl_seconds(hours_to_seconds(args.auth.refresh_token_ttl_hours))
        .with_verification_token_ttl_seconds(args.auth.verification_token_ttl_seconds)
        .with_cookie_secure(args.auth.cookie_secure)
        .with_bcrypt_cost(args.auth.bcrypt_cost);
    if !auth_config.cookie_secure() && auth_config.frontend_base_url().starts_with("https://") {
        warn!("frontend is served over HTTPS but auth cookies are not marked Secure");
    }
    let auth_state = Arc::new(AuthState::new(auth_config, &args.auth.jwt_secret));

    let sender: Arc<dyn EmailSender> = match (args.email.smtp_username, args.email.smtp_password)
    {
        (Some(username), Some(password)) => {
            info!(host = %args.email.smtp_host, "delivering email over SMTP");
            Arc::new(
                SmtpEmailSender::new(SmtpSettings {
                    host: args.email.smtp_host,
                    port: args.email.smtp_port,
                    username,
                    password,
                    from_email: args.email.from_email,
                    from_name: args.email.from_name,
                })
                .context("Failed to configure SMTP transport")?,
            )
        }
        _ => {
            warn!("SMTP credentials not configured, emails will only be logged");
            Arc::new(LogEmailSender)
        }
    };

    let email_config = EmailWorkerConfig::new()
        .with_poll_interval_seconds(args.email.outbox.poll_seconds)
        .with_batch_size(args.email.outbox.batch_size)
        .with_max_attempts(args.email.outbox.max_attempts)
        .with_backoff_base_seconds(args.email.outbox.backoff_base_seconds)
        .with_backoff_max_seconds(args.email.outbox.backoff_max_seconds);

    let config = ServerConfig::new(args.server.port)
        .with_read_timeout(Duration::from_secs(args.server.read_timeout_seconds))
        .with_write_timeout(Duration::from_secs(args.server.write_timeout_seconds))
        .with_shutdown_timeout(Duration::from_secs(args.server.shutdown_timeout_seconds))
        .with_max_connections(args.database.max_connections)
        .with_token_prune_interval(Duration::from_secs(args.auth.token_prune_interval_seconds));

    debug!(?config, "server configuration");

    api::new(config, dsn, auth_state, sender, email_config).await
}

fn hours_to_seconds(hours: u64) -> i64 {
    i64::try_from(hours.saturating_mul(3600)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::hours_to_seconds;

    #[test]
    fn hours_convert_to_seconds() {
        assert_eq!(hours_to_seconds(24), 86_400);
        assert_eq!(hours_to_seconds(168), 604_800);
        assert_eq!(hours_to_seconds(u64::MAX), i64::MAX);
    }
}
