//! Transactional email outbox.
//!
//! Registration, resend-verification and forgot-password insert a row into
//! `email_outbox` in the same transaction as the account change it announces,
//! so an email is queued if and only if that change commits.
//!
//! [`spawn_outbox_worker`] drains due rows in batches. Each batch is locked with
//! `FOR UPDATE SKIP LOCKED`, so several replicas can run the worker at once.
//! A delivery error reschedules the row according to [`RetryPolicy`]; once the
//! attempts are used up the row is parked as `failed` with the last error.
//!
//! [`SmtpEmailSender`] delivers for real. [`LogEmailSender`] only logs and is
//! used when no SMTP credentials are configured.

pub mod smtp;
pub mod templates;

pub use smtp::{SmtpEmailSender, SmtpSettings};

use anyhow::{Context, Result};
use rand::Rng;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::{future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// One queued email as stored in the outbox.
#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Delivery backend for the outbox worker.
pub trait EmailSender: Send + Sync {
    /// Deliver `message`; an error schedules a retry.
    fn send<'a>(&'a self, message: &'a EmailMessage) -> SendFuture<'a>;
}

#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> SendFuture<'a> {
        Box::pin(async move {
            info!(
                to_email = %message.to_email,
                template = %message.template,
                payload = %message.payload_json,
                "email not sent, SMTP is not configured"
            );
            Ok(())
        })
    }
}

/// Exponential backoff with jitter, bounded by a number of attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound of the wait after the `attempt`-th failure (1-based):
    /// `base * 2^(attempt - 1)`, never above the cap.
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1 << doublings)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Random wait in `[ceiling / 2, ceiling]`, so failed rows spread out.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        if ceiling_ms < 2 {
            return ceiling;
        }
        let floor_ms = ceiling_ms / 2;
        Duration::from_millis(rand::thread_rng().gen_range(floor_ms..=ceiling_ms))
    }
}

/// Outbox worker settings. Zero values are raised to the smallest usable ones.
#[derive(Clone, Copy, Debug)]
pub struct EmailWorkerConfig {
    poll_interval: Duration,
    batch_size: usize,
    retry: RetryPolicy,
}

impl EmailWorkerConfig {
    /// Poll every 5s, 10 rows per batch, 5 attempts, backoff from 5s up to 5m.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            retry: RetryPolicy {
                max_attempts: 5,
                base: Duration::from_secs(5),
                cap: Duration::from_secs(300),
            },
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds.max(1));
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.retry.base = Duration::from_secs(seconds.max(1));
        self.retry.cap = self.retry.cap.max(self.retry.base);
        self
    }

    #[must_use]
    pub fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.retry.cap = Duration::from_secs(seconds).max(self.retry.base);
        self
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What happens to a row after one delivery attempt.
#[derive(Debug, PartialEq)]
enum Delivery {
    Sent,
    Retry { after: Duration, error: String },
    Failed { error: String },
}

impl Delivery {
    /// `attempt` is the 1-based number of the attempt that just ran.
    fn after_attempt(attempt: u32, result: Result<()>, retry: &RetryPolicy) -> Self {
        match result {
            Ok(()) => Self::Sent,
            Err(err) if attempt >= retry.max_attempts() => Self::Failed {
                error: format!("{err:#}"),
            },
            Err(err) => Self::Retry {
                after: retry.delay(attempt),
                error: format!("{err:#}"),
            },
        }
    }

    fn status(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Retry { .. } => "pending",
            Self::Failed { .. } => "failed",
        }
    }

    fn error(&self) -> Option<&str> {
        match self {
            Self::Sent => None,
            Self::Retry { error, .. } | Self::Failed { error } => Some(error),
        }
    }

    fn wait(&self) -> Duration {
        match self {
            Self::Retry { after, .. } => *after,
            Self::Sent | Self::Failed { .. } => Duration::ZERO,
        }
    }
}

/// Spawn the background task that drains the outbox every poll interval.
pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match process_outbox_batch(&pool, sender.as_ref(), &config).await {
                Ok(0) => {}
                Ok(processed) => debug!(processed, "email outbox batch processed"),
                Err(err) => error!("email outbox batch failed: {err:#}"),
            }
        }
    })
}

/// Lock up to `batch_size` due rows, attempt each one, and record the result.
///
/// Returns the number of rows attempted.
///
/// # Errors
/// Returns an error if the batch cannot be loaded or a row cannot be updated.
/// Delivery errors are stored on the row, not returned.
pub async fn process_outbox_batch(
    pool: &PgPool,
    sender: &dyn EmailSender,
    config: &EmailWorkerConfig,
) -> Result<usize> {
    let mut tx = pool.begin().await.context("failed to begin outbox batch")?;

    let query = r"
        SELECT id, to_email, template, payload_json::text AS payload_json, attempts
        FROM email_outbox
        WHERE status = 'pending' AND next_attempt_at <= NOW()
        ORDER BY next_attempt_at, created_at
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size()).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to load outbox batch")?;

    let attempted = rows.len();
    for row in rows {
        let id: Uuid = row.try_get("id")?;
        let previous: i32 = row.try_get("attempts")?;
        let attempt = u32::try_from(previous).unwrap_or(0).saturating_add(1);
        let message = EmailMessage {
            to_email: row.try_get("to_email")?,
            template: row.try_get("template")?,
            payload_json: row.try_get("payload_json")?,
        };

        let delivery =
            Delivery::after_attempt(attempt, sender.send(&message).await, config.retry());
        match &delivery {
            Delivery::Sent => {}
            Delivery::Retry { after, error } => warn!(
                outbox_id = %id,
                template = %message.template,
                attempt,
                retry_in = ?after,
                "email delivery failed: {error}"
            ),
            Delivery::Failed { error } => error!(
                outbox_id = %id,
                template = %message.template,
                attempt,
                "email delivery gave up: {error}"
            ),
        }
        record_delivery(&mut tx, id, attempt, &delivery).await?;
    }

    tx.commit().await.context("failed to commit outbox batch")?;
    Ok(attempted)
}

async fn record_delivery(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    attempt: u32,
    delivery: &Delivery,
) -> Result<()> {
    let query = r"
        UPDATE email_outbox
        SET status = $2::email_outbox_status,
            attempts = $3,
            last_error = $4,
            sent_at = CASE WHEN $2::text = 'sent' THEN NOW() END,
            next_attempt_at = NOW() + $5 * INTERVAL '1 second'
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .bind(delivery.status())
        .bind(i32::try_from(attempt).unwrap_or(i32::MAX))
        .bind(delivery.error())
        .bind(delivery.wait().as_secs_f64())
        .execute(&mut **tx)
        .instrument(span)
        .await
        .with_context(|| format!("failed to mark outbox row {id} as {}", delivery.status()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn builders_raise_zero_values() {
        let config = EmailWorkerConfig::new()
            .with_poll_interval_seconds(0)
            .with_batch_size(0)
            .with_max_attempts(0)
            .with_backoff_base_seconds(0)
            .with_backoff_max_seconds(0);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.batch_size(), 1);
        assert_eq!(config.retry().max_attempts(), 1);
        assert_eq!(config.retry().ceiling(1), Duration::from_secs(1));
        assert_eq!(config.retry().ceiling(9), Duration::from_secs(1));
    }

    #[test]
    fn ceiling_doubles_until_capped() {
        let retry = *EmailWorkerConfig::new().retry();
        assert_eq!(retry.ceiling(1), Duration::from_secs(5));
        assert_eq!(retry.ceiling(2), Duration::from_secs(10));
        assert_eq!(retry.ceiling(3), Duration::from_secs(20));
        assert_eq!(retry.ceiling(7), Duration::from_secs(300));
        assert_eq!(retry.ceiling(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn delay_stays_between_half_and_full_ceiling() {
        let retry = *EmailWorkerConfig::new().retry();
        for attempt in 1..=8 {
            let ceiling = retry.ceiling(attempt);
            let delay = retry.delay(attempt);
            assert!(delay <= ceiling, "attempt {attempt}: {delay:?}");
            assert!(delay >= ceiling / 2, "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn failures_retry_until_attempts_run_out() {
        let retry = *EmailWorkerConfig::new().with_max_attempts(3).retry();

        assert_eq!(Delivery::after_attempt(1, Ok(()), &retry), Delivery::Sent);

        let second = Delivery::after_attempt(2, Err(anyhow!("421 try later")), &retry);
        assert_eq!(second.status(), "pending");
        assert_eq!(second.error(), Some("421 try later"));
        assert!(second.wait() >= Duration::from_secs(5));

        let third = Delivery::after_attempt(3, Err(anyhow!("550 mailbox unavailable")), &retry);
        assert_eq!(third.status(), "failed");
        assert_eq!(third.wait(), Duration::ZERO);
    }

    #[tokio::test]
    async fn log_sender_accepts_any_message() -> Result<()> {
        let message = EmailMessage {
            to_email: "juan@up.edu.ph".to_string(),
            template: templates::VERIFY_EMAIL_TEMPLATE.to_string(),
            payload_json: "{}".to_string(),
        };
        LogEmailSender.send(&message).await
    }
}
