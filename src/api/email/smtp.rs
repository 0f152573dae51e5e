//! SMTP delivery with STARTTLS via `lettre`.

use anyhow::{Context, Result};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::info;

use super::{EmailMessage, EmailSender, SendFuture, templates};

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_email: String,
    pub from_name: String,
}

pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl std::fmt::Debug for SmtpEmailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpEmailSender")
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl SmtpEmailSender {
    /// Build a pooled STARTTLS transport. No connection is made until the
    /// first message is sent.
    ///
    /// # Errors
    /// Returns an error if the relay host or the sender address is invalid.
    pub fn new(settings: SmtpSettings) -> Result<Self> {
        let from = Mailbox::new(
            Some(settings.from_name),
            settings
                .from_email
                .parse()
                .with_context(|| format!("invalid sender address: {}", settings.from_email))?,
        );
        let credentials = Credentials::new(
            settings.username,
            settings.password.expose_secret().to_string(),
        );
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .with_context(|| format!("invalid SMTP relay: {}", settings.host))?
            .port(settings.port)
            .credentials(credentials)
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        Ok(Self { transport, from })
    }

    fn build_message(&self, message: &EmailMessage) -> Result<Message> {
        let rendered = templates::render(&message.template, &message.payload_json)?;
        let to: Mailbox = message
            .to_email
            .parse()
            .with_context(|| format!("invalid recipient address: {}", message.to_email))?;
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(rendered.subject)
            .header(ContentType::TEXT_HTML)
            .body(rendered.html)
            .context("failed to build email message")
    }
}

impl EmailSender for SmtpEmailSender {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> SendFuture<'a> {
        Box::pin(async move {
            let email = self.build_message(message)?;
            self.transport
                .send(email)
                .await
                .context("SMTP delivery failed")?;
            info!(template = %message.template, "email delivered");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            username: "no-reply@iskonnect.com".to_string(),
            password: SecretString::from("app-password"),
            from_email: "no-reply@iskonnect.com".to_string(),
            from_name: "ISKOnnect".to_string(),
        }
    }

    #[test]
    fn rejects_bad_sender_address() {
        let mut bad = settings();
        bad.from_email = "not an address".to_string();
        assert!(SmtpEmailSender::new(bad).is_err());
    }

    #[tokio::test]
    async fn builds_html_message_without_connecting() -> Result<()> {
        let sender = SmtpEmailSender::new(settings())?;
        let message = EmailMessage {
            to_email: "juan@up.edu.ph".to_string(),
            template: templates::PASSWORD_RESET_OTP_TEMPLATE.to_string(),
            payload_json: r#"{"first_name":"Juan","otp":"123456","expires_minutes":15}"#
                .to_string(),
        };
        let built = sender.build_message(&message)?;
        let raw = String::from_utf8(built.formatted())?;
        assert!(raw.contains("Subject: ISKOnnect password reset code"));
        assert!(raw.contains("Content-Type: text/html"));
        assert!(raw.contains("To: juan@up.edu.ph"));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_template_fails_before_delivery() -> Result<()> {
        let sender = SmtpEmailSender::new(settings())?;
        let message = EmailMessage {
            to_email: "juan@up.edu.ph".to_string(),
            template: "newsletter".to_string(),
            payload_json: "{}".to_string(),
        };
        assert!(sender.send(&message).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn debug_hides_transport() -> Result<()> {
        let sender = SmtpEmailSender::new(settings())?;
        let rendered = format!("{sender:?}");
        assert!(rendered.contains("ISKOnnect"));
        assert!(!rendered.contains("app-password"));
        Ok(())
    }
}
