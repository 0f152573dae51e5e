//! Subject and HTML body for each outbox template.
//!
//! Outbox rows carry only the template name and a JSON payload; rendering
//! happens at delivery time so retried rows pick up template fixes.

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub const VERIFY_EMAIL_TEMPLATE: &str = "verify_email";
pub const PASSWORD_RESET_OTP_TEMPLATE: &str = "password_reset_otp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Deserialize)]
struct VerifyEmailPayload {
    first_name: String,
    verify_url: String,
}

#[derive(Debug, Deserialize)]
struct PasswordResetOtpPayload {
    first_name: String,
    otp: String,
    expires_minutes: i64,
}

/// Render `template` with its JSON payload.
///
/// # Errors
/// Returns an error for unknown templates or payloads missing required fields.
pub fn render(template: &str, payload_json: &str) -> Result<RenderedEmail> {
    match template {
        VERIFY_EMAIL_TEMPLATE => {
            let payload: VerifyEmailPayload = serde_json::from_str(payload_json)
                .context("invalid verify_email payload")?;
            Ok(verify_email(&payload))
        }
        PASSWORD_RESET_OTP_TEMPLATE => {
            let payload: PasswordResetOtpPayload = serde_json::from_str(payload_json)
                .context("invalid password_reset_otp payload")?;
            Ok(password_reset_otp(&payload))
        }
        other => bail!("unknown email template: {other}"),
    }
}

fn verify_email(payload: &VerifyEmailPayload) -> RenderedEmail {
    let name = escape_html(&payload.first_name);
    let url = escape_html(&payload.verify_url);
    RenderedEmail {
        subject: "Verify your ISKOnnect account".to_string(),
        html: format!(
            "<p>Hi {name},</p>\
             <p>Welcome to ISKOnnect! Confirm your email address to activate your account:</p>\
             <p><a href=\"{url}\">Verify my email</a></p>\
             <p>If the button does not work, copy this link into your browser:<br>{url}</p>\
             <p>This link expires in 24 hours. If you did not sign up, ignore this email.</p>"
        ),
    }
}

fn password_reset_otp(payload: &PasswordResetOtpPayload) -> RenderedEmail {
    let name = escape_html(&payload.first_name);
    let otp = escape_html(&payload.otp);
    let minutes = payload.expires_minutes;
    RenderedEmail {
        subject: "ISKOnnect password reset code".to_string(),
        html: format!(
            "<p>Hi {name},</p>\
             <p>Use this code to reset your ISKOnnect password:</p>\
             <p style=\"font-size:24px;letter-spacing:4px\"><strong>{otp}</strong></p>\
             <p>The code expires in {minutes} minutes. If you did not request a reset, ignore this email.</p>"
        ),
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verify_email_includes_link() -> Result<()> {
        let payload = json!({
            "first_name": "Juan",
            "verify_url": "http://localhost:3000/verify-email?token=abc",
        });
        let rendered = render(VERIFY_EMAIL_TEMPLATE, &payload.to_string())?;
        assert_eq!(rendered.subject, "Verify your ISKOnnect account");
        assert!(rendered.html.contains("Hi Juan,"));
        assert!(
            rendered
                .html
                .contains("href=\"http://localhost:3000/verify-email?token=abc\"")
        );
        Ok(())
    }

    #[test]
    fn reset_code_mentions_expiry() -> Result<()> {
        let payload = json!({"first_name": "Maria", "otp": "042917", "expires_minutes": 15});
        let rendered = render(PASSWORD_RESET_OTP_TEMPLATE, &payload.to_string())?;
        assert_eq!(rendered.subject, "ISKOnnect password reset code");
        assert!(rendered.html.contains("042917"));
        assert!(rendered.html.contains("expires in 15 minutes"));
        Ok(())
    }

    #[test]
    fn names_are_escaped() -> Result<()> {
        let payload = json!({"first_name": "<b>Jo</b>", "otp": "123456", "expires_minutes": 15});
        let rendered = render(PASSWORD_RESET_OTP_TEMPLATE, &payload.to_string())?;
        assert!(rendered.html.contains("Hi &lt;b&gt;Jo&lt;/b&gt;,"));
        Ok(())
    }

    #[test]
    fn unknown_template_and_bad_payload_fail() {
        assert!(render("welcome", "{}").is_err());
        assert!(render(VERIFY_EMAIL_TEMPLATE, r#"{"first_name":"Juan"}"#).is_err());
    }
}
