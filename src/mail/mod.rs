//! Outbound transactional email.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

#[derive(Debug, Error)]
pub enum MailError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Mail provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Email {
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}

impl Email {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: vec![to.into()],
            subject: subject.into(),
            text: text.into(),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Sends through the Resend HTTP API.
pub struct ResendMailer {
    http: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(api_key: String, from: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            from,
        }
    }
}

#[derive(Serialize)]
struct ResendPayload<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    text: &'a str,
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let payload = ResendPayload {
            from: &self.from,
            to: &email.to,
            subject: &email.subject,
            text: &email.text,
        };
        let response = self
            .http
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        info!("Email '{}' sent to {:?}", email.subject, email.to);
        Ok(())
    }
}

/// Logs instead of sending. Used when no provider key is configured.
#[derive(Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        warn!(
            "Mail provider not configured; dropping '{}' to {:?}",
            email.subject, email.to
        );
        Ok(())
    }
}

pub fn mailer_from_config() -> Arc<dyn Mailer> {
    let mail = &config::config().mail;
    match &mail.resend_api_key {
        Some(key) if !key.is_empty() => Arc::new(ResendMailer::new(key.clone(), mail.from_address.clone())),
        _ => Arc::new(LogMailer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_mailer_accepts_everything() {
        let email = Email::new("owner@example.com", "Invoice", "Your invoice is ready");
        assert!(LogMailer.send(&email).await.is_ok());
    }

    #[test]
    fn resend_payload_shape() {
        let email = Email::new("a@example.com", "Hi", "Body");
        let payload = ResendPayload {
            from: "noreply@example.com",
            to: &email.to,
            subject: &email.subject,
            text: &email.text,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["to"][0], "a@example.com");
        assert_eq!(json["from"], "noreply@example.com");
    }
}
