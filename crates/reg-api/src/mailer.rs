//! # Mailers
//!
//! `Mailer` implementations for confirmation messages:
//! - `LoggingMailer` writes the confirmation to the log (development)
//! - `HttpMailer` posts the snapshot as JSON to a mail relay

use async_trait::async_trait;
use reg_core::{Mailer, MailerError, PackageSnapshot};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

/// Logs confirmations instead of sending them
pub struct LoggingMailer;

#[async_trait]
impl Mailer for LoggingMailer {
    async fn send(&self, recipient: &str, snapshot: &PackageSnapshot) -> Result<(), MailerError> {
        info!(
            recipient = %recipient,
            package_number = %snapshot.package_number,
            registrations = snapshot.registrations.len(),
            total = %snapshot.total_amount,
            "Confirmation (logging mailer)"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}

/// Posts confirmations to a relay that renders and sends the email
pub struct HttpMailer {
    url: String,
    client: Client,
}

#[derive(Serialize)]
struct ConfirmationPayload<'a> {
    template: &'static str,
    recipient: &'a str,
    package: &'a PackageSnapshot,
}

impl HttpMailer {
    pub fn new(url: impl Into<String>) -> Result<Self, MailerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MailerError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, recipient: &str, snapshot: &PackageSnapshot) -> Result<(), MailerError> {
        let payload = ConfirmationPayload {
            template: "package_confirmed",
            recipient,
            package: snapshot,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailerError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!("Mail relay error: {} | {}", status, body);

        if status.is_server_error() || status.as_u16() == 429 {
            Err(MailerError::Transport(format!("relay answered {status}")))
        } else {
            Err(MailerError::Rejected(format!("relay answered {status}: {body}")))
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reg_core::{PackageOwner, PackageStatus};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn snapshot() -> PackageSnapshot {
        PackageSnapshot {
            package_id: Uuid::new_v4(),
            package_number: "PKG-20250114-ABC123".into(),
            owner: PackageOwner {
                user_id: "user-1".into(),
                email: "ana@example.com".into(),
                name: Some("Ana".into()),
            },
            status: PackageStatus::Confirmed,
            total_amount: dec!(150.00),
            payment_method: None,
            payment_id: Some("1319283746".into()),
            registrations: Vec::new(),
            captured_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_http_mailer_posts_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mail"))
            .and(body_partial_json(json!({
                "template": "package_confirmed",
                "recipient": "ana@example.com",
                "package": {"package_number": "PKG-20250114-ABC123", "status": "confirmed"}
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let mailer = HttpMailer::new(format!("{}/mail", server.uri())).unwrap();
        mailer.send("ana@example.com", &snapshot()).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_mailer_classifies_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(400).set_body_string("unknown template"))
            .mount(&server)
            .await;

        let down = HttpMailer::new(format!("{}/down", server.uri())).unwrap();
        assert!(matches!(
            down.send("ana@example.com", &snapshot()).await,
            Err(MailerError::Transport(_))
        ));

        let bad = HttpMailer::new(format!("{}/bad", server.uri())).unwrap();
        assert!(matches!(
            bad.send("ana@example.com", &snapshot()).await,
            Err(MailerError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_logging_mailer_always_succeeds() {
        assert!(LoggingMailer.send("ana@example.com", &snapshot()).await.is_ok());
    }
}
