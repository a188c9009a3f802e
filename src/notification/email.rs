use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{EmailMessage, NotificationSender};
use crate::config::MailConfig;

// ── Provider Payload ──────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailBody {
    sender: EmailAddress,
    to: Vec<EmailAddress>,
    subject: String,
    html_content: String,
    text_content: String,
}

// ── HTTP Mailer ───────────────────────────────────────────────

/// Sends email through a transactional-email HTTP API (JSON body with
/// `sender`, `to`, `subject`, `htmlContent`, `textContent`; key in `api-key`).
///
/// Each message is attempted up to 3 times with back-off (0s → 1s → 5s).
/// Without an API configured, `send` fails and `is_configured` is `false`.
#[derive(Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    config: Option<MailConfig>,
    backoff: Vec<Duration>,
}

impl HttpMailer {
    pub fn new(config: Option<MailConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Incubator-Mailer/1.0")
            .build()?;
        Ok(Self {
            client,
            config,
            backoff: vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(5),
            ],
        })
    }

    /// Override the retry schedule. The first entry is the delay before the
    /// first attempt.
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        if !backoff.is_empty() {
            self.backoff = backoff;
        }
        self
    }

    fn body(config: &MailConfig, message: &EmailMessage) -> SendEmailBody {
        SendEmailBody {
            sender: EmailAddress {
                email: config.sender_email.clone(),
                name: config.sender_name.clone(),
            },
            to: vec![EmailAddress {
                email: message.to.clone(),
                name: None,
            }],
            subject: message.subject.clone(),
            html_content: message.html_body.clone(),
            text_content: message.text_body.clone(),
        }
    }
}

#[async_trait]
impl NotificationSender for HttpMailer {
    fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let Some(config) = &self.config else {
            warn!(
                to = %message.to,
                subject = %message.subject,
                "no mail API configured, email not sent"
            );
            anyhow::bail!("no mail API configured");
        };

        let body = Self::body(config, message);

        for (attempt, delay) in self.backoff.iter().enumerate() {
            if !delay.is_zero() {
                debug!(
                    to = %message.to,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying email delivery"
                );
                tokio::time::sleep(*delay).await;
            }

            let result = self
                .client
                .post(&config.api_url)
                .header("api-key", &config.api_key)
                .header("accept", "application/json")
                .json(&body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    info!(to = %message.to, attempt, "email delivered");
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    warn!(
                        to = %message.to,
                        attempt,
                        status = %status,
                        body = %text,
                        "email API returned non-2xx"
                    );
                    // Client errors won't get better by retrying.
                    if status.is_client_error() && status.as_u16() != 429 {
                        anyhow::bail!("email API rejected message: status={}", status);
                    }
                }
                Err(e) => {
                    warn!(to = %message.to, attempt, error = %e, "email request error");
                }
            }
        }

        Err(anyhow::anyhow!(
            "email delivery to {} failed after {} attempts",
            message.to,
            self.backoff.len()
        ))
    }
}
