//! Discord-compatible webhook delivery

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use super::{NotificationSink, NotifyError, WebhookMessage};
use crate::config::NotifyConfig;

pub struct WebhookNotifier {
    client: Client,
    webhook_url: Option<String>,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print the URL, it carries the webhook token
        f.debug_struct("WebhookNotifier")
            .field("configured", &self.webhook_url.is_some())
            .finish()
    }
}

impl WebhookNotifier {
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cryptoalert/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            webhook_url: webhook_url.filter(|url| !url.trim().is_empty()),
        })
    }

    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        Self::new(
            config.webhook_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, message: &WebhookMessage) -> Result<(), NotifyError> {
        let url = self.webhook_url.as_deref().ok_or(NotifyError::MissingWebhook)?;

        debug!(title = %message.title, "Posting webhook message");
        let response = self
            .client
            .post(url)
            .json(&message.to_payload())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Http {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        info!(status = status.as_u16(), title = %message.title, "📨 Notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_webhook_fails_without_network() {
        let notifier = WebhookNotifier::new(Some("  ".to_string()), Duration::from_secs(1)).unwrap();
        assert!(!notifier.is_configured());

        let message = WebhookMessage {
            title: "t".to_string(),
            color: 0,
            description: String::new(),
            footer: String::new(),
            username: "bot".to_string(),
        };
        assert_eq!(
            notifier.deliver(&message).await,
            Err(NotifyError::MissingWebhook)
        );
    }

    #[test]
    fn debug_output_hides_url() {
        let notifier = WebhookNotifier::new(
            Some("https://discord.com/api/webhooks/1/secret".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        let printed = format!("{:?}", notifier);
        assert!(!printed.contains("secret"));
        assert!(printed.contains("configured: true"));
    }
}
