//! Notification Sink
//!
//! Renders one composite message per cycle, grouped by alert class, and
//! delivers it with a single outbound call.

mod format;
mod webhook;

pub use format::{format_message, format_price, WebhookMessage, COLOR_DRAWDOWN, COLOR_MIXED, COLOR_TARGET};
pub use webhook::WebhookNotifier;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("no webhook URL configured (set DISCORD_WEBHOOK_URL or notify.webhook_url)")]
    MissingWebhook,
    #[error("webhook returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("webhook request failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::Transport(e.to_string())
    }
}

/// Outbound delivery of a rendered message
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, message: &WebhookMessage) -> Result<(), NotifyError>;
}
