//! Notifier trait definition and shared error types.

use chrono::{DateTime, Utc};

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("delivery rejected: {0}")]
    Delivery(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Advisory severity, mirrored into the delivered payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

/// A notification ready for delivery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Notification {
    pub severity: Severity,
    /// The message text shown to the operator.
    pub text: String,
    /// Optional per-experiment destination (e.g. a chat channel declared
    /// in the experiment request); channels without a destination concept
    /// may ignore it.
    pub dest: Option<String>,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn info(text: impl Into<String>, dest: Option<String>) -> Self {
        Self {
            severity: Severity::Info,
            text: text.into(),
            dest,
            at: Utc::now(),
        }
    }

    pub fn warning(text: impl Into<String>, dest: Option<String>) -> Self {
        Self {
            severity: Severity::Warning,
            text: text.into(),
            dest,
            at: Utc::now(),
        }
    }
}

/// Trait for notification channel implementations.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification through this channel.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Human-readable name for this channel (e.g., "webhook").
    fn channel_name(&self) -> &str;
}
