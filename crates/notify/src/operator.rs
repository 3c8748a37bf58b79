//! Fan-out of advisory events to the configured operator channels.
//!
//! The scheduler reports queue arrivals/removals, idle-runner warnings and
//! dumped messages through this type. Delivery is strictly advisory:
//! individual channel failures are logged and never block the scheduler or
//! other channels.

use std::sync::Arc;

use crate::traits::{Notification, Notifier};

/// Routes notifications to every configured channel.
#[derive(Clone, Default)]
pub struct OperatorChannel {
    channels: Vec<Arc<dyn Notifier>>,
}

impl OperatorChannel {
    /// A channel-less operator sink; every notification becomes a log line
    /// only.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_channels(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self { channels }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Deliver an informational advisory.
    pub async fn info(&self, dest: Option<&str>, text: impl Into<String>) {
        self.dispatch(Notification::info(text, dest.map(str::to_string)))
            .await;
    }

    /// Deliver a warning advisory.
    pub async fn warning(&self, dest: Option<&str>, text: impl Into<String>) {
        self.dispatch(Notification::warning(text, dest.map(str::to_string)))
            .await;
    }

    async fn dispatch(&self, notification: Notification) {
        if self.channels.is_empty() {
            tracing::debug!(text = %notification.text, "no operator channels configured");
            return;
        }

        for channel in &self.channels {
            match channel.send(&notification).await {
                Ok(()) => {
                    tracing::debug!(
                        channel = channel.channel_name(),
                        text = %notification.text,
                        "operator notification delivered"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        channel = channel.channel_name(),
                        error = %e,
                        text = %notification.text,
                        "operator notification failed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{NotifyError, Severity};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockNotifier {
        name: String,
        sent: Arc<Mutex<Vec<Notification>>>,
        failures: AtomicUsize,
        should_fail: bool,
    }

    #[async_trait::async_trait]
    impl Notifier for MockNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            if self.should_fail {
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(NotifyError::Delivery("mock failure".into()));
            }
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }

        fn channel_name(&self) -> &str {
            &self.name
        }
    }

    #[tokio::test]
    async fn delivers_to_all_channels() {
        let sent_a = Arc::new(Mutex::new(Vec::new()));
        let sent_b = Arc::new(Mutex::new(Vec::new()));
        let operator = OperatorChannel::with_channels(vec![
            Arc::new(MockNotifier {
                name: "a".into(),
                sent: sent_a.clone(),
                failures: AtomicUsize::new(0),
                should_fail: false,
            }),
            Arc::new(MockNotifier {
                name: "b".into(),
                sent: sent_b.clone(),
                failures: AtomicUsize::new(0),
                should_fail: false,
            }),
        ]);

        operator.info(None, "queue qA added").await;

        assert_eq!(sent_a.lock().unwrap().len(), 1);
        assert_eq!(sent_b.lock().unwrap().len(), 1);
        assert_eq!(sent_a.lock().unwrap()[0].severity, Severity::Info);
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_block_others() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let operator = OperatorChannel::with_channels(vec![
            Arc::new(MockNotifier {
                name: "broken".into(),
                sent: Arc::new(Mutex::new(Vec::new())),
                failures: AtomicUsize::new(0),
                should_fail: true,
            }),
            Arc::new(MockNotifier {
                name: "healthy".into(),
                sent: sent.clone(),
                failures: AtomicUsize::new(0),
                should_fail: false,
            }),
        ]);

        operator
            .warning(Some("#lab-alerts"), "no work for an hour")
            .await;

        let delivered = sent.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].severity, Severity::Warning);
        assert_eq!(delivered[0].dest.as_deref(), Some("#lab-alerts"));
    }

    #[tokio::test]
    async fn empty_operator_is_silent() {
        let operator = OperatorChannel::empty();
        assert!(operator.is_empty());
        operator.info(None, "nothing listens").await;
    }
}
