//! Operator chat notifications.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable notification channels
//! - A JSON webhook notifier implementation
//! - `OperatorChannel`, a fan-out used by the scheduler for advisory
//!   events (queue added/removed, no-work warnings, dumped messages)

pub mod operator;
pub mod traits;
pub mod webhook;

pub use operator::OperatorChannel;
pub use traits::{Notification, Notifier, NotifyError, Severity};
pub use webhook::WebhookNotifier;
