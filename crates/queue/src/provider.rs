//! Task-queue provider and message-handler traits.
//!
//! Implementations handle the specifics of enumerating queues, receiving
//! messages and acknowledging them for a particular cloud provider. The
//! scheduler core only ever sees these traits.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use gantry_core::Resource;

use crate::error::QueueError;

/// What one blocking [`TaskQueue::work`] call accomplished.
#[derive(Debug, Clone, Default)]
pub struct WorkReport {
    /// Number of messages handed to the handler.
    pub processed: u64,
    /// Resource declaration of the most recently handled message, if any.
    /// Feeds the queue's resource hint for cheap pre-rejection.
    pub last_resource: Option<Resource>,
}

/// The handler's decision about a single message.
#[derive(Debug, Clone, Default)]
pub struct HandlerVerdict {
    /// Resources the message declared, if it could be decoded.
    pub resource: Option<Resource>,
    /// True removes the message from the queue; false lets the provider
    /// redeliver it.
    pub consume: bool,
}

/// Invoked by the provider once per received message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        cancel: CancellationToken,
        project: &str,
        subscription: &str,
        credentials: &str,
        payload: &[u8],
    ) -> HandlerVerdict;
}

/// A task-queue provider scoped to one project's credentials.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// List all queues visible to the configured project. Bounded by
    /// `timeout`; a slow provider surfaces [`QueueError::Timeout`].
    async fn refresh(&self, timeout: Duration) -> Result<HashSet<String>, QueueError>;

    /// Existence probe for a single queue.
    async fn exists(
        &self,
        cancel: &CancellationToken,
        subscription: &str,
    ) -> Result<bool, QueueError>;

    /// Blocking receive loop for one queue. Calls `handler` once per
    /// message and returns when no message arrives within `timeout`, when
    /// `cancel` fires, or on a provider failure. After cancellation the
    /// call must return within `timeout`. `max_jobs == 0` means "as many
    /// jobs as the machine can hold".
    async fn work(
        &self,
        cancel: CancellationToken,
        timeout: Duration,
        subscription: &str,
        max_jobs: u32,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<WorkReport, QueueError>;
}
