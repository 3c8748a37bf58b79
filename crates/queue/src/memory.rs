//! In-memory task-queue driver.
//!
//! Used by the test suites and by the runner's local development mode.
//! Queues live in a mutex-guarded map; `work` behaves like a cloud
//! provider's blocking receive loop, including cancellation and the
//! no-message timeout.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::QueueError;
use crate::provider::{MessageHandler, TaskQueue, WorkReport};

/// Delay before a not-consumed message becomes visible again, standing in
/// for a provider's visibility timeout.
const REDELIVERY_DELAY: Duration = Duration::from_millis(20);

pub struct InMemoryTaskQueue {
    project: String,
    credentials: String,
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    arrivals: Notify,
}

impl InMemoryTaskQueue {
    pub fn new(project: impl Into<String>, credentials: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            credentials: credentials.into(),
            queues: Mutex::new(HashMap::new()),
            arrivals: Notify::new(),
        }
    }

    /// Register a queue. Idempotent; existing messages are kept.
    pub fn create_queue(&self, name: &str) {
        let mut queues = self.queues.lock().unwrap();
        queues.entry(name.to_string()).or_default();
    }

    /// Drop a queue and any messages still parked on it.
    pub fn delete_queue(&self, name: &str) {
        let mut queues = self.queues.lock().unwrap();
        queues.remove(name);
    }

    /// Enqueue a raw payload.
    pub fn publish(&self, name: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        {
            let mut queues = self.queues.lock().unwrap();
            let queue = queues
                .get_mut(name)
                .ok_or_else(|| QueueError::NotFound(name.to_string()))?;
            queue.push_back(payload);
        }
        // notify_one stores a permit, so a publish that lands between a
        // worker's empty pop and its wait still wakes it.
        self.arrivals.notify_one();
        Ok(())
    }

    /// Number of messages currently parked on a queue.
    pub fn depth(&self, name: &str) -> Option<usize> {
        let queues = self.queues.lock().unwrap();
        queues.get(name).map(|q| q.len())
    }

    fn pop(&self, name: &str) -> Result<Option<Vec<u8>>, QueueError> {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues
            .get_mut(name)
            .ok_or_else(|| QueueError::NotFound(name.to_string()))?;
        Ok(queue.pop_front())
    }

    fn park(&self, name: &str, payload: Vec<u8>) {
        let mut queues = self.queues.lock().unwrap();
        // Queue may have been deleted while the handler ran; the message
        // goes with it.
        if let Some(queue) = queues.get_mut(name) {
            queue.push_back(payload);
        }
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn refresh(&self, _timeout: Duration) -> Result<HashSet<String>, QueueError> {
        let queues = self.queues.lock().unwrap();
        Ok(queues.keys().cloned().collect())
    }

    async fn exists(
        &self,
        _cancel: &CancellationToken,
        subscription: &str,
    ) -> Result<bool, QueueError> {
        let queues = self.queues.lock().unwrap();
        Ok(queues.contains_key(subscription))
    }

    async fn work(
        &self,
        cancel: CancellationToken,
        timeout: Duration,
        subscription: &str,
        max_jobs: u32,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<WorkReport, QueueError> {
        let mut report = WorkReport::default();

        loop {
            if cancel.is_cancelled() {
                return Ok(report);
            }

            match self.pop(subscription)? {
                Some(payload) => {
                    let verdict = handler
                        .handle(
                            cancel.child_token(),
                            &self.project,
                            subscription,
                            &self.credentials,
                            &payload,
                        )
                        .await;

                    report.processed += 1;
                    if verdict.resource.is_some() {
                        report.last_resource = verdict.resource;
                    }

                    if !verdict.consume {
                        debug!(subscription, "message not consumed, parking for redelivery");
                        self.park(subscription, payload);
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(report),
                            _ = tokio::time::sleep(REDELIVERY_DELAY) => {}
                        }
                    }

                    if max_jobs != 0 && report.processed >= u64::from(max_jobs) {
                        return Ok(report);
                    }
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(report),
                        _ = self.arrivals.notified() => {}
                        _ = tokio::time::sleep(timeout) => return Ok(report),
                    }
                }
            }
        }
    }
}
