//! TTL negative-signal cache.
//!
//! An entry's presence means "do not poll this queue until the entry
//! expires"; absence never implies readiness. The cache is handed to every
//! loop explicitly rather than living in a global, and reads time through
//! [`Clock`] so tests can expire entries without sleeping.
//!
//! Expiry is lazy on read; the background sweeper only reclaims memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::clock::Clock;

pub struct BackoffCache {
    entries: Mutex<HashMap<String, Instant>>,
    clock: Arc<dyn Clock>,
}

impl BackoffCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Insert or extend the entry for `key`. The new expiry always wins,
    /// even when it is earlier than the current one.
    pub fn set(&self, key: &str, ttl: Duration) {
        let expires = self.clock.now() + ttl;
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), expires);
    }

    /// Whether a live (unexpired) entry exists for `key`.
    pub fn live(&self, key: &str) -> bool {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .is_some_and(|expires| *expires > self.clock.now())
    }

    /// Drop expired entries.
    pub fn sweep(&self) {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, expires| *expires > now);
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Periodic sweep loop; exits when `cancel` fires.
    pub async fn run_sweeper(self: Arc<Self>, every: Duration, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tick.tick() => {
                    self.sweep();
                    trace!(entries = self.len(), "backoff cache swept");
                }
            }
        }
    }
}
