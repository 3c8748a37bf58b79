//! The admission side of the handshake.
//!
//! The consumer serializes every admission decision: it is the only place
//! that spawns workers. Probe requests answer the producer's "is anyone
//! listening" check; real requests pass through a final backoff gate and
//! become worker tasks.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::backoff::BackoffCache;
use crate::registry::Registry;
use crate::scheduler::{SubRequest, Timings};
use crate::worker::Worker;

pub(crate) struct Consumer {
    pub(crate) registry: Arc<Registry>,
    pub(crate) backoffs: Arc<BackoffCache>,
    pub(crate) worker: Arc<Worker>,
    pub(crate) timings: Timings,
    /// Tracks worker tasks so shutdown can wait for in-flight work.
    pub(crate) workers: TaskTracker,
}

impl Consumer {
    pub(crate) async fn run(
        self,
        mut requests: mpsc::Receiver<SubRequest>,
        cancel: CancellationToken,
    ) {
        debug!("started checking consumer");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = requests.recv() => {
                    // Channel closed means the producer is gone; stop
                    // handling work.
                    let Some(request) = request else { break };

                    // An empty subscription is the producer checking that
                    // this loop is ready for a scheduling request.
                    if request.is_probe() {
                        continue;
                    }

                    self.filter_work(request, &cancel);
                }
            }
        }

        debug!("completed checking consumer");
    }

    /// Final gate before execution: drop the request if a backoff landed
    /// since the producer's check, then suppress the queue briefly so
    /// other queues get a turn, then hand the queue to a worker task.
    fn filter_work(&self, request: SubRequest, cancel: &CancellationToken) {
        let key = format!("{}:{}", request.project, request.subscription);

        if self.backoffs.live(&key) {
            trace!(key = %key, "backoff on");
            return;
        }
        self.backoffs.set(&key, self.timings.self_suppression);

        let name = request.subscription.clone();
        self.registry.inc_in_flight(&name);

        let worker = self.worker.clone();
        let registry = self.registry.clone();
        let root = cancel.clone();
        self.workers.spawn(async move {
            // A worker panic must not take the consumer loop down, and the
            // in-flight count has to drop no matter how the worker ends.
            let outcome = AssertUnwindSafe(worker.do_work(request, root))
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                warn!(queue = %name, panic = %panic_message(&panic), "panic while working a queue");
            }
            registry.dec_in_flight(&name);
        });
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<opaque panic payload>".to_string()
    }
}
