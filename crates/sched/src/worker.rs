//! The per-queue worker: a task pump paired with a liveness watcher.
//!
//! One `do_work` call owns one admitted queue. The pump drives the
//! provider's blocking `work` loop; the watcher probes for the queue's
//! continued existence and revokes the work mid-flight when the queue has
//! been deleted (deletion is how operators stop a runner's work). Both
//! halves share a worker token that is a child of the scheduler root, so
//! process shutdown tears the pair down the same way.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use gantry_queue::provider::{MessageHandler, TaskQueue};

use crate::backoff::BackoffCache;
use crate::error::SchedError;
use crate::registry::Registry;
use crate::scheduler::{SubRequest, Timings};

pub(crate) struct Worker {
    pub(crate) registry: Arc<Registry>,
    pub(crate) backoffs: Arc<BackoffCache>,
    pub(crate) tasker: Arc<dyn TaskQueue>,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) timings: Timings,
}

impl Worker {
    /// Process one admitted queue until the provider has nothing more to
    /// give, the queue disappears, or the scheduler shuts down.
    ///
    /// The worker token is always cancelled before this returns, so the
    /// watcher can never outlive its pump.
    pub(crate) async fn do_work(&self, request: SubRequest, root: CancellationToken) {
        let key = format!("{}:{}", request.project, request.subscription);
        trace!(key = %key, "started checking");

        let cancel = root.child_token();

        let pump = {
            let tasker = self.tasker.clone();
            let registry = self.registry.clone();
            let handler = self.handler.clone();
            let token = cancel.clone();
            let subscription = request.subscription.clone();
            let key = key.clone();
            let work_timeout = self.timings.work_timeout;

            tokio::spawn(async move {
                trace!(key = %key, timeout = ?work_timeout, "started task pump");

                // Blocking receive loop; max_jobs 0 lets the provider hand
                // over as many jobs as the machine can hold.
                let outcome = tasker
                    .work(token.clone(), work_timeout, &subscription, 0, handler)
                    .await;

                // Work has returned one way or the other; release the
                // liveness watcher.
                token.cancel();

                match outcome {
                    Err(e) => {
                        warn!(key = %key, error = %e, "msg receive failed");
                    }
                    Ok(report) => {
                        info!(key = %key, processed = report.processed, "work pass completed");

                        // Remember the most recently seen resource request
                        // as the queue's hint for the next admission pass.
                        if let Some(resource) = report.last_resource {
                            match registry.set_resource(&subscription, resource) {
                                Ok(()) => {}
                                Err(SchedError::QueueUnknown(_)) => {
                                    // Queue removed mid-flight; the hint
                                    // goes with it.
                                    info!(key = %key, "queue no longer tracked, resource hint dropped");
                                }
                                Err(e) => {
                                    info!(key = %key, error = %e, "resources not updated");
                                }
                            }
                        }
                    }
                }

                trace!(key = %key, "completed task pump");
            })
        };

        self.watch_liveness(&key, &request.subscription, &cancel)
            .await;

        // Idempotent; the success path cancels here too so the pump's
        // provider call unwinds promptly.
        cancel.cancel();
        if let Err(join) = pump.await {
            if join.is_panic() {
                warn!(key = %key, "panic in task pump");
            }
        }

        trace!(key = %key, "completed checking");
    }

    /// Periodically confirm the queue still exists while work is under
    /// way. A vanished queue cancels the worker token; a healthy probe
    /// keeps extending the cooldown so the queue stays suppressed for a
    /// while after its work completes.
    async fn watch_liveness(&self, key: &str, subscription: &str, cancel: &CancellationToken) {
        let mut probe = tokio::time::interval(self.timings.liveness_interval);
        // The opening tick fires immediately; the first real probe should
        // land one interval in.
        probe.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = probe.tick() => {
                    let checked = tokio::time::timeout(
                        self.timings.probe_timeout,
                        self.tasker.exists(cancel, subscription),
                    )
                    .await;

                    match checked {
                        Err(_) => {
                            info!(key = %key, "existence probe timed out");
                        }
                        Ok(Err(e)) => {
                            info!(key = %key, error = %e, "could not be validated");
                        }
                        Ok(Ok(false)) => {
                            warn!(key = %key, "no longer found, cancelling running tasks");
                            cancel.cancel();
                            return;
                        }
                        Ok(Ok(true)) => {
                            self.backoffs.set(key, self.timings.cooldown);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use gantry_core::Resource;
    use gantry_queue::provider::{HandlerVerdict, WorkReport};
    use gantry_queue::QueueError;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_timings() -> Timings {
        Timings {
            work_timeout: Duration::from_millis(20),
            liveness_interval: Duration::from_millis(10),
            probe_timeout: Duration::from_millis(50),
            cooldown: Duration::from_secs(300),
            ..Timings::default()
        }
    }

    struct NoopHandler;

    #[async_trait]
    impl MessageHandler for NoopHandler {
        async fn handle(
            &self,
            _cancel: CancellationToken,
            _project: &str,
            _subscription: &str,
            _credentials: &str,
            _payload: &[u8],
        ) -> HandlerVerdict {
            HandlerVerdict {
                resource: None,
                consume: true,
            }
        }
    }

    /// Provider whose `work` blocks until cancelled and whose `exists`
    /// answer can be flipped mid-test.
    struct ScriptedQueue {
        exists: AtomicBool,
        exists_probes: AtomicU32,
        report: WorkReport,
    }

    #[async_trait]
    impl TaskQueue for ScriptedQueue {
        async fn refresh(&self, _timeout: Duration) -> Result<HashSet<String>, QueueError> {
            Ok(HashSet::new())
        }

        async fn exists(
            &self,
            _cancel: &CancellationToken,
            _subscription: &str,
        ) -> Result<bool, QueueError> {
            self.exists_probes.fetch_add(1, Ordering::SeqCst);
            Ok(self.exists.load(Ordering::SeqCst))
        }

        async fn work(
            &self,
            cancel: CancellationToken,
            _timeout: Duration,
            _subscription: &str,
            _max_jobs: u32,
            _handler: Arc<dyn MessageHandler>,
        ) -> Result<WorkReport, QueueError> {
            cancel.cancelled().await;
            Ok(self.report.clone())
        }
    }

    fn worker_with(tasker: Arc<dyn TaskQueue>) -> (Worker, Arc<Registry>, Arc<BackoffCache>) {
        let registry = Arc::new(Registry::new());
        let backoffs = Arc::new(BackoffCache::new(Arc::new(ManualClock::new())));
        let worker = Worker {
            registry: registry.clone(),
            backoffs: backoffs.clone(),
            tasker,
            handler: Arc::new(NoopHandler),
            timings: fast_timings(),
        };
        (worker, registry, backoffs)
    }

    fn request() -> SubRequest {
        SubRequest {
            project: "ml-lab".into(),
            subscription: "qA".into(),
            creds: "creds".into(),
        }
    }

    #[tokio::test]
    async fn vanished_queue_cancels_the_pump() {
        let tasker = Arc::new(ScriptedQueue {
            exists: AtomicBool::new(false),
            exists_probes: AtomicU32::new(0),
            report: WorkReport::default(),
        });
        let (worker, _registry, _backoffs) = worker_with(tasker.clone());

        let root = CancellationToken::new();
        tokio::time::timeout(Duration::from_secs(2), worker.do_work(request(), root))
            .await
            .expect("worker should unwind once the queue vanishes");

        assert!(tasker.exists_probes.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn healthy_probe_extends_the_cooldown() {
        let tasker = Arc::new(ScriptedQueue {
            exists: AtomicBool::new(true),
            exists_probes: AtomicU32::new(0),
            report: WorkReport::default(),
        });
        let (worker, _registry, backoffs) = worker_with(tasker.clone());

        let root = CancellationToken::new();
        let stop = root.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            stop.cancel();
        });

        tokio::time::timeout(Duration::from_secs(2), worker.do_work(request(), root))
            .await
            .expect("worker should unwind on root cancellation");
        join.await.unwrap();

        assert!(
            backoffs.live("ml-lab:qA"),
            "cooldown should be in place while work was alive"
        );
    }

    #[tokio::test]
    async fn last_resource_hint_lands_in_the_registry() {
        let hint = Resource {
            cpus: 2,
            ..Resource::default()
        };
        let tasker = Arc::new(ScriptedQueue {
            exists: AtomicBool::new(false),
            exists_probes: AtomicU32::new(0),
            report: WorkReport {
                processed: 1,
                last_resource: Some(hint.clone()),
            },
        });
        let (worker, registry, _backoffs) = worker_with(tasker);
        registry.align(&HashSet::from(["qA".to_string()]));

        tokio::time::timeout(
            Duration::from_secs(2),
            worker.do_work(request(), CancellationToken::new()),
        )
        .await
        .expect("worker should unwind");

        assert_eq!(registry.get_resource("qA"), Some(hint));
    }

    #[tokio::test]
    async fn hint_for_a_removed_queue_is_swallowed() {
        let tasker = Arc::new(ScriptedQueue {
            exists: AtomicBool::new(false),
            exists_probes: AtomicU32::new(0),
            report: WorkReport {
                processed: 1,
                last_resource: Some(Resource {
                    cpus: 1,
                    ..Resource::default()
                }),
            },
        });
        // Registry never learns about qA: set_resource returns
        // QueueUnknown and the worker must not propagate it.
        let (worker, registry, _backoffs) = worker_with(tasker);

        tokio::time::timeout(
            Duration::from_secs(2),
            worker.do_work(request(), CancellationToken::new()),
        )
        .await
        .expect("worker should unwind cleanly");

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn root_cancellation_bounds_worker_shutdown() {
        let tasker = Arc::new(ScriptedQueue {
            exists: AtomicBool::new(true),
            exists_probes: AtomicU32::new(0),
            report: WorkReport::default(),
        });
        let (worker, _registry, _backoffs) = worker_with(tasker);

        let root = CancellationToken::new();
        let token = root.clone();
        let join = tokio::spawn(async move { worker.do_work(request(), token).await });

        root.cancel();
        tokio::time::timeout(Duration::from_millis(500), join)
            .await
            .expect("cancellation should unwind the worker quickly")
            .unwrap();
    }
}
