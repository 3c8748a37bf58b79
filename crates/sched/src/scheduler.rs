//! Scheduler assembly and run lifecycle.
//!
//! [`Scheduler::run`] wires the registry, the backoff cache and the
//! handshake channel together, spawns the consumer, the producer and the
//! backoff sweeper, and drives the queue refresher inline. It returns when
//! the root token is cancelled or when a refresh fails fatally; either way
//! every in-flight worker has returned by the time it does.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use gantry_notify::OperatorChannel;
use gantry_queue::provider::{MessageHandler, TaskQueue};

use crate::backoff::BackoffCache;
use crate::clock::{Clock, SystemClock};
use crate::consumer::Consumer;
use crate::error::SchedError;
use crate::handler::{HandlerAdapter, Processor};
use crate::host::HostCapacity;
use crate::producer::Producer;
use crate::registry::Registry;
use crate::worker::Worker;

/// The handshake token between producer and consumer.
///
/// A probe (empty subscription) asks "are you listening"; a real request
/// names the queue to process and carries the provider credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubRequest {
    pub project: String,
    pub subscription: String,
    pub creds: String,
}

impl SubRequest {
    pub fn probe() -> Self {
        Self::default()
    }

    pub fn is_probe(&self) -> bool {
        self.subscription.is_empty()
    }
}

/// Every interval and bound the control loops run on. Production uses
/// [`Timings::default`]; tests shrink what they need.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Delay before the first queue refresh.
    pub refresh_initial: Duration,
    /// Interval between refreshes after the first.
    pub refresh_interval: Duration,
    /// Bound on one provider refresh call.
    pub refresh_timeout: Duration,
    /// Producer tick.
    pub produce_interval: Duration,
    /// Most queues offered to the consumer per tick.
    pub max_dispatch: usize,
    /// Bound on the stage-2 handshake send.
    pub dispatch_timeout: Duration,
    /// Backoff applied to a queue whose check failed.
    pub check_backoff: Duration,
    /// Backoff applied on admission so other queues get a turn.
    pub self_suppression: Duration,
    /// Cooldown kept fresh while a queue's work is alive.
    pub cooldown: Duration,
    /// Interval between queue existence probes.
    pub liveness_interval: Duration,
    /// Bound on one existence probe.
    pub probe_timeout: Duration,
    /// Provider-side receive timeout inside `work`.
    pub work_timeout: Duration,
    /// Backoff cache sweep interval.
    pub sweep_interval: Duration,
    /// Idle time before the no-work advisory fires.
    pub idle_warning_after: Duration,
    /// Re-arm interval between repeated no-work advisories.
    pub idle_warning_rearm: Duration,
    /// Throttle on queue-count debug logging.
    pub queue_debug_every: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            refresh_initial: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(60),
            refresh_timeout: Duration::from_secs(2),
            produce_interval: Duration::from_secs(15),
            max_dispatch: 8,
            dispatch_timeout: Duration::from_secs(2),
            check_backoff: Duration::from_secs(60),
            self_suppression: Duration::from_secs(10),
            cooldown: Duration::from_secs(300),
            liveness_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(2),
            work_timeout: Duration::from_secs(2),
            sweep_interval: Duration::from_secs(10),
            idle_warning_after: Duration::from_secs(3600),
            idle_warning_rearm: Duration::from_secs(600),
            queue_debug_every: Duration::from_secs(600),
        }
    }
}

/// Builder for the pieces that have useful defaults.
pub struct SchedulerBuilder {
    project: String,
    credentials: String,
    timings: Timings,
    rng_seed: Option<u64>,
    clock: Arc<dyn Clock>,
    operator: OperatorChannel,
}

impl SchedulerBuilder {
    pub fn new(project: impl Into<String>, credentials: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            credentials: credentials.into(),
            timings: Timings::default(),
            rng_seed: None,
            clock: Arc::new(SystemClock),
            operator: OperatorChannel::empty(),
        }
    }

    pub fn timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Fix the shuffle seed. Without this every scheduler instance seeds
    /// its own RNG, which keeps replicas from admitting in lockstep.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn operator(mut self, operator: OperatorChannel) -> Self {
        self.operator = operator;
        self
    }

    /// Assemble the scheduler around its collaborators: the task-queue
    /// provider, the experiment processor and the host capacity sampler.
    pub fn build(
        self,
        tasker: Arc<dyn TaskQueue>,
        processor: Arc<dyn Processor>,
        host: Arc<dyn HostCapacity>,
    ) -> Scheduler {
        let handler: Arc<dyn MessageHandler> =
            Arc::new(HandlerAdapter::new(processor, self.operator.clone()));
        Scheduler {
            project: self.project,
            credentials: self.credentials,
            registry: Arc::new(Registry::new()),
            backoffs: Arc::new(BackoffCache::new(self.clock.clone())),
            tasker,
            host,
            handler,
            operator: self.operator,
            clock: self.clock,
            timings: self.timings,
            rng_seed: self.rng_seed,
        }
    }
}

pub struct Scheduler {
    project: String,
    credentials: String,
    registry: Arc<Registry>,
    backoffs: Arc<BackoffCache>,
    tasker: Arc<dyn TaskQueue>,
    host: Arc<dyn HostCapacity>,
    handler: Arc<dyn MessageHandler>,
    operator: OperatorChannel,
    clock: Arc<dyn Clock>,
    timings: Timings,
    rng_seed: Option<u64>,
}

impl Scheduler {
    /// The queue catalog, shared with the control loops.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// The backoff cache, shared with the control loops.
    pub fn backoffs(&self) -> Arc<BackoffCache> {
        self.backoffs.clone()
    }

    /// Run the scheduler until `cancel` fires or a refresh fails fatally
    /// (bad credentials, missing project).
    ///
    /// All workers have returned by the time this resolves, so process
    /// exit may proceed immediately afterwards.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SchedError> {
        let inner = cancel.child_token();
        let (requests_tx, requests_rx) = mpsc::channel(1);
        let workers = TaskTracker::new();

        let sweeper = tokio::spawn(
            self.backoffs
                .clone()
                .run_sweeper(self.timings.sweep_interval, inner.clone()),
        );

        let worker = Arc::new(Worker {
            registry: self.registry.clone(),
            backoffs: self.backoffs.clone(),
            tasker: self.tasker.clone(),
            handler: self.handler.clone(),
            timings: self.timings.clone(),
        });
        let consumer = Consumer {
            registry: self.registry.clone(),
            backoffs: self.backoffs.clone(),
            worker,
            timings: self.timings.clone(),
            workers: workers.clone(),
        };
        let consumer_handle = tokio::spawn(consumer.run(requests_rx, inner.clone()));

        let producer = Producer {
            project: self.project.clone(),
            creds: self.credentials.clone(),
            registry: self.registry.clone(),
            backoffs: self.backoffs.clone(),
            host: self.host.clone(),
            clock: self.clock.clone(),
            operator: self.operator.clone(),
            timings: self.timings.clone(),
            requests: requests_tx,
            rng: match self.rng_seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
        };
        let producer_handle = tokio::spawn(producer.run(inner.clone()));

        let result = self.refresh_loop(&inner).await;

        // Tear down in dependency order: no new admissions, then wait for
        // every in-flight worker before handing control back.
        inner.cancel();
        let _ = producer_handle.await;
        let _ = consumer_handle.await;
        let _ = sweeper.await;
        workers.close();
        workers.wait().await;

        result
    }

    async fn refresh_loop(&self, cancel: &CancellationToken) -> Result<(), SchedError> {
        let mut delay = self.timings.refresh_initial;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {
                    self.refresh().await?;
                    delay = self.timings.refresh_interval;
                }
            }
        }
    }

    /// Bring the registry up to date with the queues the provider can
    /// currently see. Diffs are reported once; an unchanged catalog is
    /// silent.
    ///
    /// Only fatal provider errors propagate; a transient refresh failure
    /// is logged and the stale catalog stands until the next tick.
    async fn refresh(&self) -> Result<(), SchedError> {
        let known = match self.tasker.refresh(self.timings.refresh_timeout).await {
            Ok(known) => known,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(project = %self.project, error = %e, "queue refresh failed, retrying next tick");
                return Ok(());
            }
        };
        let (added, removed) = self.registry.align(&known);

        if added.is_empty() && removed.is_empty() {
            return Ok(());
        }

        let mut parts = Vec::new();
        if !added.is_empty() {
            parts.push(format!("added queues {}", added.join(", ")));
        }
        if !removed.is_empty() {
            parts.push(format!("removed queues {}", removed.join(", ")));
        }
        let text = format!("project {} {}", self.project, parts.join(", and "));

        info!("{text}");
        self.operator.info(None, text).await;
        Ok(())
    }
}
