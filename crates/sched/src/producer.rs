//! The producer half of the admission handshake.
//!
//! Every tick the producer snapshots the registry ranking, keeps the idle
//! queues that are not backed off, shuffles that band for fairness, caps
//! it to bound provider-side query rate, and offers each survivor to the
//! consumer. The rank gives work to the least-loaded queues first; the
//! shuffle keeps queues that share a count from starving each other.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use gantry_notify::OperatorChannel;

use crate::backoff::BackoffCache;
use crate::clock::Clock;
use crate::error::SchedError;
use crate::host::HostCapacity;
use crate::registry::{QueueSnapshot, Registry};
use crate::scheduler::{SubRequest, Timings};

pub(crate) struct Producer {
    pub(crate) project: String,
    pub(crate) creds: String,
    pub(crate) registry: Arc<Registry>,
    pub(crate) backoffs: Arc<BackoffCache>,
    pub(crate) host: Arc<dyn HostCapacity>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) operator: OperatorChannel,
    pub(crate) timings: Timings,
    pub(crate) requests: mpsc::Sender<SubRequest>,
    pub(crate) rng: StdRng,
}

impl Producer {
    pub(crate) async fn run(mut self, cancel: CancellationToken) {
        debug!("started queue checking producer");

        let mut tick = tokio::time::interval(self.timings.produce_interval);

        // Idle-runner bookkeeping: last_ready re-arms every warning so the
        // advisory repeats at the re-arm cadence, last_ready_abs never
        // moves so the advisory can say how long it has really been.
        let now = self.clock.now();
        let mut last_ready = now;
        let mut last_ready_abs = now;

        // Queue-count debug logging, throttled.
        let mut next_queue_debug = now;
        let mut last_queue_count = 0usize;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let ranked = self.registry.rank();

                    if self.clock.now() >= next_queue_debug
                        || ranked.len() != last_queue_count
                    {
                        last_queue_count = ranked.len();
                        next_queue_debug =
                            self.clock.now() + self.timings.queue_debug_every;
                        if ranked.is_empty() {
                            debug!(project = %self.project, "no subscriptions found");
                        } else {
                            debug!(
                                project = %self.project,
                                count = ranked.len(),
                                "processing ranked subscriptions"
                            );
                        }
                    }

                    let picked = select_ready(
                        &ranked,
                        &self.project,
                        &self.backoffs,
                        &mut self.rng,
                        self.timings.max_dispatch,
                    );

                    for name in picked {
                        match self.check(&name).await {
                            Ok(()) => {
                                last_ready = self.clock.now();
                                last_ready_abs = self.clock.now();
                            }
                            Err(e) => {
                                let key = format!("{}:{}", self.project, name);
                                self.backoffs.set(&key, self.timings.check_backoff);
                                warn!(
                                    key,
                                    error = %e,
                                    backoff = ?self.timings.check_backoff,
                                    "checking for work failed"
                                );
                                // One failed check ends the tick; the rest
                                // of the batch waits for the next pass.
                                break;
                            }
                        }
                    }

                    if self.clock.now().duration_since(last_ready)
                        > self.timings.idle_warning_after
                    {
                        last_ready += self.timings.idle_warning_rearm;
                        let idle_for =
                            self.clock.now().duration_since(last_ready_abs);
                        let text = format!(
                            "no work has been requested by this system for {}s, \
                             please check for disk space etc resource availability",
                            idle_for.as_secs()
                        );
                        warn!(project = %self.project, "{text}");
                        self.operator.warning(None, text).await;
                    }
                }
            }
        }

        debug!("completed queue checking producer");
    }

    /// Validate one candidate and offer it to the consumer.
    ///
    /// Stage 1 is a non-blocking probe: if nobody is listening, fail
    /// immediately rather than spin. Stage 2 offers the real request with
    /// a bounded wait. Between the stages sit the removal-race lookup and
    /// the capacity gate.
    async fn check(&self, name: &str) -> Result<(), SchedError> {
        let key = format!("{}:{}", self.project, name);

        if self.requests.try_send(SubRequest::probe()).is_err() {
            return Err(SchedError::ConsumerBusy { stage: 1 });
        }

        let hint = self.registry.lookup(name)?;

        if let Some(need) = hint {
            let have = self.host.sample();
            if !need.fits(&have) {
                let short = need.shortfall(&have).join(", ");
                return Err(SchedError::DoesNotFit {
                    key,
                    need: need.to_string(),
                    have: have.to_string(),
                    short,
                });
            }
            trace!(key = %key, "passed capacity check");
        } else {
            trace!(key = %key, "skipped capacity check");
        }

        let request = SubRequest {
            project: self.project.clone(),
            subscription: name.to_string(),
            creds: self.creds.clone(),
        };
        match tokio::time::timeout(self.timings.dispatch_timeout, self.requests.send(request))
            .await
        {
            Ok(Ok(())) => Ok(()),
            _ => Err(SchedError::ConsumerBusy { stage: 2 }),
        }
    }
}

/// The tick's candidate selection: idle and not backed off, shuffled
/// (Fisher–Yates via [`SliceRandom::shuffle`]), capped.
pub(crate) fn select_ready(
    ranked: &[QueueSnapshot],
    project: &str,
    backoffs: &BackoffCache,
    rng: &mut StdRng,
    cap: usize,
) -> Vec<String> {
    let mut ready: Vec<&QueueSnapshot> = ranked
        .iter()
        .filter(|q| q.in_flight == 0 && !backoffs.live(&format!("{project}:{}", q.name)))
        .collect();

    ready.shuffle(rng);
    ready.truncate(cap);
    ready.into_iter().map(|q| q.name.clone()).collect()
}
