//! The per-message handler adapter.
//!
//! The task-queue provider calls [`HandlerAdapter::handle`] once per
//! received message. The adapter decodes the experiment request, bridges
//! queue-side cancellation into the processor, and translates the
//! processor's outcome into the consume/redeliver decision the provider
//! needs. The declared resources travel back with the verdict so the
//! registry can pre-reject queues that no longer fit the host.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};
use uuid::Uuid;

use gantry_core::ExperimentRequest;
use gantry_notify::OperatorChannel;
use gantry_queue::parser::parse_payload;
use gantry_queue::provider::{HandlerVerdict, MessageHandler};

/// The processor's judgement about a finished experiment.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verdict {
    /// True removes the message from its queue.
    pub ack: bool,
    /// True opts the event into operator chat notification.
    pub broadcast: bool,
}

/// A processing failure, still carrying the ack decision: `ack == false`
/// asks for redelivery, `ack == true` declares the message permanently
/// failed and dumps it.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ProcessorError {
    pub ack: bool,
    pub broadcast: bool,
    pub reason: String,
}

/// The experiment execution engine. Materializing the experiment,
/// fetching artifacts, running it and uploading results all live behind
/// this seam.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(
        &self,
        cancel: CancellationToken,
        request: ExperimentRequest,
        credentials: String,
    ) -> Result<Verdict, ProcessorError>;
}

pub struct HandlerAdapter {
    processor: Arc<dyn Processor>,
    operator: OperatorChannel,
}

impl HandlerAdapter {
    pub fn new(processor: Arc<dyn Processor>, operator: OperatorChannel) -> Self {
        Self {
            processor,
            operator,
        }
    }
}

#[async_trait]
impl MessageHandler for HandlerAdapter {
    async fn handle(
        &self,
        cancel: CancellationToken,
        project: &str,
        subscription: &str,
        credentials: &str,
        payload: &[u8],
    ) -> HandlerVerdict {
        let key = format!("{project}:{subscription}");
        trace!(key = %key, "msg processing started");

        let request = match parse_payload(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(key = %key, error = %e, "unable to process msg, dumping");
                return HandlerVerdict {
                    resource: None,
                    consume: true,
                };
            }
        };

        // The declared resources are returned no matter how processing
        // ends; the registry wants the hint either way.
        let resource = Some(request.experiment.resource.clone());
        let work_id = Uuid::new_v4();
        let header = format!(
            "{key} project {} experiment {}",
            request.config.database.project_id, request.experiment.key
        );
        let dest = match request.config.runner.slack_dest.as_str() {
            "" => None,
            d => Some(d.to_string()),
        };
        info!(%work_id, header = %header, "started handling");

        // Queue-side cancellation flows into the processor through a child
        // token; timeouts inside the processor are its own business. The
        // processor runs in its own task so a panic is recovered here
        // rather than tearing down the pump.
        let proc_cancel = cancel.child_token();
        let outcome = {
            let processor = self.processor.clone();
            let token = proc_cancel.clone();
            let request = request.clone();
            let credentials = credentials.to_string();
            tokio::spawn(async move { processor.process(token, request, credentials).await }).await
        };
        proc_cancel.cancel();

        let verdict = match outcome {
            Err(join) if join.is_panic() => {
                warn!(%work_id, header = %header, "panic in experiment processor, dumping message");
                HandlerVerdict {
                    resource,
                    consume: true,
                }
            }
            Err(_) => {
                warn!(%work_id, header = %header, "experiment processor task was cancelled, dumping message");
                HandlerVerdict {
                    resource,
                    consume: true,
                }
            }
            Ok(Ok(result)) => {
                if result.broadcast {
                    self.operator
                        .info(dest.as_deref(), format!("{header} stopped"))
                        .await;
                }
                info!(%work_id, header = %header, ack = result.ack, "completed handling");
                HandlerVerdict {
                    resource,
                    consume: result.ack,
                }
            }
            Ok(Err(failure)) => {
                if failure.ack {
                    let text = format!("{header} dumped, due to {failure}");
                    if failure.broadcast {
                        self.operator.warning(dest.as_deref(), text.clone()).await;
                    }
                    warn!(%work_id, "{text}");
                } else {
                    let text = format!("{header} retry due to {failure}");
                    if failure.broadcast {
                        self.operator.info(dest.as_deref(), text.clone()).await;
                    }
                    info!(%work_id, "{text}");
                }
                HandlerVerdict {
                    resource,
                    consume: failure.ack,
                }
            }
        };

        trace!(key = %key, "msg processing completed");
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytesize::ByteSize;
    use gantry_core::Resource;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn payload(cpus: u32, ram_gib: u64) -> Vec<u8> {
        serde_json::json!({
            "experiment": {
                "key": "exp-1",
                "resource": {"cpus": cpus, "ram": format!("{ram_gib}GiB")}
            },
            "config": {
                "database": {"project_id": "ml-lab"},
                "runner": {"slack_dest": ""}
            }
        })
        .to_string()
        .into_bytes()
    }

    struct FixedProcessor {
        result: Result<Verdict, (bool, bool, &'static str)>,
    }

    #[async_trait]
    impl Processor for FixedProcessor {
        async fn process(
            &self,
            _cancel: CancellationToken,
            _request: ExperimentRequest,
            _credentials: String,
        ) -> Result<Verdict, ProcessorError> {
            match &self.result {
                Ok(v) => Ok(*v),
                Err((ack, broadcast, reason)) => Err(ProcessorError {
                    ack: *ack,
                    broadcast: *broadcast,
                    reason: reason.to_string(),
                }),
            }
        }
    }

    fn adapter(result: Result<Verdict, (bool, bool, &'static str)>) -> HandlerAdapter {
        HandlerAdapter::new(
            Arc::new(FixedProcessor { result }),
            OperatorChannel::empty(),
        )
    }

    #[tokio::test]
    async fn success_consumes_per_ack_and_reports_resources() {
        let adapter = adapter(Ok(Verdict {
            ack: true,
            broadcast: false,
        }));
        let verdict = adapter
            .handle(
                CancellationToken::new(),
                "ml-lab",
                "qA",
                "creds",
                &payload(1, 1),
            )
            .await;

        assert!(verdict.consume);
        let resource = verdict.resource.expect("declared resources returned");
        assert_eq!(resource.cpus, 1);
        assert_eq!(resource.ram, ByteSize::gib(1));
    }

    #[tokio::test]
    async fn retryable_failure_redelivers() {
        let adapter = adapter(Err((false, false, "spot instance reclaimed")));
        let verdict = adapter
            .handle(
                CancellationToken::new(),
                "ml-lab",
                "qA",
                "creds",
                &payload(1, 1),
            )
            .await;

        assert!(!verdict.consume);
        assert!(verdict.resource.is_some());
    }

    #[tokio::test]
    async fn permanent_failure_dumps_the_message() {
        let adapter = adapter(Err((true, false, "container image missing")));
        let verdict = adapter
            .handle(
                CancellationToken::new(),
                "ml-lab",
                "qA",
                "creds",
                &payload(1, 1),
            )
            .await;

        assert!(verdict.consume);
    }

    #[tokio::test]
    async fn undecodable_payload_is_poison() {
        let adapter = adapter(Ok(Verdict::default()));
        let verdict = adapter
            .handle(
                CancellationToken::new(),
                "ml-lab",
                "qA",
                "creds",
                b"not an experiment",
            )
            .await;

        assert!(verdict.consume);
        assert!(verdict.resource.is_none());
    }

    struct PanickingProcessor;

    #[async_trait]
    impl Processor for PanickingProcessor {
        async fn process(
            &self,
            _cancel: CancellationToken,
            _request: ExperimentRequest,
            _credentials: String,
        ) -> Result<Verdict, ProcessorError> {
            panic!("processor exploded");
        }
    }

    #[tokio::test]
    async fn processor_panic_is_recovered_and_message_dumped() {
        let adapter = HandlerAdapter::new(
            Arc::new(PanickingProcessor),
            OperatorChannel::empty(),
        );
        let verdict = adapter
            .handle(
                CancellationToken::new(),
                "ml-lab",
                "qA",
                "creds",
                &payload(1, 1),
            )
            .await;

        // A panicking payload is poisonous; resources still travel back.
        assert!(verdict.consume);
        assert!(verdict.resource.is_some());
    }

    struct CancelAwareProcessor {
        saw_cancel: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Processor for CancelAwareProcessor {
        async fn process(
            &self,
            cancel: CancellationToken,
            _request: ExperimentRequest,
            _credentials: String,
        ) -> Result<Verdict, ProcessorError> {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    Err(ProcessorError {
                        ack: false,
                        broadcast: false,
                        reason: "cancelled".into(),
                    })
                }
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(Verdict::default()),
            }
        }
    }

    #[tokio::test]
    async fn queue_cancellation_reaches_the_processor() {
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let adapter = HandlerAdapter::new(
            Arc::new(CancelAwareProcessor {
                saw_cancel: saw_cancel.clone(),
            }),
            OperatorChannel::empty(),
        );

        let queue_side = CancellationToken::new();
        let token = queue_side.clone();
        let join = tokio::spawn(async move {
            adapter
                .handle(token, "ml-lab", "qA", "creds", &payload(1, 1))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue_side.cancel();

        let verdict = tokio::time::timeout(Duration::from_secs(2), join)
            .await
            .expect("handler should return promptly after cancellation")
            .unwrap();

        assert!(saw_cancel.load(Ordering::SeqCst));
        assert!(!verdict.consume, "cancelled work should redeliver");
    }
}
