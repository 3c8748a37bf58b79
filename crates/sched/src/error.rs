//! Scheduler error types.

use thiserror::Error;

use gantry_queue::QueueError;

#[derive(Debug, Error)]
pub enum SchedError {
    /// A registry lookup raced a queue removal. Call sites swallow this:
    /// the queue simply is not processed this tick.
    #[error("{0} is not a known queue")]
    QueueUnknown(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The consumer did not take the handshake request in time.
    #[error("busy checking consumer, at the stage {stage} handshake")]
    ConsumerBusy { stage: u8 },

    /// The queue's resource hint does not fit the host right now.
    #[error("{key} could not be accommodated: needs {need}; host has {have} (short on {short})")]
    DoesNotFit {
        key: String,
        need: String,
        have: String,
        short: String,
    },

    #[error(transparent)]
    Provider(#[from] QueueError),
}
