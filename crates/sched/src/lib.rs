//! gantry-sched
//!
//! The scheduling core of the gantry compute-job runner: a set of
//! cooperating control loops that discover a project's work queues, rank
//! them least-busy first, admit the ones the host can still accommodate
//! and dispatch admitted queues to a message-pumping worker.
//!
//! - registry: the catalog of known queues and their in-flight counts
//! - backoff: TTL negative-signal cache shared by all loops
//! - producer/consumer: the two halves of the admission handshake
//! - worker: per-queue task pump paired with a liveness watcher
//! - handler: the per-message adapter around the experiment processor
//! - scheduler: assembly and run lifecycle

pub mod backoff;
pub mod clock;
mod consumer;
pub mod error;
pub mod handler;
pub mod host;
mod producer;
pub mod registry;
pub mod scheduler;
mod worker;

pub use backoff::BackoffCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::SchedError;
pub use handler::{HandlerAdapter, Processor, ProcessorError, Verdict};
pub use host::{FixedCapacity, HostCapacity, SystemCapacity};
pub use registry::{QueueSnapshot, Registry};
pub use scheduler::{Scheduler, SchedulerBuilder, SubRequest, Timings};
