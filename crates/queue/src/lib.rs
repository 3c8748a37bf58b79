pub mod error;
pub mod memory;
pub mod parser;
pub mod provider;

pub use error::QueueError;
pub use memory::InMemoryTaskQueue;
pub use parser::parse_payload;
pub use provider::{HandlerVerdict, MessageHandler, TaskQueue, WorkReport};
