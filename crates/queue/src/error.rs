//! Queue provider error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("message parse error: {0}")]
    Parse(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("queue not found: {0}")]
    NotFound(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("project not found: {0}")]
    UnknownProject(String),

    #[error("provider error: {0}")]
    Provider(String),
}

impl QueueError {
    /// Fatal errors cannot be retried: the process is expected to exit
    /// non-zero rather than keep polling with credentials that will never
    /// work. Everything else is transient and retried on the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueueError::Auth(_) | QueueError::UnknownProject(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_missing_project_are_fatal() {
        assert!(QueueError::Auth("bad token".into()).is_fatal());
        assert!(QueueError::UnknownProject("ml-lab".into()).is_fatal());
        assert!(!QueueError::Connection("reset".into()).is_fatal());
        assert!(!QueueError::Timeout(2000).is_fatal());
        assert!(!QueueError::NotFound("qA".into()).is_fatal());
    }
}
