//! Parse queue message payloads into [`ExperimentRequest`]s.

use gantry_core::ExperimentRequest;

use crate::error::QueueError;

/// Decode a raw message payload.
///
/// The payload is a JSON document owned by the submitting client; only the
/// experiment key, declared resources, database project and chat
/// destination are required by the runner, and unknown fields pass through
/// untouched. A payload that does not decode is poisonous — callers dump
/// it rather than letting it redeliver forever.
pub fn parse_payload(payload: &[u8]) -> Result<ExperimentRequest, QueueError> {
    serde_json::from_slice(payload)
        .map_err(|e| QueueError::Parse(format!("experiment request did not decode: {e}")))
}
