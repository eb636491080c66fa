use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure delivered to a caller's callback. Never thrown out of `send`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ActorError {
    #[error("Could not find function {0}")]
    HandlerNotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Handler(String),

    #[error("payload error: {0}")]
    Payload(String),

    #[error("call canceled")]
    Canceled,
}

impl From<serde_json::Error> for ActorError {
    fn from(e: serde_json::Error) -> Self {
        ActorError::Payload(e.to_string())
    }
}
