//! The envelope exchanged between contexts.

use crate::error::ActorError;
use bytes::Bytes;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const RESPONSE: &str = "<response>";
pub const CANCEL: &str = "<cancel>";

const ID_LEN: usize = 10;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque token pairing a request with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Ten random base-36 characters.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let id: String = (0..ID_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Request(String),
    Response,
    Cancel,
}

impl MessageKind {
    /// Wire name: the operation name, `"<response>"` or `"<cancel>"`.
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Request(name) => name,
            MessageKind::Response => RESPONSE,
            MessageKind::Cancel => CANCEL,
        }
    }

    pub fn from_wire(name: &str) -> Self {
        match name {
            RESPONSE => MessageKind::Response,
            CANCEL => MessageKind::Cancel,
            other => MessageKind::Request(other.to_string()),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured data plus binary buffers that move with the message.
///
/// Buffers are reference-counted [`Bytes`]; handing one to a payload moves
/// the handle, never the backing storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub data: serde_json::Value,
    pub buffers: Vec<Bytes>,
}

impl Payload {
    pub fn new(data: serde_json::Value) -> Self {
        Self { data, buffers: Vec::new() }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, ActorError> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    pub fn with_buffer(mut self, buffer: impl Into<Bytes>) -> Self {
        self.buffers.push(buffer.into());
        self
    }

    /// Deserializes the structured part.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ActorError> {
        Ok(T::deserialize(&self.data)?)
    }

    pub fn buffer(&self, index: usize) -> Result<&Bytes, ActorError> {
        self.buffers
            .get(index)
            .ok_or_else(|| ActorError::Payload(format!("missing buffer {index}")))
    }
}

/// Scheduling hints carried with a request; they never alter the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub kind: String,
    pub priority: i8,
}

impl TaskMetadata {
    pub fn new(kind: impl Into<String>, priority: i8) -> Self {
        Self { kind: kind.into(), priority }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: CorrelationId,
    pub kind: MessageKind,
    pub has_callback: bool,
    pub must_queue: bool,
    pub metadata: TaskMetadata,
    pub payload: Payload,
    pub error: Option<ActorError>,
}

impl Message {
    pub fn request(id: CorrelationId, name: &str, payload: Payload) -> Self {
        Self {
            id,
            kind: MessageKind::Request(name.to_string()),
            has_callback: false,
            must_queue: false,
            metadata: TaskMetadata::new(name, 0),
            payload,
            error: None,
        }
    }

    pub fn response(id: CorrelationId, result: Result<Payload, ActorError>) -> Self {
        let (payload, error) = match result {
            Ok(p) => (p, None),
            Err(e) => (Payload::empty(), Some(e)),
        };
        Self {
            id,
            kind: MessageKind::Response,
            has_callback: false,
            must_queue: false,
            metadata: TaskMetadata::default(),
            payload,
            error,
        }
    }

    pub fn cancel(id: CorrelationId) -> Self {
        Self {
            id,
            kind: MessageKind::Cancel,
            has_callback: false,
            must_queue: false,
            metadata: TaskMetadata::default(),
            payload: Payload::empty(),
            error: None,
        }
    }

    /// Exactly one of error or result.
    pub fn into_result(self) -> Result<Payload, ActorError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.payload),
        }
    }
}
