//! # Message Envelope
//!
//! The universal wrapper for every message that crosses a channel.
//!
//! ## Lifecycle per correlation id
//!
//! ```text
//! request ──→ streamChunk* ──→ response | streamEnd | streamAbort
//! ```
//!
//! Exactly one `request` opens a correlation id. Any number of `streamChunk`
//! envelopes may follow, and exactly one terminal envelope closes it.
//!
//! ## Wire Form
//!
//! ```json
//! {"version":1,"kind":"streamChunk","correlationId":"abc","payload":{"encoding":"json","data":1}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::ProtocolError;

/// Protocol version written into every outgoing envelope.
pub const PROTOCOL_VERSION: u16 = 1;
pub const MIN_SUPPORTED_VERSION: u16 = 1;
pub const MAX_SUPPORTED_VERSION: u16 = 1;

/// Opaque token linking a request to its response or stream.
///
/// Generated by the caller. Any non-empty string is accepted on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh id (UUID v4 text).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Discriminates the five envelope kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvelopeKind {
    Request,
    Response,
    StreamChunk,
    StreamEnd,
    StreamAbort,
}

impl EnvelopeKind {
    pub const ALL: [EnvelopeKind; 5] = [
        EnvelopeKind::Request,
        EnvelopeKind::Response,
        EnvelopeKind::StreamChunk,
        EnvelopeKind::StreamEnd,
        EnvelopeKind::StreamAbort,
    ];

    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::Request => "request",
            EnvelopeKind::Response => "response",
            EnvelopeKind::StreamChunk => "streamChunk",
            EnvelopeKind::StreamEnd => "streamEnd",
            EnvelopeKind::StreamAbort => "streamAbort",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// `response`, `streamEnd` and `streamAbort` close a correlation id.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EnvelopeKind::Response | EnvelopeKind::StreamEnd | EnvelopeKind::StreamAbort
        )
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque payload carried by an envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "camelCase")]
pub enum Payload {
    #[default]
    Empty,
    Json(Value),
    Binary(Vec<u8>),
}

impl Payload {
    #[must_use]
    pub fn json(value: impl Into<Value>) -> Self {
        Payload::Json(value.into())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    /// The JSON value, if this is a JSON payload.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => f.write_str("<empty>"),
            Payload::Json(value) => write!(f, "{value}"),
            Payload::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

fn default_version() -> u16 {
    PROTOCOL_VERSION
}

/// The envelope itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Protocol version. Absent on the wire means the current version.
    #[serde(default = "default_version")]
    pub version: u16,
    pub kind: EnvelopeKind,
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub payload: Payload,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, correlation_id: CorrelationId, payload: Payload) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            correlation_id,
            payload,
        }
    }

    pub fn request(correlation_id: CorrelationId, payload: Payload) -> Self {
        Self::new(EnvelopeKind::Request, correlation_id, payload)
    }

    pub fn response(correlation_id: CorrelationId, payload: Payload) -> Self {
        Self::new(EnvelopeKind::Response, correlation_id, payload)
    }

    pub fn chunk(correlation_id: CorrelationId, payload: Payload) -> Self {
        Self::new(EnvelopeKind::StreamChunk, correlation_id, payload)
    }

    pub fn end(correlation_id: CorrelationId) -> Self {
        Self::new(EnvelopeKind::StreamEnd, correlation_id, Payload::Empty)
    }

    /// Abort carries either an application error or nothing (caller cancel).
    pub fn abort(correlation_id: CorrelationId, reason: Payload) -> Self {
        Self::new(EnvelopeKind::StreamAbort, correlation_id, reason)
    }

    /// Encode to the JSON value posted on a channel.
    pub fn encode(&self) -> Result<Value, ProtocolError> {
        serde_json::to_value(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Decode a JSON value received from a channel.
    ///
    /// Structural checks run before full deserialization so that the error
    /// names the actual defect (missing id, unknown kind, bad version).
    pub fn decode(value: &Value) -> Result<Self, ProtocolError> {
        let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;

        match object.get("kind") {
            None => return Err(ProtocolError::MissingKind),
            Some(Value::String(kind)) if EnvelopeKind::from_wire(kind).is_some() => {}
            Some(other) => {
                return Err(ProtocolError::UnknownKind(
                    other.as_str().map_or_else(|| other.to_string(), str::to_string),
                ))
            }
        }

        match object.get("correlationId") {
            Some(Value::String(id)) if !id.is_empty() => {}
            _ => return Err(ProtocolError::MissingCorrelationId),
        }

        if let Some(version) = object.get("version") {
            let version = version
                .as_u64()
                .ok_or_else(|| ProtocolError::Malformed("version is not an integer".into()))?;
            if version < u64::from(MIN_SUPPORTED_VERSION)
                || version > u64::from(MAX_SUPPORTED_VERSION)
            {
                return Err(ProtocolError::UnsupportedVersion {
                    version,
                    min: MIN_SUPPORTED_VERSION,
                    max: MAX_SUPPORTED_VERSION,
                });
            }
        }

        Envelope::deserialize(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn decode_str(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Self::decode(&value)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}
