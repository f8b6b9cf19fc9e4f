//! # Error Types
//!
//! Error taxonomy shared by every context.
//!
//! | Class | Variants | Policy |
//! |-------|----------|--------|
//! | Transient | `Unavailable`, `ChannelUnavailable` | retried by the retry scheduler |
//! | Disconnected | `ChannelClosed` | every pending id on the channel rejected, not retried |
//! | Protocol | `Protocol` | envelope dropped and logged, never delivered |
//! | Application | `Application` | passed through opaquely to the caller |

use thiserror::Error;

use crate::envelope::{CorrelationId, Payload};

/// Defects in a received envelope.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Envelope is not a JSON object")]
    NotAnObject,

    #[error("Envelope has no kind")]
    MissingKind,

    #[error("Unknown envelope kind: {0}")]
    UnknownKind(String),

    #[error("Envelope has no correlation id")]
    MissingCorrelationId,

    #[error("Unsupported version {version} (supported: {min}-{max})")]
    UnsupportedVersion { version: u64, min: u16, max: u16 },

    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error("Unexpected {kind} envelope for {correlation_id}")]
    UnexpectedKind {
        kind: String,
        correlation_id: CorrelationId,
    },
}

/// Errors surfaced by the transport to callers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// Receiving context is not ready (e.g. worker asleep).
    #[error("Receiving end unavailable: {reason}")]
    Unavailable { reason: String },

    /// No live channel is registered for the service.
    #[error("Channel unavailable: {service}")]
    ChannelUnavailable { service: String },

    #[error("Channel already registered: {service}")]
    AlreadyRegistered { service: String },

    /// Channel torn down while the request was in flight.
    #[error("Channel closed: {service}")]
    ChannelClosed { service: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error reported by the remote handler, passed through untouched.
    #[error("Application error: {0}")]
    Application(Payload),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<TransportError>,
    },

    #[error("No stream item within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Request {0} already in flight")]
    DuplicateRequest(CorrelationId),

    #[error("Origin not approved: {origin}")]
    Unauthorized { origin: String },

    /// The host-attested sender origin differs from the one the channel
    /// name claims, or the host attested none.
    #[error(
        "Origin mismatch: {} claimed {claimed}",
        .sender.as_deref().unwrap_or("unattested sender")
    )]
    Unauthenticated {
        sender: Option<String>,
        claimed: String,
    },

    #[error("Invalid channel name: {0}")]
    InvalidChannelName(#[from] ChannelNameError),

    /// A session with the same channel id is already open.
    #[error("Session collision: {0}")]
    DuplicateSession(String),

    #[error("Request aborted")]
    Aborted,
}

impl TransportError {
    /// Whether the retry scheduler should try again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Unavailable { .. } | TransportError::ChannelUnavailable { .. }
        )
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        TransportError::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn channel_closed(service: impl Into<String>) -> Self {
        TransportError::ChannelClosed {
            service: service.into(),
        }
    }
}

/// Errors from parsing an untrusted channel name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelNameError {
    #[error("Expected 3 or 4 space-delimited fields, found {found}")]
    WrongFieldCount { found: usize },

    #[error("Unknown channel label: {0}")]
    UnknownLabel(String),

    #[error("Invalid channel id: {0}")]
    InvalidId(String),

    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),

    #[error("Invalid type name: {0}")]
    InvalidTypeName(String),
}
