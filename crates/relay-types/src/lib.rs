//! # Relay Types Crate
//!
//! Wire-level types shared by the page, content-script and background
//! contexts of the relay.
//!
//! ## Design Principles
//!
//! - **JSON at the boundary**: everything that crosses a host channel is a
//!   `serde_json::Value`. Envelopes are encoded to and decoded from JSON only.
//! - **Opaque payloads**: the transport never interprets a `Payload`; it only
//!   routes it by correlation id.
//! - **Untrusted names**: channel names are produced by arbitrary scripts and
//!   must be parsed with `ChannelName::parse` before being acted upon.

pub mod channel_name;
pub mod envelope;
pub mod errors;

pub use channel_name::{ChannelLabel, ChannelName};
pub use envelope::{
    CorrelationId, Envelope, EnvelopeKind, Payload, MAX_SUPPORTED_VERSION, MIN_SUPPORTED_VERSION,
    PROTOCOL_VERSION,
};
pub use errors::{ChannelNameError, ProtocolError, TransportError};
