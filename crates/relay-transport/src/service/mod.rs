//! # Service Layer
//!
//! - `client`: caller side (page or extension context)
//! - `stream`: caller-side view of one in-flight call
//! - `session`: background side, serving requests per session

pub mod client;
pub mod session;
pub mod stream;

pub use client::{RelayClient, RelayClientBuilder};
pub use session::SessionManager;
pub use stream::ResponseStream;

use relay_telemetry::ENVELOPES_SENT;
use relay_types::{Envelope, TransportError};

use crate::ports::Port;

/// Encode and post `envelope`, counting it on success.
pub(crate) fn post_envelope(port: &dyn Port, envelope: &Envelope) -> Result<(), TransportError> {
    let message = envelope.encode()?;
    port.post_message(message)?;
    ENVELOPES_SENT
        .with_label_values(&[envelope.kind.as_str()])
        .inc();
    Ok(())
}
