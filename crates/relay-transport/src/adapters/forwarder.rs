//! # Content-Script Forwarder
//!
//! Relays envelopes between a page channel and a background channel without
//! interpreting payloads.
//!
//! ```text
//!   page ──request / streamAbort──────────────────────────► background
//!   page ◄──response / streamChunk / streamEnd / streamAbort── background
//! ```
//!
//! Messages that do not decode as envelopes, or whose kind is not valid in
//! that direction, are dropped and logged. When either side disconnects the
//! other side is disconnected too.

use std::sync::Arc;

use async_trait::async_trait;
use relay_telemetry::{log_envelope, ENVELOPES_DROPPED};
use relay_types::{ChannelName, Envelope, EnvelopeKind, TransportError};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::memory::MemoryPort;
use crate::ports::{Connector, DynPort, Endpoint, PortEvent};

const CONTEXT: &str = "content-script";

/// Counters reported when a forwarder stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub to_background: u64,
    pub to_page: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    ToBackground,
    ToPage,
}

impl Direction {
    fn accepts(self, kind: EnvelopeKind) -> bool {
        match self {
            Direction::ToBackground => {
                matches!(kind, EnvelopeKind::Request | EnvelopeKind::StreamAbort)
            }
            Direction::ToPage => kind != EnvelopeKind::Request,
        }
    }
}

/// Relay between `page` and `background` until either disconnects.
pub fn spawn_forwarder(page: Endpoint, background: Endpoint) -> JoinHandle<ForwardStats> {
    tokio::spawn(forward(page, background))
}

async fn forward(mut page: Endpoint, mut background: Endpoint) -> ForwardStats {
    let mut stats = ForwardStats::default();
    let channel = background.port.name().to_string();
    debug!(context = CONTEXT, channel = %channel, "Forwarder started");

    loop {
        tokio::select! {
            event = page.events.recv() => match event {
                Some(PortEvent::Message(message)) => {
                    match relay(message, Direction::ToBackground, &background.port) {
                        Relayed::Forwarded => stats.to_background += 1,
                        Relayed::Dropped => stats.dropped += 1,
                        Relayed::TargetClosed => {
                            page.port.disconnect();
                            break;
                        }
                    }
                }
                Some(PortEvent::Disconnected) | None => {
                    background.port.disconnect();
                    break;
                }
            },
            event = background.events.recv() => match event {
                Some(PortEvent::Message(message)) => {
                    match relay(message, Direction::ToPage, &page.port) {
                        Relayed::Forwarded => stats.to_page += 1,
                        Relayed::Dropped => stats.dropped += 1,
                        Relayed::TargetClosed => {
                            background.port.disconnect();
                            break;
                        }
                    }
                }
                Some(PortEvent::Disconnected) | None => {
                    page.port.disconnect();
                    break;
                }
            },
        }
    }

    debug!(
        context = CONTEXT,
        channel = %channel,
        to_background = stats.to_background,
        to_page = stats.to_page,
        dropped = stats.dropped,
        "Forwarder stopped"
    );
    stats
}

enum Relayed {
    Forwarded,
    Dropped,
    TargetClosed,
}

fn relay(message: Value, direction: Direction, target: &DynPort) -> Relayed {
    let envelope = match Envelope::decode(&message) {
        Ok(envelope) => envelope,
        Err(e) => {
            ENVELOPES_DROPPED.with_label_values(&["malformed"]).inc();
            warn!(context = CONTEXT, error = %e, "Dropping malformed message");
            return Relayed::Dropped;
        }
    };

    if !direction.accepts(envelope.kind) {
        ENVELOPES_DROPPED.with_label_values(&["unexpected"]).inc();
        log_envelope!(
            warn,
            CONTEXT,
            "Dropping envelope not valid in this direction",
            envelope,
            direction = ?direction
        );
        return Relayed::Dropped;
    }

    // The raw message is forwarded so payloads pass through untouched.
    match target.post_message(message) {
        Ok(()) => Relayed::Forwarded,
        Err(e) => {
            log_envelope!(debug, CONTEXT, "Forward target closed", envelope, error = %e);
            Relayed::TargetClosed
        }
    }
}

/// [`Connector`] that opens the background channel through `upstream` and
/// hands the caller a page-side channel bridged to it by a forwarder.
pub struct ForwardingConnector {
    upstream: Arc<dyn Connector>,
}

impl ForwardingConnector {
    pub fn new(upstream: Arc<dyn Connector>) -> Self {
        Self { upstream }
    }
}

#[async_trait]
impl Connector for ForwardingConnector {
    async fn connect(&self, name: &ChannelName) -> Result<Endpoint, TransportError> {
        let background = self.upstream.connect(name).await?;
        let (page_side, script_side) = MemoryPort::pair(&name.to_string());
        spawn_forwarder(script_side, background);
        Ok(page_side)
    }
}
