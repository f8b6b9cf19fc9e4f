//! # In-Memory Host
//!
//! Channel implementation backed by tokio mpsc queues, standing in for the
//! host runtime's message ports.
//!
//! ```text
//!   host.document(origin).connect(name)            MemoryHost::listen()
//!   ───────────────────────────────────            ────────────────────
//!   local Endpoint  ◄────── MemoryPort pair ──────►  remote Endpoint
//!                                                    sender_origin = origin
//! ```
//!
//! A host without a live listener behaves like a sleeping worker: connects
//! fail with `Unavailable` until something listens again.
//!
//! The listening end learns the opener's origin from the host, never from
//! the channel name.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_types::{ChannelName, TransportError};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::ports::{Connector, Endpoint, Port, PortEvent};

/// Reason reported when nothing is listening.
pub const NO_RECEIVER: &str = "Could not establish connection. Receiving end does not exist.";

/// One end of an in-memory channel.
#[derive(Debug)]
pub struct MemoryPort {
    name: String,
    sender_origin: Option<String>,
    connected: Arc<AtomicBool>,
    peer: mpsc::UnboundedSender<PortEvent>,
}

impl MemoryPort {
    /// Create both ends of a channel named `name`, with no attested sender.
    #[must_use]
    pub fn pair(name: &str) -> (Endpoint, Endpoint) {
        Self::build_pair(name, None)
    }

    /// Create both ends of a channel opened by a document at
    /// `sender_origin`. The second (receiving) end reports that origin.
    #[must_use]
    pub fn pair_from(name: &str, sender_origin: &str) -> (Endpoint, Endpoint) {
        Self::build_pair(name, Some(sender_origin.to_string()))
    }

    fn build_pair(name: &str, sender_origin: Option<String>) -> (Endpoint, Endpoint) {
        let connected = Arc::new(AtomicBool::new(true));
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = MemoryPort {
            name: name.to_string(),
            sender_origin: None,
            connected: connected.clone(),
            peer: b_tx,
        };
        let b = MemoryPort {
            name: name.to_string(),
            sender_origin,
            connected,
            peer: a_tx,
        };

        (
            Endpoint {
                port: Arc::new(a),
                events: a_rx,
            },
            Endpoint {
                port: Arc::new(b),
                events: b_rx,
            },
        )
    }
}

impl Port for MemoryPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn sender_origin(&self) -> Option<&str> {
        self.sender_origin.as_deref()
    }

    fn post_message(&self, message: Value) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::channel_closed(&self.name));
        }
        if self.peer.send(PortEvent::Message(message)).is_err() {
            self.connected.store(false, Ordering::Release);
            return Err(TransportError::channel_closed(&self.name));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            // Only the peer is notified, matching host port semantics.
            let _ = self.peer.send(PortEvent::Disconnected);
        }
    }
}

impl Drop for MemoryPort {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// In-memory stand-in for the host runtime's connect/listen surface.
#[derive(Debug, Default)]
pub struct MemoryHost {
    listener: Mutex<Option<mpsc::UnboundedSender<Endpoint>>>,
}

impl MemoryHost {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start accepting channels. Replaces any previous listener.
    pub fn listen(&self) -> mpsc::UnboundedReceiver<Endpoint> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.listener.lock() = Some(tx);
        rx
    }

    /// Stop accepting channels, as when the receiving worker goes to sleep.
    pub fn stop_listening(&self) {
        self.listener.lock().take();
    }

    /// Whether a listener is currently accepting.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(|listener| !listener.is_closed())
    }
}

impl MemoryHost {
    /// Open a channel named `name` on behalf of a document at
    /// `sender_origin`.
    ///
    /// # Errors
    ///
    /// `Unavailable` if nothing is listening.
    pub fn connect_from(
        &self,
        sender_origin: &str,
        name: &ChannelName,
    ) -> Result<Endpoint, TransportError> {
        let name = name.to_string();
        let mut listener = self.listener.lock();

        let Some(tx) = listener.as_ref() else {
            return Err(TransportError::unavailable(NO_RECEIVER));
        };

        let (local, remote) = MemoryPort::pair_from(&name, sender_origin);
        if tx.send(remote).is_err() {
            listener.take();
            return Err(TransportError::unavailable(NO_RECEIVER));
        }

        debug!(channel = %name, sender_origin, "Channel opened");
        Ok(local)
    }

    /// Connector for a document loaded from `origin`.
    #[must_use]
    pub fn document(self: &Arc<Self>, origin: impl Into<String>) -> DocumentConnector {
        DocumentConnector {
            host: Arc::clone(self),
            origin: origin.into(),
        }
    }
}

/// Opens host channels from one document. The host stamps the document's
/// origin on every channel, whatever origin the channel name claims.
#[derive(Debug, Clone)]
pub struct DocumentConnector {
    host: Arc<MemoryHost>,
    origin: String,
}

impl DocumentConnector {
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

#[async_trait]
impl Connector for DocumentConnector {
    async fn connect(&self, name: &ChannelName) -> Result<Endpoint, TransportError> {
        self.host.connect_from(&self.origin, name)
    }
}
