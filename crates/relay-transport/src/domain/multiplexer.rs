//! # Stream Multiplexer
//!
//! Demultiplexes envelopes arriving on one channel to the caller waiting on
//! each correlation id.
//!
//! ## State Machine (per correlation id)
//!
//! ```text
//!            open()
//!              │
//!              ▼
//!         ┌─────────┐  streamChunk
//!         │  OPEN   │◄────────────┐
//!         └────┬────┘─────────────┘
//!              │ response | streamEnd | streamAbort | cancel() | close_all()
//!              ▼
//!         ┌─────────┐
//!         │ CLOSED  │  late envelopes are dropped
//!         └─────────┘
//! ```
//!
//! Exactly one terminal event is delivered per id. Events for one id arrive
//! in the order they were dispatched.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use relay_telemetry::{CHANNELS_ATTACHED, PENDING_REJECTED};
use relay_types::{CorrelationId, Envelope, EnvelopeKind, Payload, ProtocolError, TransportError};
use tokio::sync::{mpsc, watch};

use super::closed_cache::ClosedStreamCache;

/// What the caller waiting on a correlation id observes.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(Payload),
    /// Unary reply. Terminal.
    Response(Payload),
    /// Normal end of stream. Terminal.
    End,
    /// Remote abort carrying an application error (or nothing). Terminal.
    Abort(Payload),
    /// Transport failure such as the channel closing. Terminal.
    Failed(TransportError),
}

impl StreamEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk(_))
    }
}

/// Outcome of [`StreamMultiplexer::dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Non-terminal event handed to the caller.
    Delivered,
    /// Terminal event handed to the caller; the id is now closed.
    Closed,
    /// The id already closed; envelope dropped.
    DroppedLate,
    /// The id was never opened here; envelope dropped.
    DroppedUnknown,
    /// The caller stopped listening; the id is now closed.
    Orphaned,
    /// The envelope kind is not valid on this side of the channel.
    Rejected(ProtocolError),
}

/// Receiving half handed to the caller by [`StreamMultiplexer::open`].
pub type CallReceiver = mpsc::UnboundedReceiver<StreamEvent>;

struct MuxInner {
    open: HashMap<CorrelationId, mpsc::UnboundedSender<StreamEvent>>,
    closed: ClosedStreamCache,
    shut: bool,
}

/// Per-channel table of open correlation ids.
pub struct StreamMultiplexer {
    service: String,
    inner: Mutex<MuxInner>,
    shut_tx: watch::Sender<bool>,
}

impl StreamMultiplexer {
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_retention(service, ClosedStreamCache::DEFAULT_RETENTION)
    }

    /// Multiplexer remembering closed ids for `retention`.
    #[must_use]
    pub fn with_retention(service: impl Into<String>, retention: Duration) -> Self {
        CHANNELS_ATTACHED.inc();
        Self {
            service: service.into(),
            inner: Mutex::new(MuxInner {
                open: HashMap::new(),
                closed: ClosedStreamCache::with_config(
                    retention,
                    ClosedStreamCache::DEFAULT_CAPACITY,
                ),
                shut: false,
            }),
            shut_tx: watch::channel(false).0,
        }
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Start tracking `id`.
    ///
    /// # Errors
    ///
    /// - `ChannelClosed` if the channel already shut down
    /// - `DuplicateRequest` if `id` is open or recently closed
    pub fn open(&self, id: CorrelationId) -> Result<CallReceiver, TransportError> {
        let mut inner = self.inner.lock();
        if inner.shut {
            return Err(TransportError::channel_closed(&self.service));
        }
        if inner.open.contains_key(&id) || inner.closed.contains(&id) {
            return Err(TransportError::DuplicateRequest(id));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        inner.open.insert(id, tx);
        Ok(rx)
    }

    /// Route a received envelope to its caller.
    pub fn dispatch(&self, envelope: Envelope) -> Dispatch {
        let event = match envelope.kind {
            EnvelopeKind::StreamChunk => StreamEvent::Chunk(envelope.payload),
            EnvelopeKind::Response => StreamEvent::Response(envelope.payload),
            EnvelopeKind::StreamEnd => StreamEvent::End,
            EnvelopeKind::StreamAbort => StreamEvent::Abort(envelope.payload),
            EnvelopeKind::Request => {
                return Dispatch::Rejected(ProtocolError::UnexpectedKind {
                    kind: envelope.kind.to_string(),
                    correlation_id: envelope.correlation_id,
                });
            }
        };

        let mut inner = self.inner.lock();
        let id = envelope.correlation_id;

        if event.is_terminal() {
            let Some(tx) = inner.open.remove(&id) else {
                return Self::missing(&inner, &id);
            };
            inner.closed.insert(id);
            // A dropped receiver here only means nobody waits for the result.
            let _ = tx.send(event);
            return Dispatch::Closed;
        }

        let Some(tx) = inner.open.get(&id) else {
            return Self::missing(&inner, &id);
        };
        if tx.send(event).is_ok() {
            Dispatch::Delivered
        } else {
            inner.open.remove(&id);
            inner.closed.insert(id);
            Dispatch::Orphaned
        }
    }

    /// Close `id` from the caller side. Returns whether it was open.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        let mut inner = self.inner.lock();
        match inner.open.remove(id) {
            Some(_) => {
                inner.closed.insert(id.clone());
                true
            }
            None => false,
        }
    }

    /// Shut the multiplexer down, rejecting every open id with
    /// `ChannelClosed`. Returns the number of callers rejected.
    pub fn close_all(&self) -> usize {
        let mut inner = self.inner.lock();
        if inner.shut {
            return 0;
        }
        inner.shut = true;

        let pending: Vec<_> = inner.open.drain().collect();
        for (id, tx) in &pending {
            let _ = tx.send(StreamEvent::Failed(TransportError::channel_closed(
                &self.service,
            )));
            inner.closed.insert(id.clone());
        }
        drop(inner);

        self.shut_tx.send_replace(true);
        CHANNELS_ATTACHED.dec();
        PENDING_REJECTED.inc_by(pending.len() as f64);
        pending.len()
    }

    /// Number of open ids.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.lock().open.len()
    }

    #[must_use]
    pub fn is_open(&self, id: &CorrelationId) -> bool {
        self.inner.lock().open.contains_key(id)
    }

    #[must_use]
    pub fn is_shut(&self) -> bool {
        self.inner.lock().shut
    }

    /// Resolves once [`close_all`](Self::close_all) has run.
    pub async fn shut_down(&self) {
        let mut rx = self.shut_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn missing(inner: &MuxInner, id: &CorrelationId) -> Dispatch {
        if inner.closed.contains(id) {
            Dispatch::DroppedLate
        } else {
            Dispatch::DroppedUnknown
        }
    }
}

impl Drop for StreamMultiplexer {
    fn drop(&mut self) {
        if !self.inner.get_mut().shut {
            CHANNELS_ATTACHED.dec();
        }
    }
}

impl std::fmt::Debug for StreamMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamMultiplexer")
            .field("service", &self.service)
            .field("pending", &self.pending())
            .finish()
    }
}
