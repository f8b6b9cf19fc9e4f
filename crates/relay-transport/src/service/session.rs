//! # Session Manager
//!
//! Background side of the relay. Accepts incoming channels, approves their
//! origin, and serves each request with a [`RequestHandler`].
//!
//! ## Session Lifecycle
//!
//! ```text
//! accept(endpoint)
//!   ├─ parse channel name ──✗──→ disconnect
//!   ├─ sender ≠ claimed origin ─✗──→ disconnect
//!   ├─ session id collision ─✗──→ disconnect
//!   └─ spawn session task
//!        ├─ approve(origin) ──✗──→ disconnect
//!        └─ loop
//!             request      → spawn handler, remember AbortController
//!             streamAbort  → abort pending handler
//!             disconnect   → abort every pending handler, drop session
//! ```
//!
//! Messages arriving while approval is pending are queued and processed once
//! the origin is approved.
//!
//! ## Replies
//!
//! | Handler result | Envelopes sent |
//! |----------------|----------------|
//! | `Ok(Reply::Unary(p))` | `response(p)` |
//! | `Ok(Reply::Stream(s))` | `streamChunk*` then `streamEnd`, or `streamAbort(e)` on an `Err` item |
//! | `Err(e)` | `streamAbort(e)` |
//!
//! Nothing is sent for a request the caller aborted.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use relay_telemetry::{log_envelope, ENVELOPES_DROPPED, ENVELOPES_RECEIVED, SESSIONS_ACTIVE};
use relay_types::{ChannelName, CorrelationId, Envelope, EnvelopeKind, TransportError};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::post_envelope;
use crate::ports::{
    AbortController, AbortSignal, DynPort, Endpoint, IncomingRequest, OriginValidator, Port,
    PortEvent, Reply, ReplyStream, RequestHandler,
};

const CONTEXT: &str = "background";

/// Background-side session table.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    handler: Arc<dyn RequestHandler>,
    validator: Arc<dyn OriginValidator>,
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
}

struct SessionEntry {
    name: ChannelName,
    port: DynPort,
    task: AbortHandle,
}

impl SessionManager {
    pub fn new(handler: Arc<dyn RequestHandler>, validator: Arc<dyn OriginValidator>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                handler,
                validator,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Take ownership of an incoming channel and start serving it.
    ///
    /// # Errors
    ///
    /// - `InvalidChannelName` if the name does not parse
    /// - `Unauthenticated` if the host-attested sender origin is missing or
    ///   differs from the origin the name claims
    /// - `DuplicateSession` if a session with the same id is open
    ///
    /// The channel is disconnected on error.
    pub fn accept(&self, endpoint: Endpoint) -> Result<Uuid, TransportError> {
        let checked = ChannelName::parse(endpoint.port.name())
            .map_err(TransportError::from)
            .and_then(|name| authenticate(&name, endpoint.port.as_ref()).map(|()| name));
        let name = match checked {
            Ok(name) => name,
            Err(e) => {
                warn!(
                    context = CONTEXT,
                    channel = endpoint.port.name(),
                    error = %e,
                    "Refusing channel"
                );
                endpoint.port.disconnect();
                return Err(e);
            }
        };

        let mut sessions = self.inner.sessions.lock();
        if sessions.contains_key(&name.id) {
            warn!(context = CONTEXT, session = %name.id, "Session collision, refusing channel");
            endpoint.port.disconnect();
            return Err(TransportError::DuplicateSession(name.id.to_string()));
        }

        let Endpoint { port, events } = endpoint;
        let session = Session {
            manager: Arc::downgrade(&self.inner),
            handler: self.inner.handler.clone(),
            name: name.clone(),
            port: port.clone(),
            pending: HashMap::new(),
            next_generation: 0,
        };
        let task = tokio::spawn(session.run(self.inner.validator.clone(), events)).abort_handle();

        let id = name.id;
        info!(
            context = CONTEXT,
            session = %id,
            origin = %name.origin,
            service = name.service(),
            "Session opened"
        );
        sessions.insert(id, SessionEntry { name, port, task });
        SESSIONS_ACTIVE.inc();
        Ok(id)
    }

    /// Accept every endpoint from `incoming` until it closes.
    pub async fn serve(&self, mut incoming: mpsc::UnboundedReceiver<Endpoint>) {
        while let Some(endpoint) = incoming.recv().await {
            if let Err(e) = self.accept(endpoint) {
                debug!(context = CONTEXT, error = %e, "Channel not accepted");
            }
        }
    }

    /// Disconnect every session opened by `origin`, aborting their pending
    /// requests. Returns the number of sessions killed.
    pub fn kill_origin(&self, origin: &str) -> usize {
        let killed = self.remove_where(|entry| entry.name.origin == origin);
        info!(context = CONTEXT, origin, killed, "Killed sessions for origin");
        killed
    }

    /// Disconnect every session.
    pub fn shutdown(&self) -> usize {
        let killed = self.remove_where(|_| true);
        info!(context = CONTEXT, killed, "Session manager shut down");
        killed
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Names of the open sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<ChannelName> {
        self.inner
            .sessions
            .lock()
            .values()
            .map(|entry| entry.name.clone())
            .collect()
    }

    fn remove_where(&self, predicate: impl Fn(&SessionEntry) -> bool) -> usize {
        let removed: Vec<SessionEntry> = {
            let mut sessions = self.inner.sessions.lock();
            let ids: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, entry)| predicate(entry))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for entry in &removed {
            // Aborting the task drops its AbortControllers, which cancels
            // every pending handler.
            entry.task.abort();
            entry.port.disconnect();
            SESSIONS_ACTIVE.dec();
        }
        removed.len()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.session_count())
            .finish()
    }
}

/// The origin a channel name claims must be the one the host attests.
fn authenticate(name: &ChannelName, port: &dyn Port) -> Result<(), TransportError> {
    match port.sender_origin() {
        Some(sender) if sender == name.origin => Ok(()),
        sender => Err(TransportError::Unauthenticated {
            sender: sender.map(str::to_string),
            claimed: name.origin.clone(),
        }),
    }
}

/// Completion notice from a request task.
type Done = (CorrelationId, u64);

/// A request being served. `generation` tells a reused correlation id apart
/// from the request it replaced.
struct PendingRequest {
    generation: u64,
    controller: AbortController,
}

/// State owned by one session task.
struct Session {
    manager: Weak<ManagerInner>,
    handler: Arc<dyn RequestHandler>,
    name: ChannelName,
    port: DynPort,
    pending: HashMap<CorrelationId, PendingRequest>,
    next_generation: u64,
}

impl Session {
    async fn run(
        mut self,
        validator: Arc<dyn OriginValidator>,
        mut events: mpsc::UnboundedReceiver<PortEvent>,
    ) {
        if let Err(e) = validator.approve(&self.name).await {
            ENVELOPES_DROPPED.with_label_values(&["unauthorized"]).inc();
            warn!(context = CONTEXT, origin = %self.name.origin, error = %e, "Origin not approved");
            self.port.disconnect();
            self.release();
            return;
        }
        debug!(context = CONTEXT, session = %self.name.id, "Session approved");

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Done>();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(PortEvent::Message(message)) => self.on_message(message, &done_tx),
                    Some(PortEvent::Disconnected) | None => break,
                },
                Some((id, generation)) = done_rx.recv() => self.on_done(&id, generation),
            }
        }

        let aborted = self.pending.len();
        for (_, request) in self.pending.drain() {
            request.controller.abort();
        }
        debug!(context = CONTEXT, session = %self.name.id, aborted, "Session disconnected");
        self.release();
    }

    /// Forget a finished request, unless its id was already reused.
    fn on_done(&mut self, id: &CorrelationId, generation: u64) {
        let current = self
            .pending
            .get(id)
            .is_some_and(|request| request.generation == generation);
        if current {
            self.pending.remove(id);
        }
    }

    fn on_message(&mut self, message: Value, done_tx: &mpsc::UnboundedSender<Done>) {
        let envelope = match Envelope::decode(&message) {
            Ok(envelope) => envelope,
            Err(e) => {
                ENVELOPES_DROPPED.with_label_values(&["malformed"]).inc();
                warn!(context = CONTEXT, error = %e, "Dropping malformed message");
                return;
            }
        };
        ENVELOPES_RECEIVED
            .with_label_values(&[envelope.kind.as_str()])
            .inc();

        match envelope.kind {
            EnvelopeKind::Request => self.on_request(envelope, done_tx),
            EnvelopeKind::StreamAbort => match self.pending.remove(&envelope.correlation_id) {
                Some(request) => {
                    request.controller.abort();
                    log_envelope!(debug, CONTEXT, "Request aborted by caller", envelope);
                }
                None => {
                    log_envelope!(debug, CONTEXT, "Abort for request no longer pending", envelope);
                }
            },
            _ => {
                ENVELOPES_DROPPED.with_label_values(&["unexpected"]).inc();
                log_envelope!(warn, CONTEXT, "Dropping unexpected envelope", envelope);
            }
        }
    }

    fn on_request(&mut self, envelope: Envelope, done_tx: &mpsc::UnboundedSender<Done>) {
        if self.pending.contains_key(&envelope.correlation_id) {
            ENVELOPES_DROPPED.with_label_values(&["collision"]).inc();
            log_envelope!(warn, CONTEXT, "Request collision, dropping", envelope);
            return;
        }

        let (controller, signal) = AbortController::pair();
        let generation = self.next_generation;
        self.next_generation += 1;
        self.pending.insert(
            envelope.correlation_id.clone(),
            PendingRequest {
                generation,
                controller,
            },
        );

        let request = IncomingRequest {
            service: self.name.type_name.clone(),
            origin: self.name.origin.clone(),
            correlation_id: envelope.correlation_id,
            payload: envelope.payload,
        };
        tokio::spawn(serve_request(
            self.handler.clone(),
            self.port.clone(),
            request,
            signal,
            done_tx.clone(),
            generation,
        ));
    }

    fn release(&self) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        if manager.sessions.lock().remove(&self.name.id).is_some() {
            SESSIONS_ACTIVE.dec();
            info!(context = CONTEXT, session = %self.name.id, "Session closed");
        }
    }
}

async fn serve_request(
    handler: Arc<dyn RequestHandler>,
    port: DynPort,
    request: IncomingRequest,
    mut signal: AbortSignal,
    done_tx: mpsc::UnboundedSender<Done>,
    generation: u64,
) {
    let id = request.correlation_id.clone();
    let handler_signal = signal.clone();

    let result = tokio::select! {
        biased;
        () = signal.aborted() => None,
        result = handler.handle(request, handler_signal) => Some(result),
    };

    match result {
        None => debug!(context = CONTEXT, correlation_id = %id, "Handler cancelled"),
        Some(Ok(Reply::Unary(payload))) => {
            send(&port, &Envelope::response(id.clone(), payload));
        }
        Some(Ok(Reply::Stream(stream))) => stream_reply(&port, &id, stream, &mut signal).await,
        Some(Err(reason)) => {
            send(&port, &Envelope::abort(id.clone(), reason));
        }
    }

    let _ = done_tx.send((id, generation));
}

async fn stream_reply(
    port: &DynPort,
    id: &CorrelationId,
    mut stream: ReplyStream,
    signal: &mut AbortSignal,
) {
    loop {
        let item = tokio::select! {
            biased;
            () = signal.aborted() => {
                debug!(context = CONTEXT, correlation_id = %id, "Stream cancelled by caller");
                return;
            }
            item = stream.next() => item,
        };

        match item {
            Some(Ok(payload)) => {
                let chunk = Envelope::chunk(id.clone(), payload);
                if !send(port, &chunk) {
                    return;
                }
            }
            Some(Err(reason)) => {
                send(port, &Envelope::abort(id.clone(), reason));
                return;
            }
            None => {
                send(port, &Envelope::end(id.clone()));
                return;
            }
        }
    }
}

/// Post a reply. A disconnected caller is expected and only logged.
fn send(port: &DynPort, envelope: &Envelope) -> bool {
    match post_envelope(port.as_ref(), envelope) {
        Ok(()) => true,
        Err(e) => {
            log_envelope!(debug, CONTEXT, "Reply not delivered", envelope, error = %e);
            false
        }
    }
}
