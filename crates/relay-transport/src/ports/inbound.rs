//! Inbound (Driving) ports for the relay.
//!
//! [`RelayApi`] is what callers in a page or extension context use.
//! [`RequestHandler`] is what the background context implements to serve
//! requests arriving on a session.

use std::pin::Pin;

use async_trait::async_trait;
use relay_types::{CorrelationId, Payload, TransportError};
use tokio::sync::watch;
use tokio_stream::Stream;

/// Caller-side API.
#[async_trait]
pub trait RelayApi: Send + Sync {
    /// Stream of reply payloads for a server-streamed call.
    type Stream: Stream<Item = Result<Payload, TransportError>> + Send;

    /// Send a request and wait for its single reply.
    ///
    /// # Errors
    ///
    /// - `Application` if the handler rejected the request
    /// - `ChannelClosed` if the channel went away while waiting
    /// - `RetriesExhausted` if the receiving context never became ready
    async fn unary(&self, service: &str, payload: Payload) -> Result<Payload, TransportError>;

    /// Send a request and receive a stream of replies.
    ///
    /// Dropping the returned stream before it ends cancels the call.
    async fn server_stream(
        &self,
        service: &str,
        payload: Payload,
    ) -> Result<Self::Stream, TransportError>;
}

/// A request delivered to a [`RequestHandler`].
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    /// Type name from the channel name, if the channel carried one.
    pub service: Option<String>,
    /// Origin of the session the request arrived on.
    pub origin: String,
    pub correlation_id: CorrelationId,
    pub payload: Payload,
}

/// Items are reply chunks; an `Err` item aborts the stream with that error.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<Payload, Payload>> + Send>>;

/// A handler's reply.
pub enum Reply {
    Unary(Payload),
    Stream(ReplyStream),
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Unary(payload) => f.debug_tuple("Unary").field(payload).finish(),
            Reply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Serves requests arriving on sessions.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one request.
    ///
    /// `abort` fires when the caller cancels. Handlers doing long work
    /// should watch it; streamed replies are cut off regardless.
    ///
    /// An `Err` payload is returned to the caller as an application error.
    async fn handle(&self, request: IncomingRequest, abort: AbortSignal) -> Result<Reply, Payload>;
}

/// Fires when a pending request is cancelled.
///
/// Also fires if the owning session goes away.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once the request is aborted.
    pub async fn aborted(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Owning side of an [`AbortSignal`].
#[derive(Debug)]
pub struct AbortController {
    tx: watch::Sender<bool>,
}

impl AbortController {
    #[must_use]
    pub fn pair() -> (Self, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, AbortSignal { rx })
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}
