//! Caller-side view of one in-flight call.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use relay_types::{CorrelationId, Envelope, EnvelopeKind, Payload, ProtocolError, TransportError};
use tokio::time::{Instant, Sleep};
use tokio_stream::Stream;
use tracing::{debug, warn};

use super::post_envelope;
use crate::domain::{CallReceiver, RegisteredChannel, StreamEvent};

/// Replies for one correlation id.
///
/// Yields each chunk, then ends on `streamEnd`. A `streamAbort` from the
/// remote side is yielded as `Err(Application(..))`, a closed channel as
/// `Err(ChannelClosed)`. After an error the stream ends.
///
/// Dropping the stream before it ends sends `streamAbort` to the remote side
/// so it stops producing.
pub struct ResponseStream {
    id: CorrelationId,
    events: CallReceiver,
    channel: RegisteredChannel,
    idle_timeout: Option<Duration>,
    idle: Option<Pin<Box<Sleep>>>,
    finished: bool,
}

impl ResponseStream {
    pub(crate) fn new(
        id: CorrelationId,
        events: CallReceiver,
        channel: RegisteredChannel,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            events,
            channel,
            idle_timeout,
            idle: idle_timeout.map(|timeout| Box::pin(tokio::time::sleep(timeout))),
            finished: false,
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.id
    }

    /// Whether a terminal event has been observed (or the call cancelled).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Stop the call and tell the remote side to stop producing.
    pub fn cancel(mut self) {
        self.abort_remote();
    }

    /// Next raw event. Used by unary calls, which expect a single `Response`.
    pub(crate) async fn recv_event(&mut self) -> Option<StreamEvent> {
        let event = self.events.recv().await;
        match &event {
            Some(event) if !event.is_terminal() => {}
            _ => self.finished = true,
        }
        event
    }

    /// Error for an event that is not valid in the current call shape.
    pub(crate) fn unexpected(&self, kind: EnvelopeKind) -> TransportError {
        TransportError::Protocol(ProtocolError::UnexpectedKind {
            kind: kind.to_string(),
            correlation_id: self.id.clone(),
        })
    }

    fn abort_remote(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if self.channel.mux.cancel(&self.id) {
            let abort = Envelope::abort(self.id.clone(), Payload::Empty);
            if let Err(e) = post_envelope(self.channel.port.as_ref(), &abort) {
                debug!(correlation_id = %self.id, error = %e, "Abort not delivered");
            }
        }
    }

    fn reset_idle(&mut self) {
        if let (Some(idle), Some(timeout)) = (self.idle.as_mut(), self.idle_timeout) {
            idle.as_mut().reset(Instant::now() + timeout);
        }
    }

    fn finish(
        &mut self,
        item: Option<Result<Payload, TransportError>>,
    ) -> Poll<Option<Result<Payload, TransportError>>> {
        self.finished = true;
        Poll::Ready(item)
    }
}

impl Stream for ResponseStream {
    type Item = Result<Payload, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.events.poll_recv(cx) {
            Poll::Ready(Some(StreamEvent::Chunk(payload))) => {
                this.reset_idle();
                Poll::Ready(Some(Ok(payload)))
            }
            Poll::Ready(Some(StreamEvent::End)) => this.finish(None),
            Poll::Ready(Some(StreamEvent::Response(payload))) => this.finish(Some(Ok(payload))),
            Poll::Ready(Some(StreamEvent::Abort(reason))) => {
                this.finish(Some(Err(TransportError::Application(reason))))
            }
            Poll::Ready(Some(StreamEvent::Failed(error))) => this.finish(Some(Err(error))),
            Poll::Ready(None) => {
                let service = this.channel.mux.service().to_string();
                this.finish(Some(Err(TransportError::channel_closed(service))))
            }
            Poll::Pending => {
                let Some(idle) = this.idle.as_mut() else {
                    return Poll::Pending;
                };
                if idle.as_mut().poll(cx).is_pending() {
                    return Poll::Pending;
                }

                let timeout_ms = this
                    .idle_timeout
                    .map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
                warn!(correlation_id = %this.id, timeout_ms, "Stream idle timeout");
                this.abort_remote();
                Poll::Ready(Some(Err(TransportError::Timeout { timeout_ms })))
            }
        }
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.abort_remote();
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("id", &self.id)
            .field("service", &self.channel.mux.service())
            .field("finished", &self.finished)
            .finish()
    }
}
