//! # Relay Client
//!
//! Caller side of the relay. Owns a [`PortRegistry`] and one demultiplexing
//! task per attached channel.
//!
//! ## Call Flow
//!
//! ```text
//! unary / server_stream
//!   └─ retry(policy) ─┬─ lookup(service) ──────────────┐
//!                     └─ connector.connect() + attach ─┴─ mux.open(id) ─ post(request)
//!
//! demux task (per channel)
//!   port events ─ decode ─ mux.dispatch ─ caller
//!   disconnect  ─ registry.on_disconnect ─ pending callers get ChannelClosed
//! ```
//!
//! A call is retried only while nothing has been delivered: no live channel,
//! or the receiving context not ready. Once the request is posted, a
//! disconnect fails the call with `ChannelClosed`.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_telemetry::{
    log_envelope, time_histogram, CALL_DURATION, ENVELOPES_DROPPED, ENVELOPES_RECEIVED,
};
use relay_types::{
    ChannelLabel, ChannelName, CorrelationId, Envelope, EnvelopeKind, Payload, TransportError,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::post_envelope;
use super::stream::ResponseStream;
use crate::config::RelayConfig;
use crate::domain::{
    retry, CallReceiver, Dispatch, PortRegistry, RegisteredChannel, RetryPolicy, StreamEvent,
};
use crate::ports::{Connector, Endpoint, PortEvent, RelayApi};

/// Builder for [`RelayClient`].
pub struct RelayClientBuilder {
    context: String,
    label: ChannelLabel,
    origin: String,
    retry: RetryPolicy,
    idle_timeout: Option<Duration>,
    closed_retention: Duration,
    connector: Option<Arc<dyn Connector>>,
}

impl RelayClientBuilder {
    /// Context label used in logs (page, content-script, ...).
    #[must_use]
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Label written into channel names this client opens.
    #[must_use]
    pub fn label(mut self, label: ChannelLabel) -> Self {
        self.label = label;
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Opens channels on demand when no live one is registered.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    #[must_use]
    pub fn build(self) -> RelayClient {
        RelayClient {
            inner: Arc::new(ClientInner {
                context: self.context,
                label: self.label,
                origin: self.origin,
                registry: Mutex::new(PortRegistry::with_retention(self.closed_retention)),
                connector: self.connector,
                retry: self.retry,
                idle_timeout: self.idle_timeout,
            }),
        }
    }
}

/// Caller side of the relay.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    context: String,
    label: ChannelLabel,
    origin: String,
    registry: Mutex<PortRegistry>,
    connector: Option<Arc<dyn Connector>>,
    retry: RetryPolicy,
    idle_timeout: Option<Duration>,
}

impl RelayClient {
    #[must_use]
    pub fn builder(config: &RelayConfig) -> RelayClientBuilder {
        RelayClientBuilder {
            context: "client".to_string(),
            label: ChannelLabel::Extension,
            origin: config.origin.as_str().to_string(),
            retry: config.retry.policy(),
            idle_timeout: config.stream.idle_timeout(),
            closed_retention: config.stream.closed_retention(),
            connector: None,
        }
    }

    /// Register `endpoint` as the channel for `service` and start
    /// demultiplexing it.
    ///
    /// # Errors
    ///
    /// `AlreadyRegistered` if a live channel already serves `service`. The
    /// endpoint is disconnected in that case.
    pub fn attach(&self, service: &str, endpoint: Endpoint) -> Result<(), TransportError> {
        self.inner.attach_endpoint(service, endpoint).map(|_| ())
    }

    /// Disconnect the channel for `service`. Returns the number of pending
    /// callers rejected, or `None` if nothing was registered.
    pub fn detach(&self, service: &str) -> Option<usize> {
        let rejected = self.inner.registry.lock().remove(service);
        if let Some(rejected) = rejected {
            info!(context = %self.inner.context, service, rejected, "Channel detached");
        }
        rejected
    }

    /// Services with a registered channel.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        self.inner.registry.lock().services()
    }

    /// Whether a live channel serves `service`.
    #[must_use]
    pub fn is_attached(&self, service: &str) -> bool {
        self.inner.registry.lock().lookup(service).is_ok()
    }

    /// Calls awaiting a terminal envelope on `service`.
    #[must_use]
    pub fn pending(&self, service: &str) -> usize {
        self.inner
            .registry
            .lock()
            .lookup(service)
            .map_or(0, |channel| channel.mux.pending())
    }

    /// See [`RelayApi::unary`].
    pub async fn unary(&self, service: &str, payload: Payload) -> Result<Payload, TransportError> {
        let _timer = time_histogram!(CALL_DURATION);
        let mut call = self.inner.start_call(service, payload, None).await?;

        match call.recv_event().await {
            Some(StreamEvent::Response(payload)) => Ok(payload),
            Some(StreamEvent::Abort(reason)) => Err(TransportError::Application(reason)),
            Some(StreamEvent::Failed(error)) => Err(error),
            Some(StreamEvent::Chunk(_)) => Err(call.unexpected(EnvelopeKind::StreamChunk)),
            Some(StreamEvent::End) => Err(call.unexpected(EnvelopeKind::StreamEnd)),
            None => Err(TransportError::channel_closed(service)),
        }
    }

    /// See [`RelayApi::server_stream`].
    pub async fn server_stream(
        &self,
        service: &str,
        payload: Payload,
    ) -> Result<ResponseStream, TransportError> {
        let idle_timeout = self.inner.idle_timeout;
        self.inner.start_call(service, payload, idle_timeout).await
    }
}

#[async_trait]
impl RelayApi for RelayClient {
    type Stream = ResponseStream;

    async fn unary(&self, service: &str, payload: Payload) -> Result<Payload, TransportError> {
        RelayClient::unary(self, service, payload).await
    }

    async fn server_stream(
        &self,
        service: &str,
        payload: Payload,
    ) -> Result<ResponseStream, TransportError> {
        RelayClient::server_stream(self, service, payload).await
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("context", &self.inner.context)
            .field("origin", &self.inner.origin)
            .field("services", &self.services())
            .finish()
    }
}

impl ClientInner {
    async fn start_call(
        self: &Arc<Self>,
        service: &str,
        payload: Payload,
        idle_timeout: Option<Duration>,
    ) -> Result<ResponseStream, TransportError> {
        let (channel, id, events) = retry(
            &self.retry,
            |attempt| {
                let inner = Arc::clone(self);
                let service = service.to_string();
                let payload = payload.clone();
                async move { inner.send_request(&service, payload, attempt).await }
            },
            TransportError::is_transient,
        )
        .await?;

        Ok(ResponseStream::new(id, events, channel, idle_timeout))
    }

    /// One send attempt. Failures before the request leaves are reported as
    /// `ChannelUnavailable` so the retry scheduler tries again.
    async fn send_request(
        self: &Arc<Self>,
        service: &str,
        payload: Payload,
        attempt: u32,
    ) -> Result<(RegisteredChannel, CorrelationId, CallReceiver), TransportError> {
        let not_sent = |error: TransportError| match error {
            TransportError::ChannelClosed { service } => {
                TransportError::ChannelUnavailable { service }
            }
            other => other,
        };

        let channel = self.channel_for(service).await?;
        let id = CorrelationId::generate();
        let events = channel.mux.open(id.clone()).map_err(not_sent)?;

        let request = Envelope::request(id.clone(), payload);
        if let Err(e) = post_envelope(channel.port.as_ref(), &request) {
            channel.mux.cancel(&id);
            log_envelope!(
                debug,
                self.context.as_str(),
                "Request not delivered",
                request,
                attempt,
                error = %e
            );
            return Err(not_sent(e));
        }

        log_envelope!(
            debug,
            self.context.as_str(),
            "Request sent",
            request,
            service,
            attempt
        );
        Ok((channel, id, events))
    }

    /// The live channel for `service`, opening one through the connector if
    /// needed.
    async fn channel_for(
        self: &Arc<Self>,
        service: &str,
    ) -> Result<RegisteredChannel, TransportError> {
        let existing = self.registry.lock().lookup(service);
        let unavailable = match existing {
            Ok(channel) => return Ok(channel),
            Err(e) => e,
        };
        let Some(connector) = self.connector.clone() else {
            return Err(unavailable);
        };

        let name = ChannelName::new(self.label, &self.origin, Some(service))?;
        let endpoint = connector.connect(&name).await?;
        debug!(context = %self.context, channel = %name, "Channel opened");

        match self.attach_endpoint(service, endpoint) {
            Ok(channel) => Ok(channel),
            // Another call attached first.
            Err(TransportError::AlreadyRegistered { .. }) => self.registry.lock().lookup(service),
            Err(e) => Err(e),
        }
    }

    fn attach_endpoint(
        self: &Arc<Self>,
        service: &str,
        endpoint: Endpoint,
    ) -> Result<RegisteredChannel, TransportError> {
        let Endpoint { port, events } = endpoint;

        let registered = self.registry.lock().register(service, port.clone());
        let channel = match registered {
            Ok(channel) => channel,
            Err(e) => {
                port.disconnect();
                return Err(e);
            }
        };

        tokio::spawn(demux(
            Arc::downgrade(self),
            self.context.clone(),
            service.to_string(),
            channel.clone(),
            events,
        ));
        Ok(channel)
    }
}

/// Per-channel receive loop.
async fn demux(
    client: Weak<ClientInner>,
    context: String,
    service: String,
    channel: RegisteredChannel,
    mut events: mpsc::UnboundedReceiver<PortEvent>,
) {
    debug!(context = %context, service = %service, "Demux started");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(PortEvent::Message(message)) => on_message(&context, &channel, message),
                Some(PortEvent::Disconnected) | None => break,
            },
            () = channel.mux.shut_down() => break,
        }
    }

    let rejected = match client.upgrade() {
        Some(inner) => inner.registry.lock().on_disconnect(&service, &channel.mux),
        None => channel.mux.close_all(),
    };
    channel.port.disconnect();

    if rejected > 0 {
        warn!(context = %context, service = %service, rejected, "Channel lost with pending requests");
    } else {
        debug!(context = %context, service = %service, "Demux stopped");
    }
}

fn on_message(context: &str, channel: &RegisteredChannel, message: Value) {
    let envelope = match Envelope::decode(&message) {
        Ok(envelope) => envelope,
        Err(e) => {
            ENVELOPES_DROPPED.with_label_values(&["malformed"]).inc();
            warn!(context, error = %e, "Dropping malformed message");
            return;
        }
    };
    ENVELOPES_RECEIVED
        .with_label_values(&[envelope.kind.as_str()])
        .inc();

    let kind = envelope.kind;
    let id = envelope.correlation_id.clone();

    match channel.mux.dispatch(envelope) {
        Dispatch::Delivered | Dispatch::Closed => {}
        Dispatch::DroppedLate => {
            ENVELOPES_DROPPED.with_label_values(&["late"]).inc();
            debug!(context, kind = %kind, correlation_id = %id, "Dropping late envelope");
        }
        Dispatch::DroppedUnknown => {
            ENVELOPES_DROPPED.with_label_values(&["unknown"]).inc();
            warn!(context, kind = %kind, correlation_id = %id, "Dropping envelope for unknown id");
        }
        Dispatch::Orphaned => {
            debug!(context, correlation_id = %id, "Caller gone, aborting remote stream");
            let abort = Envelope::abort(id, Payload::Empty);
            let _ = post_envelope(channel.port.as_ref(), &abort);
        }
        Dispatch::Rejected(e) => {
            ENVELOPES_DROPPED.with_label_values(&["unexpected"]).inc();
            warn!(context, error = %e, "Dropping unexpected envelope");
        }
    }
}
