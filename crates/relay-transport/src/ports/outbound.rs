//! Outbound (Driven) ports for the relay.
//!
//! These traits stand in for the host environment: the bidirectional
//! channels between contexts, the way a context opens one, and the policy
//! deciding which origins may open a session.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use relay_types::{ChannelName, TransportError};
use serde_json::Value;
use tokio::sync::mpsc;

/// Event observed on the receiving side of a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PortEvent {
    Message(Value),
    /// The peer disconnected. No further messages follow.
    Disconnected,
}

/// One end of a bidirectional host channel.
///
/// Messages are delivered in order. After `disconnect` (from either end) the
/// channel is dead: posting fails and the peer observes
/// [`PortEvent::Disconnected`].
pub trait Port: Send + Sync + fmt::Debug {
    /// The name the channel was opened with.
    fn name(&self) -> &str;

    /// Origin of the document that opened the channel, as attested by the
    /// host. Unlike the origin inside [`Port::name`], the opener cannot
    /// choose it. `None` if the host supplied no sender.
    fn sender_origin(&self) -> Option<&str>;

    /// Post a JSON message to the peer.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the channel is no longer connected.
    fn post_message(&self, message: Value) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Tear the channel down. Idempotent.
    fn disconnect(&self);
}

pub type DynPort = Arc<dyn Port>;

/// A port together with the stream of events arriving on it.
#[derive(Debug)]
pub struct Endpoint {
    pub port: DynPort,
    pub events: mpsc::UnboundedReceiver<PortEvent>,
}

/// Opens channels to another context.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel named `name`.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the receiving context is not ready.
    async fn connect(&self, name: &ChannelName) -> Result<Endpoint, TransportError>;
}

/// Decides whether the origin named by a channel may open a session.
///
/// Approval may take time (e.g. waiting on the user). Messages arriving in
/// the meantime are buffered, not lost.
#[async_trait]
pub trait OriginValidator: Send + Sync {
    /// # Errors
    ///
    /// `Unauthorized` if the origin is denied.
    async fn approve(&self, name: &ChannelName) -> Result<(), TransportError>;
}

/// Approves every origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllOrigins;

#[async_trait]
impl OriginValidator for AllowAllOrigins {
    async fn approve(&self, _name: &ChannelName) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Approves a fixed set of origins.
#[derive(Debug, Clone, Default)]
pub struct OriginAllowList {
    origins: HashSet<String>,
}

impl OriginAllowList {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origins: origins.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn allows(&self, origin: &str) -> bool {
        self.origins.contains(origin)
    }
}

#[async_trait]
impl OriginValidator for OriginAllowList {
    async fn approve(&self, name: &ChannelName) -> Result<(), TransportError> {
        if self.allows(&name.origin) {
            Ok(())
        } else {
            Err(TransportError::Unauthorized {
                origin: name.origin.clone(),
            })
        }
    }
}
