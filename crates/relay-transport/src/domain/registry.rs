//! # Port Registry
//!
//! Maps a service name to the live channel serving it.
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | `register` | Adds a channel; fails while a live one exists, replaces a dead one |
//! | `lookup` | Returns the live channel or `ChannelUnavailable` |
//! | `on_disconnect` | Removes the entry and rejects its pending ids with `ChannelClosed` |
//!
//! Replacing a dead entry only unlinks it. Its demultiplexer still drains
//! what the peer posted before disconnecting, then rejects whatever is left
//! through `on_disconnect`.
//!
//! The registry is owned by exactly one context and is only mutated there.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relay_types::TransportError;
use tracing::{debug, info};

use super::closed_cache::ClosedStreamCache;
use super::multiplexer::StreamMultiplexer;
use crate::ports::DynPort;

/// A registered channel and the multiplexer tracking its pending ids.
#[derive(Debug, Clone)]
pub struct RegisteredChannel {
    pub port: DynPort,
    pub mux: Arc<StreamMultiplexer>,
}

impl RegisteredChannel {
    /// Connected and not yet shut down.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.port.is_connected() && !self.mux.is_shut()
    }
}

/// Service name -> live channel.
#[derive(Debug)]
pub struct PortRegistry {
    channels: HashMap<String, RegisteredChannel>,
    closed_retention: Duration,
}

impl PortRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(ClosedStreamCache::DEFAULT_RETENTION)
    }

    /// Registry whose multiplexers remember closed ids for `closed_retention`.
    #[must_use]
    pub fn with_retention(closed_retention: Duration) -> Self {
        Self {
            channels: HashMap::new(),
            closed_retention,
        }
    }

    /// Register `port` as the channel for `service`.
    ///
    /// A dead entry under the same name is replaced. Its pending ids stay
    /// with its multiplexer until [`PortRegistry::on_disconnect`] runs for it.
    ///
    /// # Errors
    ///
    /// `AlreadyRegistered` if a live channel already serves `service`.
    pub fn register(
        &mut self,
        service: &str,
        port: DynPort,
    ) -> Result<RegisteredChannel, TransportError> {
        if let Some(existing) = self.channels.get(service) {
            if existing.is_live() {
                return Err(TransportError::AlreadyRegistered {
                    service: service.to_string(),
                });
            }
            debug!(
                service,
                pending = existing.mux.pending(),
                "Replacing dead channel"
            );
        }

        let channel = RegisteredChannel {
            port,
            mux: Arc::new(StreamMultiplexer::with_retention(
                service,
                self.closed_retention,
            )),
        };
        self.channels.insert(service.to_string(), channel.clone());
        info!(service, "Channel registered");
        Ok(channel)
    }

    /// The live channel for `service`.
    ///
    /// # Errors
    ///
    /// `ChannelUnavailable` if nothing live is registered.
    pub fn lookup(&self, service: &str) -> Result<RegisteredChannel, TransportError> {
        match self.channels.get(service) {
            Some(channel) if channel.is_live() => Ok(channel.clone()),
            _ => Err(TransportError::ChannelUnavailable {
                service: service.to_string(),
            }),
        }
    }

    /// Handle the channel behind `mux` going away.
    ///
    /// The entry is removed only if it still belongs to `mux`, so a late
    /// disconnect never evicts a replacement channel. Returns the number of
    /// pending callers rejected.
    pub fn on_disconnect(&mut self, service: &str, mux: &Arc<StreamMultiplexer>) -> usize {
        let owned = self
            .channels
            .get(service)
            .is_some_and(|channel| Arc::ptr_eq(&channel.mux, mux));
        if owned {
            self.channels.remove(service);
        }

        let rejected = mux.close_all();
        if owned {
            info!(service, rejected, "Channel disconnected");
        }
        rejected
    }

    /// Remove and shut down the entry for `service`, disconnecting its port.
    pub fn remove(&mut self, service: &str) -> Option<usize> {
        let channel = self.channels.remove(service)?;
        channel.port.disconnect();
        Some(channel.mux.close_all())
    }

    /// Registered service names.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<_> = self.channels.keys().cloned().collect();
        services.sort();
        services
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}
