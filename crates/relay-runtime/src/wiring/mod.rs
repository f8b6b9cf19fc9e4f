//! # Context Topology
//!
//! Wires the three execution contexts over one [`MemoryHost`].
//!
//! ```text
//!  page (RelayClient)
//!    │ connect(name)
//!    ↓
//!  content script (ForwardingConnector → forwarder task)
//!    │ connect(name), host stamps the page origin as sender
//!    ↓
//!  MemoryHost ──listen──→ background (SessionManager → handler)
//! ```
//!
//! The background can be stopped and restarted to model a worker that the
//! host suspends. While it is stopped the host has no listener, so page calls
//! back off and retry until it returns.

use std::sync::Arc;

use parking_lot::Mutex;
use relay_transport::{
    ChannelLabel, ForwardingConnector, MemoryHost, OriginValidator, RelayClient, RelayConfig,
    RequestHandler, SessionManager,
};
use tokio::task::JoinHandle;
use tracing::info;

/// Page, content-script and background contexts sharing one host.
pub struct Topology {
    host: Arc<MemoryHost>,
    sessions: SessionManager,
    page: RelayClient,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl Topology {
    /// Build the topology. The background is not started.
    pub fn new(
        config: &RelayConfig,
        handler: Arc<dyn RequestHandler>,
        validator: Arc<dyn OriginValidator>,
    ) -> Self {
        let host = MemoryHost::new();
        let sessions = SessionManager::new(handler, validator);
        let page = RelayClient::builder(config)
            .context("page")
            .label(ChannelLabel::ContentScript)
            .connector(Arc::new(ForwardingConnector::new(Arc::new(
                host.document(config.origin.as_str()),
            ))))
            .build();

        Self {
            host,
            sessions,
            page,
            background: Mutex::new(None),
        }
    }

    /// Start accepting channels in the background context.
    pub fn start_background(&self) {
        let incoming = self.host.listen();
        let sessions = self.sessions.clone();
        let task = tokio::spawn(async move { sessions.serve(incoming).await });

        if let Some(previous) = self.background.lock().replace(task) {
            previous.abort();
        }
        info!(context = "background", "Background listening");
    }

    /// Stop the background context: stop listening and disconnect every
    /// session. Returns the number of sessions closed.
    pub fn stop_background(&self) -> usize {
        self.host.stop_listening();
        if let Some(task) = self.background.lock().take() {
            task.abort();
        }
        let closed = self.sessions.shutdown();
        info!(context = "background", closed, "Background stopped");
        closed
    }

    #[must_use]
    pub fn is_background_running(&self) -> bool {
        self.host.is_ready()
    }

    #[must_use]
    pub fn page(&self) -> &RelayClient {
        &self.page
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn host(&self) -> &Arc<MemoryHost> {
        &self.host
    }
}

impl Drop for Topology {
    fn drop(&mut self) {
        if let Some(task) = self.background.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("background_running", &self.is_background_running())
            .field("sessions", &self.sessions.session_count())
            .field("page_services", &self.page.services())
            .finish()
    }
}
