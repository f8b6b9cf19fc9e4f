//! Shared fixtures for the end-to-end flows.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_runtime::{DemoHandler, Topology};
use relay_transport::{
    AbortSignal, ChannelName, Connector, Endpoint, IncomingRequest, OriginAllowList, Payload,
    RelayConfig, RelayOrigin, Reply, RequestHandler, RetryConfig, TransportError,
};
use tokio_stream::StreamExt;

/// Origin the page contexts open channels from.
pub const PAGE_ORIGIN: &str = "https://page.example";

/// Streams nothing until the caller goes away.
pub const HOLD_SERVICE: &str = "relay.test.v1.HoldService";

/// Relay config with a short, deterministic backoff.
#[must_use]
pub fn fast_config(max_attempts: u32) -> RelayConfig {
    RelayConfig {
        origin: RelayOrigin(PAGE_ORIGIN.to_string()),
        retry: RetryConfig {
            max_attempts,
            initial_delay_ms: 10,
            multiplier: 2.0,
            max_delay_ms: Some(40),
            jitter: false,
        },
        ..RelayConfig::default()
    }
}

/// Topology approving only [`PAGE_ORIGIN`], serving the demo services plus
/// [`HOLD_SERVICE`]. The background is started.
#[must_use]
pub fn topology(max_attempts: u32) -> (Topology, Arc<TestHandler>) {
    topology_approving(max_attempts, PAGE_ORIGIN)
}

#[must_use]
pub fn topology_approving(max_attempts: u32, approved: &str) -> (Topology, Arc<TestHandler>) {
    let handler = Arc::new(TestHandler::default());
    let topology = Topology::new(
        &fast_config(max_attempts),
        handler.clone(),
        Arc::new(OriginAllowList::new([approved])),
    );
    topology.start_background();
    (topology, handler)
}

/// Demo services plus [`HOLD_SERVICE`], with call accounting.
#[derive(Debug, Default)]
pub struct TestHandler {
    demo: DemoHandler,
    held: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl TestHandler {
    /// Requests that reached the handler.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.held.load(Ordering::SeqCst) + usize::try_from(self.demo.served()).unwrap_or(usize::MAX)
    }

    /// Hold streams started.
    #[must_use]
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    /// Hold streams dropped by the background.
    #[must_use]
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestHandler for TestHandler {
    async fn handle(&self, request: IncomingRequest, abort: AbortSignal) -> Result<Reply, Payload> {
        if request.service.as_deref() != Some(HOLD_SERVICE) {
            return self.demo.handle(request, abort).await;
        }

        self.held.fetch_add(1, Ordering::SeqCst);
        let guard = ReleaseGuard(self.released.clone());
        let stream = tokio_stream::pending::<Result<Payload, Payload>>().map(move |item| {
            let _held = &guard;
            item
        });
        Ok(Reply::Stream(Box::pin(stream)))
    }
}

/// Counts a release when the stream holding it is dropped.
struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector that counts every connect attempt.
pub struct CountingConnector {
    inner: Arc<dyn Connector>,
    attempts: AtomicU32,
}

impl CountingConnector {
    pub fn new(inner: Arc<dyn Connector>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            attempts: AtomicU32::new(0),
        })
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for CountingConnector {
    async fn connect(&self, name: &ChannelName) -> Result<Endpoint, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.connect(name).await
    }
}

/// Poll `condition` until it holds. Panics after two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not met within 2s");
}

/// Await `future`, panicking if it takes longer than two seconds.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    match tokio::time::timeout(Duration::from_secs(2), future).await {
        Ok(output) => output,
        Err(_) => panic!("timed out after 2s"),
    }
}
