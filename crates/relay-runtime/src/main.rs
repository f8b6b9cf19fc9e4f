//! # Relay Runtime
//!
//! Demo entry point for the cross-context relay.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (defaults, then environment)
//! 2. Initialize telemetry (logging + Prometheus registry)
//! 3. Build the topology and start the background context
//! 4. Run the demo calls: one unary echo, one streamed count
//! 5. Shut down on completion or Ctrl+C
//!
//! ## Call Flow
//!
//! ```text
//! page ──request──→ content script ──request──→ background
//!   ↑                                               │
//!   └──────── response / chunks / end / abort ──────┘
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use relay_runtime::{DemoHandler, RuntimeConfig, Topology, COUNTER_SERVICE, ECHO_SERVICE};
use relay_telemetry::{encode_metrics, init_telemetry};
use relay_transport::{OriginAllowList, Payload};
use serde_json::json;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

/// The demo runtime.
struct RelayRuntime {
    config: RuntimeConfig,
    topology: Topology,
    handler: Arc<DemoHandler>,
    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl RelayRuntime {
    fn new(config: RuntimeConfig) -> Self {
        let handler = Arc::new(DemoHandler::new());
        let validator = Arc::new(OriginAllowList::new(config.demo.allowed_origins.clone()));
        let topology = Topology::new(&config.relay, handler.clone(), validator);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            topology,
            handler,
            shutdown_tx,
            shutdown_rx,
        }
    }

    fn start(&self) {
        info!("===========================================");
        info!("  Cross-Context Relay Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");
        info!(
            origin = self.config.relay.origin.as_str(),
            max_attempts = self.config.relay.retry.max_attempts,
            "Relay configured"
        );

        self.topology.start_background();
        self.spawn_reporter();
    }

    /// Periodic status line until shutdown.
    fn spawn_reporter(&self) {
        let mut shutdown = self.shutdown_rx.clone();
        let interval = self.config.demo.report_interval();
        let sessions = self.topology.sessions().clone();
        let page = self.topology.page().clone();
        let handler = self.handler.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        info!(
                            sessions = sessions.session_count(),
                            channels = page.services().len(),
                            served = handler.served(),
                            "Relay status"
                        );
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    async fn run_demo(&self) -> Result<()> {
        let page = self.topology.page();

        let echoed = page
            .unary(ECHO_SERVICE, Payload::json(json!({"hello": "relay"})))
            .await
            .context("Echo call failed")?;
        info!(service = ECHO_SERVICE, reply = %echoed, "Unary call complete");

        let count = self.config.demo.count;
        let mut stream = page
            .server_stream(COUNTER_SERVICE, Payload::json(json!({"to": count})))
            .await
            .context("Counter call failed to start")?;
        let mut received = 0u64;
        while let Some(item) = stream.next().await {
            let chunk = item.context("Counter stream failed")?;
            received += 1;
            info!(service = COUNTER_SERVICE, chunk = %chunk, "Chunk received");
        }
        info!(service = COUNTER_SERVICE, received, "Stream complete");

        Ok(())
    }

    async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }

        for service in self.topology.page().services() {
            self.topology.page().detach(&service);
        }
        self.topology.stop_background();
        tokio::task::yield_now().await;

        if self.config.demo.print_metrics {
            match encode_metrics() {
                Ok(text) => println!("{text}"),
                Err(e) => warn!(error = %e, "Failed to encode metrics"),
            }
        }

        info!(served = self.handler.served(), "Shutdown complete");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env().context("Invalid configuration")?;
    let _telemetry = init_telemetry(&config.telemetry).context("Failed to initialize telemetry")?;

    let runtime = RelayRuntime::new(config);
    runtime.start();

    let outcome = tokio::select! {
        result = runtime.run_demo() => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Interrupted");
            Ok(())
        }
    };

    runtime.shutdown().await;
    outcome
}
