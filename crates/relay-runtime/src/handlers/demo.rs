//! Echo and counter services.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use relay_transport::{AbortSignal, IncomingRequest, Payload, Reply, RequestHandler};
use serde_json::json;
use tracing::debug;

use crate::container::config::MAX_DEMO_COUNT;

pub const ECHO_SERVICE: &str = "relay.demo.v1.EchoService";
pub const COUNTER_SERVICE: &str = "relay.demo.v1.CounterService";

/// Serves [`ECHO_SERVICE`] and [`COUNTER_SERVICE`]; anything else is
/// answered with an `unimplemented` error payload.
#[derive(Debug, Default)]
pub struct DemoHandler {
    served: AtomicU64,
}

impl DemoHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests handled so far, including failed ones.
    #[must_use]
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RequestHandler for DemoHandler {
    async fn handle(
        &self,
        request: IncomingRequest,
        _abort: AbortSignal,
    ) -> Result<Reply, Payload> {
        self.served.fetch_add(1, Ordering::Relaxed);
        debug!(
            service = request.service.as_deref().unwrap_or("-"),
            origin = %request.origin,
            correlation_id = %request.correlation_id,
            "Handling request"
        );

        match request.service.as_deref() {
            Some(ECHO_SERVICE) => Ok(Reply::Unary(request.payload)),
            Some(COUNTER_SERVICE) => {
                let to = count_to(&request.payload)?;
                let items: Vec<Result<Payload, Payload>> =
                    (1..=to).map(|n| Ok(Payload::json(n))).collect();
                Ok(Reply::Stream(Box::pin(tokio_stream::iter(items))))
            }
            other => Err(Payload::json(json!({
                "code": "unimplemented",
                "service": other,
            }))),
        }
    }
}

fn count_to(payload: &Payload) -> Result<u64, Payload> {
    let to = payload
        .as_json()
        .and_then(|value| value.get("to"))
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| invalid_argument("expected {\"to\": <unsigned integer>}"))?;
    if to > MAX_DEMO_COUNT {
        return Err(invalid_argument("count too large"));
    }
    Ok(to)
}

fn invalid_argument(message: &str) -> Payload {
    Payload::json(json!({"code": "invalid_argument", "message": message}))
}
