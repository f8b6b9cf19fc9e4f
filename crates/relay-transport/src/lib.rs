//! # Relay Transport
//!
//! Request/response and server-streaming RPC across isolated execution
//! contexts connected by message channels.
//!
//! ## Topology
//!
//! ```text
//!   ┌────────┐   page channel   ┌────────────────┐   runtime channel   ┌────────────┐
//!   │  page  │ ◄──────────────► │ content script │ ◄─────────────────► │ background │
//!   │ client │                  │   forwarder    │                     │  sessions  │
//!   └────────┘                  └────────────────┘                     └────────────┘
//! ```
//!
//! ## Components
//!
//! | Layer | Component | Role |
//! |-------|-----------|------|
//! | domain | `PortRegistry` | service name -> live channel |
//! | domain | `StreamMultiplexer` | per-id state machine, late-envelope drops |
//! | domain | `retry` / `RetryPolicy` | exponential backoff for transient failures |
//! | ports | `Port`, `Connector`, `OriginValidator` | host channel abstraction |
//! | ports | `RelayApi`, `RequestHandler` | caller and handler surfaces |
//! | adapters | `MemoryHost`, `MemoryPort`, `DocumentConnector` | in-memory channels, host-attested sender origin |
//! | adapters | `ForwardingConnector` | content-script relay |
//! | service | `RelayClient` | caller side |
//! | service | `SessionManager` | background side |
//!
//! ## Error Policy
//!
//! | Failure | Caller sees |
//! |---------|-------------|
//! | Receiving context not ready | retried, then `RetriesExhausted` |
//! | Channel closed mid-flight | `ChannelClosed`, not retried |
//! | Malformed or late envelope | nothing; dropped and logged |
//! | Handler error | `Application(payload)` |
//! | Sender origin differs from the claimed one | channel refused |

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::{
    spawn_forwarder, DocumentConnector, ForwardStats, ForwardingConnector, MemoryHost, MemoryPort,
};
pub use config::{ConfigError, RelayConfig, RelayOrigin, RetryConfig, StreamConfig};
pub use domain::{
    retry, ClosedStreamCache, Dispatch, Jitter, PortRegistry, RegisteredChannel, RetryPolicy,
    StreamEvent, StreamMultiplexer,
};
pub use ports::{
    AbortController, AbortSignal, AllowAllOrigins, Connector, DynPort, Endpoint,
    IncomingRequest, OriginAllowList, OriginValidator, Port, PortEvent, RelayApi, Reply,
    ReplyStream, RequestHandler,
};
pub use service::{RelayClient, RelayClientBuilder, ResponseStream, SessionManager};

// Re-export wire types so callers need a single import.
pub use relay_types::{
    ChannelLabel, ChannelName, CorrelationId, Envelope, EnvelopeKind, Payload, ProtocolError,
    TransportError,
};
