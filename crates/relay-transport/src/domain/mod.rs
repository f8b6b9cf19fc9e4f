//! # Domain Layer
//!
//! Transport state that does not depend on how channels are implemented.
//!
//! ## Components
//!
//! - `registry`: service name -> live channel
//! - `multiplexer`: per-correlation-id state machine for one channel
//! - `closed_cache`: time-bounded memory of closed ids
//! - `retry`: exponential backoff for transient failures

pub mod closed_cache;
pub mod multiplexer;
pub mod registry;
pub mod retry;

pub use closed_cache::ClosedStreamCache;
pub use multiplexer::{CallReceiver, Dispatch, StreamEvent, StreamMultiplexer};
pub use registry::{PortRegistry, RegisteredChannel};
pub use retry::{retry, Jitter, RetryPolicy};
