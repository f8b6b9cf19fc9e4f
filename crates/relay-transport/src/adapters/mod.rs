//! Adapters layer.
//!
//! - `memory`: in-memory channels and host
//! - `forwarder`: content-script relay between a page channel and a background channel

pub mod forwarder;
pub mod memory;

pub use forwarder::{spawn_forwarder, ForwardStats, ForwardingConnector};
pub use memory::{DocumentConnector, MemoryHost, MemoryPort, NO_RECEIVER};
