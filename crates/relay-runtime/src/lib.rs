//! # Relay Runtime Library
//!
//! Exposes the demo runtime's building blocks for the binary and for the
//! end-to-end test suite.
//!
//! ## Modules
//!
//! - `container/` - Runtime configuration (relay, telemetry, demo sections)
//! - `handlers/` - Background-side request handlers (echo, counter)
//! - `wiring/` - The three-context topology over the in-memory host

pub mod container;
pub mod handlers;
pub mod wiring;

pub use container::{DemoConfig, RuntimeConfig, RuntimeConfigError};
pub use handlers::{DemoHandler, COUNTER_SERVICE, ECHO_SERVICE};
pub use wiring::Topology;
