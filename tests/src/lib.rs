//! # Cross-Context Relay Test Suite
//!
//! Unified test crate for flows that span every context.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/
//! │   └── relay_benchmarks.rs   # Envelope codec, multiplexer dispatch
//! └── src/integration/
//!     ├── fixtures.rs           # Topologies and test handlers
//!     ├── e2e_relay.rs          # page → content script → background
//!     ├── worker_restart.rs     # background suspended and restarted
//!     └── properties.rs         # retry bounds, terminal uniqueness
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p relay-tests
//! cargo test -p relay-tests integration::worker_restart
//! cargo bench -p relay-tests
//! ```

pub mod integration;
