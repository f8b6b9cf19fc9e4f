//! # Integration Flows
//!
//! End-to-end tests over the runtime [`Topology`](relay_runtime::Topology):
//! the page client, the content-script forwarder and the background session
//! manager, joined by the in-memory host.

pub mod fixtures;

mod e2e_relay;
mod properties;
mod worker_restart;
