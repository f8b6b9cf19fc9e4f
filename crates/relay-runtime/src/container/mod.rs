//! # Runtime Container
//!
//! Configuration for everything the runtime wires together.

pub mod config;

pub use config::{DemoConfig, RuntimeConfig, RuntimeConfigError};
