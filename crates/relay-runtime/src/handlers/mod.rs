//! # Request Handlers
//!
//! Background-side services the demo runtime serves.
//!
//! | Service | Shape | Request | Reply |
//! |---------|-------|---------|-------|
//! | [`ECHO_SERVICE`] | unary | any payload | the same payload |
//! | [`COUNTER_SERVICE`] | server stream | `{"to": n}` | chunks `1..=n`, then end |

pub mod demo;

pub use demo::{DemoHandler, COUNTER_SERVICE, ECHO_SERVICE};
