//! chatRelay engine library entry.
//!
//! This crate wires config, transports, the queue dispatcher and the redirect
//! engine into a relay node. It is consumed by the console binary
//! (`main.rs`), by host adapters, and by integration tests.

pub mod app_state;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod host;
pub mod obs;
pub mod ops;
pub mod policy;
pub mod router;
pub mod transport;
