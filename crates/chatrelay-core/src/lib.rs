//! chatRelay core: transport-agnostic relay primitives and error types.
//!
//! This crate defines the envelope wire format, the channel whitelist, the
//! rich-text capability and the loopback guard shared by the engine and any
//! host adapter. It carries no runtime or socket dependencies.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Every fallible path
//! surfaces as `RelayError`/`Result` so a malformed datagram can never take
//! down the host process.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod guard;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorCode, RelayError, Result};
