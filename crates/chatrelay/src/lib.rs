//! Top-level facade crate for chatRelay.
//!
//! Re-exports the protocol core and the relay engine so hosts can depend on a single crate.

pub mod core {
    pub use chatrelay_core::*;
}

pub mod engine {
    pub use chatrelay_engine::*;
}
