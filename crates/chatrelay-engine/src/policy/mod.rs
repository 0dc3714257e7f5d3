//! Policy layer (capture and suppress channel sets).
//!
//! Compiles the configured channel names into a lookup the engine consults
//! for every observed chat event.

pub mod capture;

pub use capture::{CaptureDecision, CapturePolicy};
