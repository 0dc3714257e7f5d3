//! Dispatcher module exports.
//!
//! The queue dispatcher is the hand-off between listener tasks and the single
//! host thread that is allowed to apply results.

pub mod queue;

pub use queue::{DrainReport, QueueDispatcher};
