//! Lightweight in-process metrics.
//!
//! Counters and gauges are atomics rendered by the optional `/metrics`
//! endpoint; nothing here touches the network.

pub mod metrics;

pub use metrics::RelayMetrics;
