//! Transport layer (datagram + cross-process bus).
//!
//! Both substrates move opaque byte blobs with at-most-once semantics:
//! - `send` is awaited on a background task spawned by `send_best_effort`;
//!   failures are logged and counted, never retried, never returned to the
//!   capturing caller.
//! - `subscribe` starts one persistent listener task that hands every message
//!   to the inbound handler and re-arms regardless of the outcome.

pub mod bus;
pub mod datagram;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::FutureExt;
use serde::Deserialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use chatrelay_core::error::Result;

use crate::obs::metrics::RelayMetrics;

pub use bus::{BusHub, BusTransport};
pub use datagram::DatagramTransport;

/// Called once per received message, on the listener task.
pub type InboundHandler = Arc<dyn Fn(Bytes) -> Result<()> + Send + Sync>;

/// Which peers a send should reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerScope {
    /// Processes on this host.
    Local,
    /// The configured broadcast/peer address.
    Network,
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> &'static str;
    async fn send(&self, payload: Bytes, scope: PeerScope) -> Result<()>;
    fn subscribe(&self, rt: &Handle, handler: InboundHandler) -> Result<Subscription>;
}

/// A live listener. Closing (or dropping) it stops delivery.
#[derive(Debug)]
pub struct Subscription {
    alive: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(alive: Arc<AtomicBool>, task: JoinHandle<()>) -> Self {
        Self {
            alive,
            task: Some(task),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn close(&mut self) {
        self.alive.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Hand one message to the inbound handler, containing errors and panics so
/// the listener can re-arm.
pub(crate) fn deliver(handler: &InboundHandler, payload: Bytes, transport: &'static str) {
    match std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::debug!(transport, code = e.code().as_str(), error = %e, "inbound message discarded");
        }
        Err(_) => {
            tracing::error!(transport, "inbound handler panicked; listener continues");
        }
    }
}

/// Fire-and-forget send on the runtime. Returns immediately.
pub fn send_best_effort(
    rt: &Handle,
    transport: Arc<dyn Transport>,
    payload: Bytes,
    scope: PeerScope,
    metrics: Arc<RelayMetrics>,
) {
    rt.spawn(async move {
        let kind = transport.kind();
        let len = payload.len();
        match AssertUnwindSafe(transport.send(payload, scope))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                tracing::trace!(transport = kind, len, "envelope sent");
                metrics.envelopes_sent.inc(&[("transport", kind)]);
            }
            Ok(Err(e)) => {
                tracing::warn!(transport = kind, error = %e, "send failed; message dropped");
                metrics.send_failures.inc(&[("transport", kind)]);
            }
            Err(_) => {
                tracing::error!(transport = kind, "send task panicked; message dropped");
                metrics.send_failures.inc(&[("transport", kind)]);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::error::RelayError;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn deliver_contains_errors_and_panics() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handler: InboundHandler = Arc::new(move |b: Bytes| {
            seen.fetch_add(1, Ordering::SeqCst);
            match b.as_ref() {
                b"err" => Err(RelayError::Codec("bad".into())),
                b"boom" => panic!("handler blew up"),
                _ => Ok(()),
            }
        });

        deliver(&handler, Bytes::from_static(b"err"), "test");
        deliver(&handler, Bytes::from_static(b"boom"), "test");
        deliver(&handler, Bytes::from_static(b"ok"), "test");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn closing_a_subscription_stops_its_task() {
        let alive = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(std::future::pending::<()>());
        let mut sub = Subscription::new(Arc::clone(&alive), task);
        assert!(sub.is_alive());
        sub.close();
        assert!(!sub.is_alive());
        assert!(!alive.load(Ordering::SeqCst));
    }
}
