//! Shared application state for a relay node.
//!
//! Owns the engine built from config and is the single teardown point:
//! `shutdown()` releases the transport listener and the chat tap.

use std::sync::Arc;

use tokio::runtime::Handle;

use chatrelay_core::error::Result;

use crate::config::{RelayConfig, RelaySection, TransportKind};
use crate::engine::{EngineOptions, RedirectEngine};
use crate::host::ChatHost;
use crate::obs::RelayMetrics;
use crate::transport::{BusHub, BusTransport, DatagramTransport, Transport};

#[derive(Clone)]
pub struct RelayApp {
    cfg: Arc<RelayConfig>,
    engine: RedirectEngine,
}

impl RelayApp {
    /// Build application state.
    /// Returns Result so callers can report bad config without panicking.
    pub fn new(cfg: RelayConfig, host: Arc<dyn ChatHost>, runtime: Handle) -> Result<Self> {
        let transport = build_transport(&cfg.relay, BusHub::shared())?;
        let opts = EngineOptions::from_config(&cfg.relay)?;
        Ok(Self::with_parts(cfg, opts, transport, host, runtime))
    }

    pub fn with_parts(
        cfg: RelayConfig,
        opts: EngineOptions,
        transport: Arc<dyn Transport>,
        host: Arc<dyn ChatHost>,
        runtime: Handle,
    ) -> Self {
        let engine = RedirectEngine::new(opts, transport, host, runtime);
        Self {
            cfg: Arc::new(cfg),
            engine,
        }
    }

    pub fn cfg(&self) -> &RelayConfig {
        &self.cfg
    }

    pub fn engine(&self) -> &RedirectEngine {
        &self.engine
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.engine.metrics()
    }

    /// Extra gauges rendered next to the registry.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        vec![("chatrelay_active", u64::from(self.engine.is_active()))]
    }

    pub fn shutdown(&self) {
        self.engine.stop();
        tracing::info!("relay node shut down");
    }
}

pub fn build_transport(relay: &RelaySection, hub: Arc<BusHub>) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match relay.transport {
        TransportKind::Datagram => Arc::new(DatagramTransport::new(
            relay.datagram.port,
            relay.datagram.network_addr()?,
        )),
        TransportKind::Bus => Arc::new(BusTransport::new(
            hub,
            relay.bus.topic.clone(),
            relay.bus.rendezvous_port(),
            relay.bus.capacity,
        )),
    };
    Ok(transport)
}
