use std::net::SocketAddr;

use serde::Deserialize;

use chatrelay_core::error::{RelayError, Result};
use chatrelay_core::protocol::Channel;

use crate::engine::Mode;
use crate::transport::bus::{topic_port, DEFAULT_TOPIC};
use crate::transport::{datagram::DEFAULT_PORT, PeerScope};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    pub version: u32,

    /// Fallback tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub relay: RelaySection,

    #[serde(default)]
    pub host: HostSection,

    #[serde(default)]
    pub ops: OpsSection,
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(RelayError::Config(format!(
                "unsupported config version: {}",
                self.version
            )));
        }

        self.relay.validate()?;
        self.host.validate()?;
        self.ops.validate()?;

        Ok(())
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Datagram,
    Bus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    /// Reinject as a chat line on the original channel.
    Display,
    /// Re-emit the plain message as an outbound chat command.
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundText {
    /// Structured rich-text encoding, plain fallback.
    Rich,
    /// Always the plain text of the message.
    Plain,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    #[serde(default = "default_mode")]
    pub mode: Mode,

    /// Start the engine as soon as the host adapter is up.
    #[serde(default)]
    pub autostart: bool,

    #[serde(default = "default_transport")]
    pub transport: TransportKind,

    #[serde(default)]
    pub datagram: DatagramSection,

    #[serde(default)]
    pub bus: BusSection,

    /// Channels redirected outbound in sender/relay mode.
    #[serde(default = "default_capture")]
    pub capture: Vec<String>,

    /// Channels hidden from local display (redirect-only).
    #[serde(default = "default_suppress")]
    pub suppress: Vec<String>,

    #[serde(default = "default_delivery")]
    pub delivery: DeliveryKind,

    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    #[serde(default = "default_outbound_text")]
    pub outbound_text: OutboundText,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            autostart: false,
            transport: default_transport(),
            datagram: DatagramSection::default(),
            bus: BusSection::default(),
            capture: default_capture(),
            suppress: default_suppress(),
            delivery: default_delivery(),
            command_prefix: default_command_prefix(),
            outbound_text: default_outbound_text(),
        }
    }
}

impl RelaySection {
    pub fn validate(&self) -> Result<()> {
        self.capture_channels()?;
        self.suppress_channels()?;

        if self.delivery == DeliveryKind::Command {
            let prefix = self.command_prefix.trim();
            if !prefix.starts_with('/') || prefix.len() < 2 {
                return Err(RelayError::Config(
                    "relay.command_prefix must be a chat command like \"/fc\"".into(),
                ));
            }
        }

        self.datagram.validate()?;
        self.bus.validate()?;
        Ok(())
    }

    pub fn capture_channels(&self) -> Result<Vec<Channel>> {
        parse_channels("relay.capture", &self.capture)
    }

    pub fn suppress_channels(&self) -> Result<Vec<Channel>> {
        parse_channels("relay.suppress", &self.suppress)
    }
}

fn parse_channels(field: &str, raw: &[String]) -> Result<Vec<Channel>> {
    let mut out = Vec::with_capacity(raw.len());
    for s in raw {
        let ch: Channel = s
            .parse()
            .map_err(|_| RelayError::Config(format!("{field}: unknown channel {s:?}")))?;
        if !out.contains(&ch) {
            out.push(ch);
        }
    }
    Ok(out)
}

fn default_mode() -> Mode {
    Mode::Relay
}
fn default_transport() -> TransportKind {
    TransportKind::Datagram
}
fn default_capture() -> Vec<String> {
    ["fc", "ls1", "ls2", "ls3", "ls4", "ls5", "ls6", "ls7", "ls8"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_suppress() -> Vec<String> {
    vec!["cwls1".into()]
}
fn default_delivery() -> DeliveryKind {
    DeliveryKind::Display
}
fn default_command_prefix() -> String {
    "/fc".into()
}
fn default_outbound_text() -> OutboundText {
    OutboundText::Rich
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatagramSection {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Destination for `scope: network` sends.
    #[serde(default = "default_network_target")]
    pub network_target: String,

    #[serde(default = "default_scope")]
    pub scope: PeerScope,
}

impl Default for DatagramSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            network_target: default_network_target(),
            scope: default_scope(),
        }
    }
}

impl DatagramSection {
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(RelayError::Config("relay.datagram.port must not be 0".into()));
        }
        self.network_addr()?;
        Ok(())
    }

    pub fn network_addr(&self) -> Result<SocketAddr> {
        self.network_target.parse().map_err(|e| {
            RelayError::Config(format!(
                "relay.datagram.network_target must be ip:port ({}): {e}",
                self.network_target
            ))
        })
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_network_target() -> String {
    format!("255.255.255.255:{DEFAULT_PORT}")
}
fn default_scope() -> PeerScope {
    PeerScope::Local
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusSection {
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Loopback rendezvous port; derived from the topic when unset.
    #[serde(default)]
    pub port: Option<u16>,

    /// Messages buffered per subscriber before the oldest are dropped.
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            port: None,
            capacity: default_bus_capacity(),
        }
    }
}

impl BusSection {
    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(RelayError::Config("relay.bus.topic must not be empty".into()));
        }
        if self.port == Some(0) {
            return Err(RelayError::Config("relay.bus.port must not be 0".into()));
        }
        if !(1..=65536).contains(&self.capacity) {
            return Err(RelayError::Config(
                "relay.bus.capacity must be between 1 and 65536".into(),
            ));
        }
        Ok(())
    }

    pub fn rendezvous_port(&self) -> u16 {
        self.port.unwrap_or_else(|| topic_port(&self.topic))
    }
}

fn default_topic() -> String {
    DEFAULT_TOPIC.into()
}
fn default_bus_capacity() -> usize {
    256
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostSection {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
        }
    }
}

impl HostSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=1000).contains(&self.tick_ms) {
            return Err(RelayError::Config(
                "host.tick_ms must be between 1 and 1000".into(),
            ));
        }
        Ok(())
    }
}

fn default_tick_ms() -> u64 {
    50
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpsSection {
    /// Bind address for /healthz, /readyz, /metrics. Disabled when unset.
    #[serde(default)]
    pub listen: Option<String>,
}

impl OpsSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr().map(|_| ())
    }

    pub fn listen_addr(&self) -> Result<Option<SocketAddr>> {
        self.listen
            .as_deref()
            .map(|s| {
                s.parse()
                    .map_err(|e| RelayError::Config(format!("ops.listen must be ip:port ({s}): {e}")))
            })
            .transpose()
    }
}
