#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use chatrelay_core::protocol::Channel;
use chatrelay_engine::config::{self, DeliveryKind, OutboundText, TransportKind};
use chatrelay_engine::engine::Mode;
use chatrelay_engine::transport::PeerScope;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
relay:
  transport: bus
  bus:
    topik: "x" # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.relay.mode, Mode::Relay);
    assert!(!cfg.relay.autostart);
    assert_eq!(cfg.relay.transport, TransportKind::Datagram);
    assert_eq!(cfg.relay.datagram.port, 61801);
    assert_eq!(cfg.relay.datagram.scope, PeerScope::Local);
    assert_eq!(
        cfg.relay.bus.rendezvous_port(),
        chatrelay_engine::transport::bus::topic_port(&cfg.relay.bus.topic)
    );
    assert_eq!(cfg.relay.delivery, DeliveryKind::Display);
    assert_eq!(cfg.relay.outbound_text, OutboundText::Rich);
    assert_eq!(cfg.host.tick_ms, 50);
    assert!(cfg.ops.listen_addr().unwrap().is_none());

    let capture = cfg.relay.capture_channels().unwrap();
    assert_eq!(capture.len(), 9);
    assert!(capture.contains(&Channel::FreeCompany));
    assert!(!capture.contains(&Channel::CrossWorldLs1));
    assert_eq!(cfg.relay.suppress_channels().unwrap(), vec![Channel::CrossWorldLs1]);
}

#[test]
fn full_config_parses() {
    let ok = r#"
version: 1
log_level: "debug"
relay:
  mode: receiver
  autostart: true
  transport: bus
  bus:
    topic: "test-topic"
    port: 50123
    capacity: 32
  capture: [LS1, ls2]
  suppress: []
  delivery: command
  command_prefix: "/ls1"
  outbound_text: plain
host:
  tick_ms: 20
ops:
  listen: "127.0.0.1:9090"
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.relay.mode, Mode::Receiver);
    assert!(cfg.relay.autostart);
    assert_eq!(cfg.relay.transport, TransportKind::Bus);
    assert_eq!(cfg.relay.bus.topic, "test-topic");
    assert_eq!(cfg.relay.bus.capacity, 32);
    assert_eq!(cfg.relay.bus.rendezvous_port(), 50123);
    assert_eq!(
        cfg.relay.capture_channels().unwrap(),
        vec![Channel::Ls1, Channel::Ls2]
    );
    assert!(cfg.relay.suppress_channels().unwrap().is_empty());
    assert_eq!(cfg.relay.outbound_text, OutboundText::Plain);
    assert_eq!(cfg.host.tick_ms, 20);
    assert_eq!(
        cfg.ops.listen_addr().unwrap().map(|a| a.port()),
        Some(9090)
    );
}

#[test]
fn unknown_channel_name_fails() {
    let bad = r#"
version: 1
relay:
  capture: [ls9]
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
    assert!(err.to_string().contains("ls9"));
}

#[test]
fn unsupported_config_version_fails() {
    let err = config::load_from_str("version: 2\n").expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn command_delivery_requires_slash_prefix() {
    let bad = r#"
version: 1
relay:
  delivery: command
  command_prefix: "fc"
"#;
    assert!(config::load_from_str(bad).is_err());

    let ok = r#"
version: 1
relay:
  delivery: command
"#;
    let cfg = config::load_from_str(ok).expect("default prefix is valid");
    assert_eq!(cfg.relay.command_prefix, "/fc");
}

#[test]
fn out_of_range_values_fail() {
    for bad in [
        "version: 1\nrelay:\n  datagram:\n    port: 0\n",
        "version: 1\nrelay:\n  datagram:\n    network_target: \"nowhere\"\n",
        "version: 1\nrelay:\n  bus:\n    capacity: 0\n",
        "version: 1\nrelay:\n  bus:\n    port: 0\n",
        "version: 1\nhost:\n  tick_ms: 0\n",
        "version: 1\nops:\n  listen: \"not-an-addr\"\n",
        "version: 1\nrelay:\n  mode: broadcaster\n",
    ] {
        let err = config::load_from_str(bad).expect_err(bad);
        assert_eq!(err.code().as_str(), "CONFIG", "{bad}");
    }
}

#[test]
fn missing_file_is_a_config_error() {
    let err = config::load_from_file("/nonexistent/chatrelay.yaml").expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}
