//! UDP datagram substrate.
//!
//! - The listener binds the well-known port only while subscribed, so a
//!   sender-only process never competes for it.
//! - Sends go out through a lazily bound ephemeral socket (broadcast enabled).
//! - The receive loop re-arms after every datagram, whatever happened to the
//!   previous one. Socket errors back off before re-arming.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;

use chatrelay_core::error::{RelayError, Result};

use super::{deliver, InboundHandler, PeerScope, Subscription, Transport};

/// Well-known relay port.
pub const DEFAULT_PORT: u16 = 61801;

/// Largest datagram we accept.
const MAX_DATAGRAM: usize = 64 * 1024;

const RECV_BACKOFF_MIN: Duration = Duration::from_millis(10);
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause before re-arming after `failures` consecutive receive errors.
fn recv_backoff(failures: u32) -> Duration {
    let factor = 1u32 << failures.saturating_sub(1).min(7);
    (RECV_BACKOFF_MIN * factor).min(RECV_BACKOFF_MAX)
}

pub struct DatagramTransport {
    port: u16,
    network_target: SocketAddr,
    outbound: OnceCell<UdpSocket>,
}

impl DatagramTransport {
    pub fn new(port: u16, network_target: SocketAddr) -> Self {
        Self {
            port,
            network_target,
            outbound: OnceCell::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn target(&self, scope: PeerScope) -> SocketAddr {
        match scope {
            PeerScope::Local => SocketAddr::from((Ipv4Addr::LOCALHOST, self.port)),
            PeerScope::Network => self.network_target,
        }
    }

    async fn outbound(&self) -> Result<&UdpSocket> {
        self.outbound
            .get_or_try_init(|| async {
                let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
                sock.set_broadcast(true)?;
                Ok::<_, RelayError>(sock)
            })
            .await
    }
}

#[async_trait]
impl Transport for DatagramTransport {
    fn kind(&self) -> &'static str {
        "datagram"
    }

    async fn send(&self, payload: Bytes, scope: PeerScope) -> Result<()> {
        if payload.len() > MAX_DATAGRAM {
            return Err(RelayError::Transport(format!(
                "datagram too large: {} bytes",
                payload.len()
            )));
        }
        let sock = self.outbound().await?;
        let target = self.target(scope);
        let n = sock
            .send_to(&payload, target)
            .await
            .map_err(|e| RelayError::Transport(format!("send_to {target} failed: {e}")))?;
        if n != payload.len() {
            return Err(RelayError::Transport(format!(
                "short datagram write: {n}/{}",
                payload.len()
            )));
        }
        Ok(())
    }

    fn subscribe(&self, rt: &Handle, handler: InboundHandler) -> Result<Subscription> {
        // Bind synchronously so a busy port fails the caller's start().
        let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.port))
            .map_err(|e| RelayError::Transport(format!("bind udp port {} failed: {e}", self.port)))?;
        std_sock.set_nonblocking(true)?;

        let alive = Arc::new(AtomicBool::new(true));
        let task = rt.spawn(listen(std_sock, handler, Arc::clone(&alive)));
        tracing::info!(port = self.port, "datagram listener started");
        Ok(Subscription::new(alive, task))
    }
}

async fn listen(std_sock: std::net::UdpSocket, handler: InboundHandler, alive: Arc<AtomicBool>) {
    let sock = match UdpSocket::from_std(std_sock) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "datagram listener could not register socket");
            return;
        }
    };

    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut failures = 0u32;
    while alive.load(Ordering::Acquire) {
        match sock.recv_from(&mut buf).await {
            Ok((n, from)) => {
                failures = 0;
                if !alive.load(Ordering::Acquire) {
                    break;
                }
                tracing::trace!(%from, len = n, "datagram received");
                deliver(&handler, Bytes::copy_from_slice(&buf[..n]), "datagram");
            }
            Err(e) => {
                // e.g. ICMP port-unreachable surfacing on some platforms
                failures = failures.saturating_add(1);
                let pause = recv_backoff(failures);
                tracing::warn!(error = %e, failures, ?pause, "datagram receive failed; re-arming");
                tokio::time::sleep(pause).await;
            }
        }
    }
    tracing::debug!("datagram listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::{sleep, timeout, Duration};

    fn free_port() -> u16 {
        let s = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        s.local_addr().unwrap().port()
    }

    fn collector() -> (InboundHandler, Arc<Mutex<Vec<Bytes>>>) {
        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&got);
        let handler: InboundHandler = Arc::new(move |b: Bytes| {
            if b.as_ref() == b"poison" {
                return Err(RelayError::Codec("poison".into()));
            }
            sink.lock().unwrap().push(b);
            Ok(())
        });
        (handler, got)
    }

    #[tokio::test]
    async fn loopback_send_reaches_listener_after_bad_datagram() {
        let port = free_port();
        let t = DatagramTransport::new(port, SocketAddr::from((Ipv4Addr::LOCALHOST, port)));
        let (handler, got) = collector();
        let _sub = t.subscribe(&Handle::current(), handler).unwrap();

        t.send(Bytes::from_static(b"poison"), PeerScope::Local).await.unwrap();
        t.send(Bytes::from_static(b"one"), PeerScope::Local).await.unwrap();
        t.send(Bytes::from_static(b"two"), PeerScope::Network).await.unwrap();

        timeout(Duration::from_secs(5), async {
            while got.lock().unwrap().len() < 2 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let got = got.lock().unwrap();
        assert!(got.contains(&Bytes::from_static(b"one")));
        assert!(got.contains(&Bytes::from_static(b"two")));
    }

    #[tokio::test]
    async fn second_listener_on_same_port_fails_to_bind() {
        let port = free_port();
        let t = DatagramTransport::new(port, SocketAddr::from((Ipv4Addr::LOCALHOST, port)));
        let (h1, _) = collector();
        let (h2, _) = collector();
        let _first = t.subscribe(&Handle::current(), h1).unwrap();
        let err = t.subscribe(&Handle::current(), h2).unwrap_err();
        assert_eq!(err.code().as_str(), "TRANSPORT");
    }

    #[test]
    fn receive_errors_back_off_up_to_a_ceiling() {
        assert_eq!(recv_backoff(1), Duration::from_millis(10));
        assert_eq!(recv_backoff(2), Duration::from_millis(20));
        assert_eq!(recv_backoff(4), Duration::from_millis(80));
        assert_eq!(recv_backoff(8), Duration::from_secs(1));
        assert_eq!(recv_backoff(u32::MAX), Duration::from_secs(1));
        let mut prev = Duration::ZERO;
        for n in 1..20 {
            assert!(recv_backoff(n) >= prev);
            assert!(recv_backoff(n) > Duration::ZERO);
            prev = recv_backoff(n);
        }
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let t = DatagramTransport::new(free_port(), SocketAddr::from((Ipv4Addr::LOCALHOST, 1)));
        let big = Bytes::from(vec![0u8; MAX_DATAGRAM + 1]);
        assert!(t.send(big, PeerScope::Local).await.is_err());
    }
}
