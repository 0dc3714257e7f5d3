//! Cross-process publish/subscribe bus substrate.
//!
//! Every process on the host that uses a topic meets on one loopback TCP
//! rendezvous port (derived from the topic name unless configured):
//! - the first process to bind the port becomes the topic's broker and fans
//!   every frame out to all connected peers;
//! - every other process connects to the broker as a peer;
//! - when the broker goes away its peers re-elect, one of them binds the port
//!   and the rest reconnect. Frames published during the hand-over are lost.
//!
//! Within a process, a `BusHub` keeps one link per topic and a local
//! broadcast channel for that process's subscribers. Every subscriber of a
//! topic receives each published frame exactly once, the publisher's own
//! subscribers included; order is preserved per publisher. A subscriber that
//! falls more than `capacity` frames behind loses the overflow and keeps
//! going.
//!
//! Wire: each side first sends the topic name as a hello frame and checks the
//! other's, so an unrelated listener on the port is never mistaken for a
//! broker. Frames are a `u32` big-endian length followed by the payload.

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};

use chatrelay_core::error::{RelayError, Result};

use super::{deliver, InboundHandler, PeerScope, Subscription, Transport};

/// Fixed topic shared by every relay peer.
pub const DEFAULT_TOPIC: &str = "ChatRedirect__4F87BD8E-C064-4E70-92D2-78386C5CFCB0";

/// Largest frame accepted on the bus.
pub const MAX_FRAME: usize = 64 * 1024;

const RELINK_BACKOFF: Duration = Duration::from_millis(250);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Rendezvous port for a topic. Every process derives the same one.
pub fn topic_port(topic: &str) -> u16 {
    let digest = Sha256::digest(topic.as_bytes());
    let n = u16::from_be_bytes([digest[0], digest[1]]);
    // dynamic/private range
    49152 + n % (u16::MAX - 49152)
}

/// Per-process topic registry: topic -> link.
#[derive(Default)]
pub struct BusHub {
    links: DashMap<String, Arc<TopicLink>>,
}

impl BusHub {
    pub fn new() -> Self {
        Self {
            links: DashMap::new(),
        }
    }

    /// Process-wide hub.
    pub fn shared() -> Arc<BusHub> {
        static HUB: OnceLock<Arc<BusHub>> = OnceLock::new();
        Arc::clone(HUB.get_or_init(|| Arc::new(BusHub::new())))
    }

    /// The topic's link, started on first use. Later calls keep the first
    /// port and capacity.
    fn link(&self, rt: &Handle, topic: &str, port: u16, capacity: usize) -> Arc<TopicLink> {
        let entry = self
            .links
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(TopicLink::start(rt, topic, port, capacity)));
        Arc::clone(entry.value())
    }

    /// Subscribers of `topic` in this process.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.links
            .get(topic)
            .map(|l| l.local.receiver_count())
            .unwrap_or(0)
    }

    /// Whether this process currently brokers `topic` or is connected to its
    /// broker.
    pub fn is_linked(&self, topic: &str) -> bool {
        self.links
            .get(topic)
            .map(|l| l.linked.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

struct TopicLink {
    local: broadcast::Sender<Bytes>,
    uplink: mpsc::Sender<Bytes>,
    linked: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl TopicLink {
    fn start(rt: &Handle, topic: &str, port: u16, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (local, _) = broadcast::channel(capacity);
        let (uplink, uplink_rx) = mpsc::channel(capacity);
        let linked = Arc::new(AtomicBool::new(false));
        let task = rt.spawn(run_link(
            topic.to_string(),
            port,
            capacity,
            local.clone(),
            uplink_rx,
            Arc::clone(&linked),
        ));
        Self {
            local,
            uplink,
            linked,
            task,
        }
    }

    /// Deliver locally and hand the frame to the broker side. Returns the
    /// number of local subscribers reached.
    fn publish(&self, payload: Bytes) -> usize {
        // No local subscribers is not an error.
        let local = self.local.send(payload.clone()).unwrap_or(0);
        match self.uplink.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("bus uplink full; frame not forwarded to other processes");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("bus link stopped; frame delivered locally only");
            }
        }
        local
    }
}

impl Drop for TopicLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Elect, serve, and re-elect until the hub lets go of the topic.
async fn run_link(
    topic: String,
    port: u16,
    capacity: usize,
    local: broadcast::Sender<Bytes>,
    mut uplink: mpsc::Receiver<Bytes>,
    linked: Arc<AtomicBool>,
) {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    loop {
        let ended = match TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!(%topic, port, "bus broker listening");
                linked.store(true, Ordering::Release);
                serve_broker(&topic, listener, capacity, &local, &mut uplink).await
            }
            Err(_) => match connect_peer(&topic, addr).await {
                Ok(stream) => {
                    tracing::info!(%topic, port, "bus linked to broker");
                    linked.store(true, Ordering::Release);
                    serve_peer(stream, &local, &mut uplink).await
                }
                Err(e) => Err(e),
            },
        };
        linked.store(false, Ordering::Release);

        match ended {
            Ok(()) => {
                tracing::debug!(%topic, "bus link closed");
                return;
            }
            Err(e) => {
                tracing::debug!(%topic, error = %e, "bus link lost; re-electing");
            }
        }
        sleep(RELINK_BACKOFF).await;
    }
}

async fn connect_peer(topic: &str, addr: SocketAddr) -> io::Result<TcpStream> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    handshake(&mut stream, topic).await?;
    Ok(stream)
}

async fn handshake(stream: &mut TcpStream, topic: &str) -> io::Result<()> {
    let exchange = async {
        write_frame(stream, topic.as_bytes()).await?;
        let hello = read_frame(stream).await?;
        if hello.as_ref() != topic.as_bytes() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "rendezvous port serves another topic",
            ));
        }
        Ok::<(), io::Error>(())
    };
    timeout(HANDSHAKE_TIMEOUT, exchange)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "bus handshake timed out"))?
}

/// Broker role: accept peers and relay every frame to everyone but its source.
async fn serve_broker(
    topic: &str,
    listener: TcpListener,
    capacity: usize,
    local: &broadcast::Sender<Bytes>,
    uplink: &mut mpsc::Receiver<Bytes>,
) -> io::Result<()> {
    let (inbox_tx, mut inbox) = mpsc::channel::<(u64, Bytes)>(capacity);
    let mut peers: HashMap<u64, mpsc::Sender<Bytes>> = HashMap::new();
    let mut sessions = JoinSet::new();
    let mut next_id = 0u64;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, from) = accepted?;
                let id = next_id;
                next_id += 1;
                let (tx, rx) = mpsc::channel(capacity);
                peers.insert(id, tx);
                sessions.spawn(broker_session(topic.to_string(), id, stream, rx, inbox_tx.clone()));
                tracing::debug!(%from, peer = id, "bus peer connected");
            }

            Some((from, frame)) = inbox.recv() => {
                let _ = local.send(frame.clone());
                fan_out(&mut peers, Some(from), &frame);
            }

            out = uplink.recv() => match out {
                Some(frame) => fan_out(&mut peers, None, &frame),
                None => return Ok(()),
            },

            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }
}

fn fan_out(peers: &mut HashMap<u64, mpsc::Sender<Bytes>>, from: Option<u64>, frame: &Bytes) {
    peers.retain(|id, tx| {
        if Some(*id) == from {
            return true;
        }
        match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(peer = *id, "bus peer lagging; frame dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    });
}

async fn broker_session(
    topic: String,
    id: u64,
    mut stream: TcpStream,
    mut outbox: mpsc::Receiver<Bytes>,
    inbox: mpsc::Sender<(u64, Bytes)>,
) {
    let _ = stream.set_nodelay(true);
    if let Err(e) = handshake(&mut stream, &topic).await {
        tracing::debug!(peer = id, error = %e, "bus peer rejected");
        return;
    }
    let ended = pump(stream, &mut outbox, move |frame| {
        match inbox.try_send((id, frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(peer = id, "bus broker inbox full; frame dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    })
    .await;
    tracing::debug!(peer = id, ?ended, "bus peer disconnected");
}

/// Peer role: frames from the broker go to local subscribers, local publishes
/// go to the broker.
async fn serve_peer(
    stream: TcpStream,
    local: &broadcast::Sender<Bytes>,
    uplink: &mut mpsc::Receiver<Bytes>,
) -> io::Result<()> {
    let local = local.clone();
    pump(stream, uplink, move |frame| {
        let _ = local.send(frame);
        true
    })
    .await
}

/// Drive one connection: a reader task hands inbound frames to `on_frame`
/// while this task writes `outbox`. Returns `Ok` only when `outbox` closes.
async fn pump<F>(
    stream: TcpStream,
    outbox: &mut mpsc::Receiver<Bytes>,
    mut on_frame: F,
) -> io::Result<()>
where
    F: FnMut(Bytes) -> bool + Send + 'static,
{
    let (mut rd, mut wr) = stream.into_split();
    let mut reader = tokio::spawn(async move {
        loop {
            let frame = read_frame(&mut rd).await?;
            if !on_frame(frame) {
                return Ok::<(), io::Error>(());
            }
        }
    });

    let result = loop {
        tokio::select! {
            ended = &mut reader => {
                break match ended {
                    Ok(Err(e)) => Err(e),
                    _ => Err(io::Error::new(io::ErrorKind::ConnectionAborted, "bus connection closed")),
                };
            }
            out = outbox.recv() => match out {
                Some(frame) => {
                    if let Err(e) = write_frame(&mut wr, &frame).await {
                        break Err(e);
                    }
                }
                None => break Ok(()),
            },
        }
    };
    reader.abort();
    result
}

async fn write_frame<W: AsyncWrite + Unpin>(wr: &mut W, frame: &[u8]) -> io::Result<()> {
    let len = u32::try_from(frame.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    wr.write_u32(len).await?;
    wr.write_all(frame).await?;
    wr.flush().await
}

async fn read_frame<R: AsyncRead + Unpin>(rd: &mut R) -> io::Result<Bytes> {
    let len = rd.read_u32().await? as usize;
    if len > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds {MAX_FRAME}"),
        ));
    }
    let mut buf = vec![0u8; len];
    rd.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

pub struct BusTransport {
    hub: Arc<BusHub>,
    topic: String,
    port: u16,
    capacity: usize,
}

impl BusTransport {
    pub fn new(hub: Arc<BusHub>, topic: impl Into<String>, port: u16, capacity: usize) -> Self {
        Self {
            hub,
            topic: topic.into(),
            port,
            capacity,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn link(&self, rt: &Handle) -> Arc<TopicLink> {
        self.hub.link(rt, &self.topic, self.port, self.capacity)
    }
}

#[async_trait]
impl Transport for BusTransport {
    fn kind(&self) -> &'static str {
        "bus"
    }

    async fn send(&self, payload: Bytes, _scope: PeerScope) -> Result<()> {
        if payload.len() > MAX_FRAME {
            return Err(RelayError::Transport(format!(
                "bus frame too large: {} bytes",
                payload.len()
            )));
        }
        let rt = Handle::try_current()
            .map_err(|e| RelayError::Transport(format!("bus send outside runtime: {e}")))?;
        let n = self.link(&rt).publish(payload);
        tracing::trace!(topic = %self.topic, local_subscribers = n, "bus publish");
        Ok(())
    }

    fn subscribe(&self, rt: &Handle, handler: InboundHandler) -> Result<Subscription> {
        let mut rx = self.link(rt).local.subscribe();
        let alive = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&alive);
        let topic = self.topic.clone();

        let task = rt.spawn(async move {
            while flag.load(Ordering::Acquire) {
                match rx.recv().await {
                    Ok(payload) => {
                        if !flag.load(Ordering::Acquire) {
                            break;
                        }
                        deliver(&handler, payload, "bus");
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(%topic, missed, "bus subscriber lagged; messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!(%topic, "bus listener stopped");
        });

        tracing::info!(topic = %self.topic, port = self.port, "bus listener started");
        Ok(Subscription::new(alive, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn free_port() -> u16 {
        let l = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        l.local_addr().unwrap().port()
    }

    fn collector() -> (InboundHandler, Arc<Mutex<Vec<Bytes>>>) {
        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&got);
        let handler: InboundHandler = Arc::new(move |b: Bytes| {
            sink.lock().unwrap().push(b);
            Ok(())
        });
        (handler, got)
    }

    async fn wait_for(got: &Arc<Mutex<Vec<Bytes>>>, n: usize) {
        timeout(Duration::from_secs(5), async {
            while got.lock().unwrap().len() < n {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn wait_linked(hub: &BusHub, topic: &str) {
        timeout(Duration::from_secs(5), async {
            while !hub.is_linked(topic) {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    /// Publish until `got` has a frame or the deadline passes; a freshly
    /// connected peer may miss the first frames.
    async fn publish_until_seen(from: &BusTransport, payload: &'static str, got: &Arc<Mutex<Vec<Bytes>>>) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut sent = 0;
        while got.lock().unwrap().is_empty() {
            assert!(Instant::now() < deadline, "frame never crossed the bus");
            from.send(Bytes::from(payload), PeerScope::Local).await.unwrap();
            sent += 1;
            sleep(Duration::from_millis(20)).await;
        }
        sent
    }

    #[test]
    fn topic_port_is_stable_and_in_private_range() {
        let p = topic_port(DEFAULT_TOPIC);
        assert_eq!(p, topic_port(DEFAULT_TOPIC));
        assert!(p >= 49152);
        assert_ne!(topic_port("a"), topic_port("b"));
    }

    #[tokio::test]
    async fn publish_reaches_all_local_subscribers_in_order() {
        let hub = Arc::new(BusHub::new());
        let port = free_port();
        let a = BusTransport::new(Arc::clone(&hub), "t-order", port, 16);
        let b = BusTransport::new(Arc::clone(&hub), "t-order", port, 16);
        let (ha, got_a) = collector();
        let (hb, got_b) = collector();
        let _sa = a.subscribe(&Handle::current(), ha).unwrap();
        let _sb = b.subscribe(&Handle::current(), hb).unwrap();
        assert_eq!(hub.subscriber_count("t-order"), 2);

        for m in ["1", "2", "3"] {
            a.send(Bytes::from(m), PeerScope::Local).await.unwrap();
        }
        wait_for(&got_a, 3).await;
        wait_for(&got_b, 3).await;

        let expect: Vec<Bytes> = ["1", "2", "3"].into_iter().map(Bytes::from).collect();
        assert_eq!(*got_a.lock().unwrap(), expect);
        assert_eq!(*got_b.lock().unwrap(), expect);
    }

    #[tokio::test]
    async fn topics_are_isolated_and_unsubscribed_listeners_go_quiet() {
        let hub = Arc::new(BusHub::new());
        let a = BusTransport::new(Arc::clone(&hub), "t-a", free_port(), 16);
        let other = BusTransport::new(Arc::clone(&hub), "t-b", free_port(), 16);
        let (h, got) = collector();
        let mut sub = a.subscribe(&Handle::current(), h).unwrap();

        other.send(Bytes::from("elsewhere"), PeerScope::Local).await.unwrap();
        a.send(Bytes::from("here"), PeerScope::Local).await.unwrap();
        wait_for(&got, 1).await;

        sub.close();
        a.send(Bytes::from("late"), PeerScope::Local).await.unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(*got.lock().unwrap(), vec![Bytes::from("here")]);
    }

    #[tokio::test]
    async fn independent_hubs_exchange_frames_both_ways() {
        let port = free_port();
        let hub_a = Arc::new(BusHub::new());
        let hub_b = Arc::new(BusHub::new());
        let a = BusTransport::new(Arc::clone(&hub_a), "t-cross", port, 64);
        let b = BusTransport::new(Arc::clone(&hub_b), "t-cross", port, 64);
        let (ha, got_a) = collector();
        let (hb, got_b) = collector();
        let _sa = a.subscribe(&Handle::current(), ha).unwrap();
        wait_linked(&hub_a, "t-cross").await;
        let _sb = b.subscribe(&Handle::current(), hb).unwrap();
        wait_linked(&hub_b, "t-cross").await;

        let sent_by_a = publish_until_seen(&a, "from-a", &got_b).await;
        sleep(Duration::from_millis(50)).await;
        // the publisher's own subscriber sees each frame once, never an echo
        assert_eq!(got_a.lock().unwrap().len(), sent_by_a);
        assert!(got_b.lock().unwrap().iter().all(|f| f == "from-a"));

        got_a.lock().unwrap().clear();
        publish_until_seen(&b, "from-b", &got_a).await;
        assert!(got_a.lock().unwrap().iter().all(|f| f == "from-b"));
    }

    #[tokio::test]
    async fn peers_re_elect_when_the_broker_leaves() {
        let port = free_port();
        let hub_a = Arc::new(BusHub::new());
        let a = BusTransport::new(Arc::clone(&hub_a), "t-elect", port, 16);
        let (ha, _) = collector();
        let sub_a = a.subscribe(&Handle::current(), ha).unwrap();
        wait_linked(&hub_a, "t-elect").await;

        let hub_b = Arc::new(BusHub::new());
        let b = BusTransport::new(Arc::clone(&hub_b), "t-elect", port, 16);
        let (hb, got_b) = collector();
        let _sb = b.subscribe(&Handle::current(), hb).unwrap();
        wait_linked(&hub_b, "t-elect").await;

        // broker process goes away
        drop(sub_a);
        drop(a);
        drop(hub_a);

        let hub_c = Arc::new(BusHub::new());
        let c = BusTransport::new(Arc::clone(&hub_c), "t-elect", port, 16);
        let (hc, _) = collector();
        let _sc = c.subscribe(&Handle::current(), hc).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !got_b.lock().unwrap().iter().any(|f| f == "from-c") {
            assert!(Instant::now() < deadline, "bus never re-formed");
            c.send(Bytes::from("from-c"), PeerScope::Local).await.unwrap();
            sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn foreign_listener_on_the_port_is_not_a_broker() {
        let squatter = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = squatter.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut s, _)) = squatter.accept().await {
                let _ = write_frame(&mut s, b"some-other-topic").await;
            }
        });

        let hub = Arc::new(BusHub::new());
        let t = BusTransport::new(Arc::clone(&hub), "t-squat", port, 4);
        let (h, got) = collector();
        let _sub = t.subscribe(&Handle::current(), h).unwrap();
        sleep(Duration::from_millis(100)).await;
        assert!(!hub.is_linked("t-squat"));

        // local delivery still works while unlinked
        t.send(Bytes::from("local"), PeerScope::Local).await.unwrap();
        wait_for(&got, 1).await;
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let hub = Arc::new(BusHub::new());
        let t = BusTransport::new(hub, "t-big", free_port(), 4);
        let big = Bytes::from(vec![0u8; MAX_FRAME + 1]);
        assert!(t.send(big, PeerScope::Network).await.is_err());
    }

    #[tokio::test]
    async fn frames_round_trip_through_the_codec() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, b"hello").await.unwrap();
        write_frame(&mut client, b"").await.unwrap();
        assert_eq!(read_frame(&mut server).await.unwrap(), Bytes::from("hello"));
        assert!(read_frame(&mut server).await.unwrap().is_empty());

        client.write_u32(MAX_FRAME as u32 + 1).await.unwrap();
        assert_eq!(
            read_frame(&mut server).await.unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }
}
