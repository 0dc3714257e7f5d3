use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use bytes::Bytes;
use tokio::runtime::Handle;

use chatrelay_core::error::{RelayError, Result};
use chatrelay_core::guard;
use chatrelay_core::protocol::{self, Envelope, SegmentCodec, TextCodec};

use crate::config::{DeliveryKind, OutboundText, RelaySection};
use crate::dispatch::{DrainReport, QueueDispatcher};
use crate::engine::state::{EngineState, Mode};
use crate::host::{ChatEntry, ChatEvent, ChatHost, ChatTap};
use crate::obs::RelayMetrics;
use crate::policy::{CaptureDecision, CapturePolicy};
use crate::transport::{send_best_effort, InboundHandler, PeerScope, Subscription, Transport};

/// How inbound messages are applied on the host thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Print as a chat line on the envelope's channel.
    Display,
    /// Emit `"<prefix> <plain message>"` as an outgoing chat command.
    Command { prefix: String },
}

/// Engine construction options.
pub struct EngineOptions {
    pub origin_id: u32,
    pub policy: CapturePolicy,
    pub delivery: Delivery,
    pub outbound_text: OutboundText,
    pub scope: PeerScope,
    pub codec: Arc<dyn TextCodec>,
    pub metrics: Arc<RelayMetrics>,
}

impl EngineOptions {
    pub fn new(policy: CapturePolicy) -> Self {
        Self {
            origin_id: guard::process_origin_id(),
            policy,
            delivery: Delivery::Display,
            outbound_text: OutboundText::Rich,
            scope: PeerScope::Local,
            codec: Arc::new(SegmentCodec),
            metrics: Arc::new(RelayMetrics::new()),
        }
    }

    pub fn from_config(cfg: &RelaySection) -> Result<Self> {
        let delivery = match cfg.delivery {
            DeliveryKind::Display => Delivery::Display,
            DeliveryKind::Command => Delivery::Command {
                prefix: cfg.command_prefix.trim().to_string(),
            },
        };
        Ok(Self {
            delivery,
            outbound_text: cfg.outbound_text,
            scope: cfg.datagram.scope,
            ..Self::new(CapturePolicy::from_config(cfg)?)
        })
    }

    pub fn with_origin_id(mut self, origin_id: u32) -> Self {
        self.origin_id = origin_id;
        self
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn TextCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RelayMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Resources held while Active. Released in reverse order of acquisition.
#[derive(Default)]
struct Lifecycle {
    tap_subscribed: bool,
    subscription: Option<Subscription>,
}

impl Lifecycle {
    fn release(&mut self, host: &dyn ChatHost) {
        if let Some(mut sub) = self.subscription.take() {
            sub.close();
        }
        if self.tap_subscribed {
            host.unsubscribe_chat();
            self.tap_subscribed = false;
        }
    }
}

struct EngineInner {
    opts: EngineOptions,
    transport: Arc<dyn Transport>,
    host: Arc<dyn ChatHost>,
    runtime: Handle,
    queue: QueueDispatcher<ChatEntry>,
    /// Written only under `lifecycle`; read lock-free by listeners and the tap.
    active: AtomicBool,
    state: Mutex<EngineState>,
    lifecycle: Mutex<Lifecycle>,
}

/// Redirect engine: capture, send, receive, guard, queue, apply.
///
/// Cheap to clone; all clones drive the same engine.
#[derive(Clone)]
pub struct RedirectEngine {
    inner: Arc<EngineInner>,
}

impl RedirectEngine {
    pub fn new(
        opts: EngineOptions,
        transport: Arc<dyn Transport>,
        host: Arc<dyn ChatHost>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                opts,
                transport,
                host,
                runtime,
                queue: QueueDispatcher::closed(),
                active: AtomicBool::new(false),
                state: Mutex::new(EngineState::IDLE),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    pub fn origin_id(&self) -> u32 {
        self.inner.opts.origin_id
    }

    pub fn transport_kind(&self) -> &'static str {
        self.inner.transport.kind()
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        Arc::clone(&self.inner.opts.metrics)
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Subscribe the chat tap (and, when receiving, the transport).
    ///
    /// No-op while Active. On failure everything acquired so far is
    /// released, the engine stays Idle and the error is returned.
    pub fn start(&self, mode: Mode) -> Result<()> {
        let inner = &self.inner;
        let mut lc = inner.lifecycle();
        if inner.active.load(Ordering::Acquire) {
            tracing::debug!(%mode, "start ignored; already active");
            return Ok(());
        }

        // State first: the tap reads the mode as soon as it is subscribed.
        *inner.state() = EngineState::active(mode);
        inner.active.store(true, Ordering::Release);
        inner.queue.open();
        if let Err(e) = self.acquire(&mut lc, mode) {
            inner.active.store(false, Ordering::Release);
            inner.queue.close();
            lc.release(inner.host.as_ref());
            *inner.state() = EngineState::IDLE;
            tracing::error!(%mode, error = %e, "relay start failed");
            return Err(e);
        }
        drop(lc);

        tracing::info!(%mode, transport = inner.transport.kind(), origin_id = inner.opts.origin_id, "relay started");
        inner.host.notify_status(&format!("ChatRelay enabled ({mode})"));
        Ok(())
    }

    fn acquire(&self, lc: &mut Lifecycle, mode: Mode) -> Result<()> {
        let inner = &self.inner;
        if mode.receives() {
            let weak = Arc::downgrade(inner);
            let handler: InboundHandler = Arc::new(move |payload: Bytes| on_inbound(&weak, payload));
            lc.subscription = Some(inner.transport.subscribe(&inner.runtime, handler)?);
        }

        let tap: Arc<dyn ChatTap> = Arc::new(Tap(Arc::downgrade(inner)));
        inner.host.subscribe_chat(tap)?;
        lc.tap_subscribed = true;
        Ok(())
    }

    /// Unsubscribe everything and return to Idle. No-op while Idle.
    ///
    /// Messages still queued are discarded.
    pub fn stop(&self) {
        let inner = &self.inner;
        let mut lc = inner.lifecycle();
        if !inner.active.load(Ordering::Acquire) {
            tracing::debug!("stop ignored; already idle");
            return;
        }

        inner.active.store(false, Ordering::Release);
        let dropped = inner.queue.close();
        lc.release(inner.host.as_ref());
        *inner.state() = EngineState::IDLE;
        inner.opts.metrics.queue_depth.set(&[], 0);
        drop(lc);
        tracing::info!(dropped, "relay stopped");
        inner.host.notify_status("ChatRelay disabled");
    }

    /// Host update hook: apply everything received since the last tick.
    ///
    /// Must be called from the host's own update thread.
    pub fn tick(&self) -> DrainReport {
        let inner = &self.inner;
        let metrics = &inner.opts.metrics;
        let started = Instant::now();

        let mut errors = 0usize;
        let report = inner.queue.drain_and_apply(|entry| {
            inner.apply(entry).map_err(|e| {
                metrics.apply_errors.inc(&[("code", e.code().as_str())]);
                errors += 1;
                e
            })
        });

        if report.total() > 0 {
            metrics.drain_duration.observe(&[], started.elapsed());
            // the remainder were panics caught by the dispatcher
            let panicked = report.failed.saturating_sub(errors);
            if panicked > 0 {
                metrics.apply_errors.add(&[("code", "INTERNAL")], panicked as u64);
            }
        }
        metrics.queue_depth.set(&[], inner.queue.len() as i64);
        report
    }
}

impl EngineInner {
    // Start/stop and the tap only run on the host thread; poisoning would
    // mean a panic mid-transition, and the stored values are still usable.
    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn on_chat(&self, event: &ChatEvent, handled: &mut bool) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let Some(mode) = self.state().mode else {
            return;
        };

        match self.opts.policy.check(mode, event.channel) {
            CaptureDecision::Ignore => {}
            CaptureDecision::Suppress => *handled = true,
            CaptureDecision::Forward { suppress } => {
                if suppress {
                    *handled = true;
                }
                let env = self.build_envelope(event);
                tracing::debug!(channel = %env.channel, sender_id = env.sender_entity_id, "captured chat event");
                let payload = match protocol::try_encode(&env) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::error!(channel = %env.channel, error = %e, "envelope encode failed; not sent");
                        self.opts
                            .metrics
                            .send_failures
                            .inc(&[("transport", self.transport.kind())]);
                        return;
                    }
                };
                send_best_effort(
                    &self.runtime,
                    Arc::clone(&self.transport),
                    payload,
                    self.opts.scope,
                    Arc::clone(&self.opts.metrics),
                );
            }
        }
    }

    fn build_envelope(&self, event: &ChatEvent) -> Envelope {
        let codec = self.opts.codec.as_ref();
        let name = protocol::richtext::encode_or_plain(codec, &event.sender);
        let message = match self.opts.outbound_text {
            OutboundText::Rich => protocol::richtext::encode_or_plain(codec, &event.message),
            OutboundText::Plain => Bytes::from(event.message.to_plain()),
        };
        Envelope::new(
            self.opts.origin_id,
            event.channel,
            event.sender_entity_id,
            name,
            message,
        )
    }

    /// Listener-side half: decode, guard, queue. Never touches the host.
    fn receive(&self, payload: &[u8]) -> Result<()> {
        let metrics = &self.opts.metrics;
        let count_decode_error = |e: RelayError| {
            metrics.decode_errors.inc(&[("code", e.code().as_str())]);
            e
        };

        let env = protocol::decode(payload).map_err(count_decode_error)?;
        if guard::is_self(&env, self.opts.origin_id) {
            metrics.loopback_drops.inc(&[]);
            tracing::trace!(channel = %env.channel, "own envelope dropped");
            return Ok(());
        }

        let codec = self.opts.codec.as_ref();
        let entry = ChatEntry {
            channel: env.channel,
            sender_entity_id: env.sender_entity_id,
            sender: env.decode_sender_name(codec).map_err(count_decode_error)?,
            message: env.decode_message(codec).map_err(count_decode_error)?,
        };

        // The queue is closed by stop() under its own lock, so this is the
        // only liveness check that cannot race it.
        if !self.queue.enqueue(entry) {
            metrics.late_drops.inc(&[]);
            return Ok(());
        }
        metrics.queue_depth.set(&[], self.queue.len() as i64);
        Ok(())
    }

    /// Host-thread half: hand one entry to the host.
    fn apply(&self, entry: ChatEntry) -> Result<()> {
        let label = match &self.opts.delivery {
            Delivery::Display => {
                self.host.print(entry)?;
                "display"
            }
            Delivery::Command { prefix } => {
                let text = entry.message.to_plain();
                if text.trim().is_empty() {
                    return Err(RelayError::Apply("empty message; nothing to emit".into()));
                }
                self.host.send_command(&format!("{prefix} {text}"))?;
                "command"
            }
        };
        self.opts.metrics.applied.inc(&[("delivery", label)]);
        Ok(())
    }
}

fn on_inbound(engine: &Weak<EngineInner>, payload: Bytes) -> Result<()> {
    match engine.upgrade() {
        Some(inner) if inner.active.load(Ordering::Acquire) => inner.receive(&payload),
        Some(inner) => {
            inner.opts.metrics.late_drops.inc(&[]);
            Ok(())
        }
        None => Ok(()),
    }
}

/// Chat tap handed to the host. Holds the engine weakly so a host that keeps
/// a stale tap around cannot keep the engine alive.
struct Tap(Weak<EngineInner>);

impl ChatTap for Tap {
    fn on_chat(&self, event: &ChatEvent, handled: &mut bool) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_chat(event, handled);
        }
    }
}
