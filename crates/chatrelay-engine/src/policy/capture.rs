//! Capture policy: which chat channels are redirected and which are hidden.

use chatrelay_core::error::Result;
use chatrelay_core::protocol::Channel;

use crate::config::RelaySection;
use crate::engine::Mode;

/// What to do with one observed chat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDecision {
    /// Leave the event alone.
    Ignore,
    /// Hide the event locally; do not send it.
    Suppress,
    /// Send the event; hide it locally when `suppress` is set.
    Forward { suppress: bool },
}

/// Compiled capture/suppress channel sets.
#[derive(Debug, Clone, Default)]
pub struct CapturePolicy {
    capture: Vec<Channel>,
    suppress: Vec<Channel>,
}

impl CapturePolicy {
    pub fn new(capture: Vec<Channel>, suppress: Vec<Channel>) -> Self {
        Self { capture, suppress }
    }

    pub fn from_config(cfg: &RelaySection) -> Result<Self> {
        Ok(Self::new(cfg.capture_channels()?, cfg.suppress_channels()?))
    }

    pub fn captures(&self, channel: Channel) -> bool {
        self.capture.contains(&channel)
    }

    pub fn suppresses(&self, channel: Channel) -> bool {
        self.suppress.contains(&channel)
    }

    /// Suppression applies in every mode: a redirect-only channel is never
    /// shown raw, even by a receiver.
    pub fn check(&self, mode: Mode, channel: Channel) -> CaptureDecision {
        let suppress = self.suppresses(channel);
        if mode.captures() && self.captures(channel) {
            return CaptureDecision::Forward { suppress };
        }
        if suppress {
            CaptureDecision::Suppress
        } else {
            CaptureDecision::Ignore
        }
    }
}
