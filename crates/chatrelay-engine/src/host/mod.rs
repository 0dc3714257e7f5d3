//! Host capability seams.
//!
//! The relay never talks to a chat UI directly. A host adapter implements
//! `ChatHost` (event tap registration, display, command emission, status
//! lines) and drives `RedirectEngine::tick` from its own update loop.

pub mod console;

use std::sync::Arc;

use chatrelay_core::error::Result;
use chatrelay_core::protocol::{Channel, ChatText};

/// One chat line observed by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub channel: Channel,
    pub sender_entity_id: u32,
    pub sender: ChatText,
    pub message: ChatText,
}

/// One chat line the host is asked to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub channel: Channel,
    pub sender_entity_id: u32,
    pub sender: ChatText,
    pub message: ChatText,
}

/// Receives chat events while subscribed.
///
/// Setting `handled` hides the line from the host's default display.
pub trait ChatTap: Send + Sync {
    fn on_chat(&self, event: &ChatEvent, handled: &mut bool);
}

/// Capabilities the host exposes to the relay.
///
/// `print` and `send_command` are only called from `RedirectEngine::tick`,
/// i.e. on the host's own update thread.
pub trait ChatHost: Send + Sync {
    fn subscribe_chat(&self, tap: Arc<dyn ChatTap>) -> Result<()>;
    fn unsubscribe_chat(&self);
    fn print(&self, entry: ChatEntry) -> Result<()>;
    fn send_command(&self, line: &str) -> Result<()>;
    fn notify_status(&self, text: &str);
}
