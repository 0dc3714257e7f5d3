//! Line-oriented console host.
//!
//! Stands in for a chat client: stdin lines become chat events or control
//! commands, and everything the relay displays is written to the output sink.
//!
//! Input grammar:
//! - `/start <sender|receiver|relay>`, `/stop`, `/status`, `/quit`
//! - `<channel> <sender_id> <name>: <text>`, e.g. `ls1 7 Alice: hi`

use std::io::Write;
use std::sync::{Arc, Mutex};

use chatrelay_core::error::{RelayError, Result};
use chatrelay_core::protocol::{Channel, ChatText};

use crate::engine::Mode;
use crate::host::{ChatEntry, ChatEvent, ChatHost, ChatTap};

/// Parsed console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start(Mode),
    Stop,
    Status,
    Quit,
    Chat(ChatEvent),
    Empty,
}

pub fn parse_line(line: &str) -> Result<ConsoleCommand> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ConsoleCommand::Empty);
    }

    if let Some(rest) = line.strip_prefix('/') {
        let mut parts = rest.split_whitespace();
        return match (parts.next(), parts.next()) {
            (Some("start"), Some(mode)) => Ok(ConsoleCommand::Start(mode.parse()?)),
            (Some("start"), None) => Err(RelayError::Config(
                "usage: /start <sender|receiver|relay>".into(),
            )),
            (Some("stop"), _) => Ok(ConsoleCommand::Stop),
            (Some("status"), _) => Ok(ConsoleCommand::Status),
            (Some("quit"), _) | (Some("exit"), _) => Ok(ConsoleCommand::Quit),
            _ => Err(RelayError::Config(format!("unknown command: {line}"))),
        };
    }

    let mut parts = line.splitn(3, ' ');
    let (Some(ch), Some(id), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(RelayError::Config(
            "expected `<channel> <sender_id> <name>: <text>`".into(),
        ));
    };
    let channel: Channel = ch.parse()?;
    let sender_entity_id: u32 = id
        .parse()
        .map_err(|_| RelayError::Config(format!("sender id must be a number: {id}")))?;
    let (name, text) = rest
        .split_once(": ")
        .ok_or_else(|| RelayError::Config("missing `: ` between name and text".into()))?;

    Ok(ConsoleCommand::Chat(ChatEvent {
        channel,
        sender_entity_id,
        sender: ChatText::plain(name.trim()),
        message: ChatText::plain(text),
    }))
}

/// Console-backed `ChatHost`.
pub struct ConsoleHost {
    tap: Mutex<Option<Arc<dyn ChatTap>>>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleHost {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            tap: Mutex::new(None),
            out: Mutex::new(Box::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    pub fn is_tapped(&self) -> bool {
        self.tap.lock().map(|t| t.is_some()).unwrap_or(false)
    }

    /// Feed one locally typed chat line through the tap, then echo it unless
    /// the tap marked it handled.
    pub fn inject(&self, event: &ChatEvent) {
        let tap = self.tap.lock().ok().and_then(|t| t.clone());
        let mut handled = false;
        if let Some(tap) = tap {
            tap.on_chat(event, &mut handled);
        }
        if !handled {
            self.write_line(&format_line(
                event.channel,
                &event.sender,
                &event.message,
            ));
        }
    }

    fn write_line(&self, line: &str) {
        if let Ok(mut out) = self.out.lock() {
            if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
                tracing::warn!(error = %e, "console write failed");
            }
        }
    }
}

fn format_line(channel: Channel, sender: &ChatText, message: &ChatText) -> String {
    format!("[{channel}] {}: {}", sender.to_plain(), message.to_plain())
}

impl ChatHost for ConsoleHost {
    fn subscribe_chat(&self, tap: Arc<dyn ChatTap>) -> Result<()> {
        let mut slot = self
            .tap
            .lock()
            .map_err(|_| RelayError::Internal("console tap lock poisoned".into()))?;
        *slot = Some(tap);
        Ok(())
    }

    fn unsubscribe_chat(&self) {
        if let Ok(mut slot) = self.tap.lock() {
            *slot = None;
        }
    }

    fn print(&self, entry: ChatEntry) -> Result<()> {
        self.write_line(&format_line(entry.channel, &entry.sender, &entry.message));
        Ok(())
    }

    fn send_command(&self, line: &str) -> Result<()> {
        self.write_line(&format!("> {line}"));
        Ok(())
    }

    fn notify_status(&self, text: &str) {
        self.write_line(&format!("** {text}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    struct HideAll;

    impl ChatTap for HideAll {
        fn on_chat(&self, _: &ChatEvent, handled: &mut bool) {
            *handled = true;
        }
    }

    #[test]
    fn parses_chat_lines() {
        let cmd = parse_line("ls1 7 Alice: hi there").unwrap();
        let ConsoleCommand::Chat(ev) = cmd else { panic!("expected chat") };
        assert_eq!(ev.channel, Channel::Ls1);
        assert_eq!(ev.sender_entity_id, 7);
        assert_eq!(ev.sender.to_plain(), "Alice");
        assert_eq!(ev.message.to_plain(), "hi there");
    }

    #[test]
    fn parses_control_lines() {
        assert_eq!(parse_line("/start relay").unwrap(), ConsoleCommand::Start(Mode::Relay));
        assert_eq!(parse_line("/stop").unwrap(), ConsoleCommand::Stop);
        assert_eq!(parse_line("  ").unwrap(), ConsoleCommand::Empty);
        assert!(parse_line("/start sideways").is_err());
        assert!(parse_line("/dance").is_err());
    }

    #[test]
    fn rejects_malformed_chat_lines() {
        assert!(parse_line("say 1 Bob: hi").is_err());
        assert!(parse_line("ls1 x Bob: hi").is_err());
        assert!(parse_line("ls1 1 Bob hi").is_err());
    }

    #[test]
    fn handled_lines_are_not_echoed() {
        let cap = Capture::default();
        let host = ConsoleHost::new(cap.clone());
        let ev = ChatEvent {
            channel: Channel::FreeCompany,
            sender_entity_id: 1,
            sender: ChatText::plain("Bob"),
            message: ChatText::plain("yo"),
        };

        host.inject(&ev);
        host.subscribe_chat(Arc::new(HideAll)).unwrap();
        assert!(host.is_tapped());
        host.inject(&ev);
        host.unsubscribe_chat();
        host.send_command("/fc relayed");

        assert_eq!(cap.text(), "[fc] Bob: yo\n> /fc relayed\n");
    }
}
