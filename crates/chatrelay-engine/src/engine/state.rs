//! Engine mode and lifecycle state.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use chatrelay_core::error::RelayError;

/// Direction(s) the engine relays in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Capture outbound only.
    Sender,
    /// Inject inbound only.
    Receiver,
    /// Capture and inject on complementary channel sets.
    Relay,
}

impl Mode {
    pub fn captures(self) -> bool {
        matches!(self, Mode::Sender | Mode::Relay)
    }

    pub fn receives(self) -> bool {
        matches!(self, Mode::Receiver | Mode::Relay)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Sender => "Sender",
            Mode::Receiver => "Receiver",
            Mode::Relay => "Relay",
        }
    }
}

impl FromStr for Mode {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sender" => Ok(Mode::Sender),
            "receiver" => Ok(Mode::Receiver),
            "relay" => Ok(Mode::Relay),
            other => Err(RelayError::Config(format!("unknown mode: {other}"))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Active,
}

/// Snapshot of the engine's lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineState {
    pub status: Status,
    pub mode: Option<Mode>,
}

impl EngineState {
    pub const IDLE: EngineState = EngineState {
        status: Status::Idle,
        mode: None,
    };

    pub fn active(mode: Mode) -> Self {
        Self {
            status: Status::Active,
            mode: Some(mode),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::IDLE
    }
}
