//! Whitelisted chat channels.
//!
//! Channels travel as the numeric codes of the host chat system so peers built
//! against older releases keep interoperating. Codes outside the whitelist are
//! rejected at decode time.

use std::fmt;
use std::str::FromStr;

use crate::error::{RelayError, Result};

/// Chat channel tag carried by every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Ls1,
    Ls2,
    Ls3,
    Ls4,
    Ls5,
    Ls6,
    Ls7,
    Ls8,
    FreeCompany,
    CrossWorldLs1,
}

impl Channel {
    /// Every whitelisted channel, in wire-code order.
    pub const ALL: [Channel; 10] = [
        Channel::Ls1,
        Channel::Ls2,
        Channel::Ls3,
        Channel::Ls4,
        Channel::Ls5,
        Channel::Ls6,
        Channel::Ls7,
        Channel::Ls8,
        Channel::FreeCompany,
        Channel::CrossWorldLs1,
    ];

    /// Numeric code used on the wire.
    pub fn code(self) -> u16 {
        match self {
            Channel::Ls1 => 16,
            Channel::Ls2 => 17,
            Channel::Ls3 => 18,
            Channel::Ls4 => 19,
            Channel::Ls5 => 20,
            Channel::Ls6 => 21,
            Channel::Ls7 => 22,
            Channel::Ls8 => 23,
            Channel::FreeCompany => 24,
            Channel::CrossWorldLs1 => 37,
        }
    }

    /// Short name used in configuration files and console input.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Ls1 => "ls1",
            Channel::Ls2 => "ls2",
            Channel::Ls3 => "ls3",
            Channel::Ls4 => "ls4",
            Channel::Ls5 => "ls5",
            Channel::Ls6 => "ls6",
            Channel::Ls7 => "ls7",
            Channel::Ls8 => "ls8",
            Channel::FreeCompany => "fc",
            Channel::CrossWorldLs1 => "cwls1",
        }
    }
}

impl TryFrom<u16> for Channel {
    type Error = RelayError;

    fn try_from(code: u16) -> Result<Self> {
        Channel::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or(RelayError::UnknownChannel(code))
    }
}

impl From<Channel> for u16 {
    fn from(c: Channel) -> u16 {
        c.code()
    }
}

impl FromStr for Channel {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| RelayError::Config(format!("unknown channel name: {s}")))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn codes_match_host_numbering() {
        assert_eq!(Channel::Ls1.code(), 16);
        assert_eq!(Channel::Ls8.code(), 23);
        assert_eq!(Channel::FreeCompany.code(), 24);
        assert_eq!(Channel::CrossWorldLs1.code(), 37);
    }

    #[test]
    fn rejects_codes_outside_whitelist() {
        for code in [0u16, 2, 10, 15, 25, 36, 38, u16::MAX] {
            let err = Channel::try_from(code).unwrap_err();
            assert_eq!(err.code().as_str(), "UNKNOWN_CHANNEL");
        }
    }

    #[test]
    fn parses_config_names() {
        assert_eq!("FC".parse::<Channel>().unwrap(), Channel::FreeCompany);
        assert_eq!(" ls3 ".parse::<Channel>().unwrap(), Channel::Ls3);
        assert!("say".parse::<Channel>().is_err());
    }
}
