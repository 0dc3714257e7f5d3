//! Shared error type across chatRelay crates.

use thiserror::Error;

/// Stable error codes used in logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed envelope or rich-text bytes.
    Codec,
    /// Unsupported protocol version.
    UnsupportedVersion,
    /// Channel code outside the whitelist.
    UnknownChannel,
    /// Socket or bus failure.
    Transport,
    /// Host-side apply failure.
    Apply,
    /// Invalid configuration.
    Config,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in log fields and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Codec => "CODEC",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::UnknownChannel => "UNKNOWN_CHANNEL",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Apply => "APPLY",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Unified error type used by core and engine.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("codec: {0}")]
    Codec(String),
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u64),
    #[error("unknown channel code: {0}")]
    UnknownChannel(u16),
    #[error("transport: {0}")]
    Transport(String),
    #[error("apply: {0}")]
    Apply(String),
    #[error("config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl RelayError {
    /// Map an error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::Codec(_) => ErrorCode::Codec,
            RelayError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            RelayError::UnknownChannel(_) => ErrorCode::UnknownChannel,
            RelayError::Transport(_) => ErrorCode::Transport,
            RelayError::Apply(_) => ErrorCode::Apply,
            RelayError::Config(_) => ErrorCode::Config,
            RelayError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Transport(e.to_string())
    }
}
