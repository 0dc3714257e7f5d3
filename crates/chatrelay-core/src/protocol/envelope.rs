//! Relay envelope and its JSON wire record.
//!
//! Wire keys are short (`p`, `t`, `i`, `s`, `m`) and the two byte payloads are
//! base64. Missing optional fields default; unknown keys are ignored so newer
//! peers can add fields without breaking older ones.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};
use crate::protocol::channel::Channel;
use crate::protocol::richtext::{decode_or_plain, encode_or_plain, ChatText, TextCodec};

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u64 = 1;

/// One chat message in transit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    origin_id: u32,
    /// Destination/source channel.
    pub channel: Channel,
    /// Opaque sender id, passed through unchanged.
    pub sender_entity_id: u32,
    /// Encoded sender display name.
    pub sender_name: Bytes,
    /// Encoded message body.
    pub message: Bytes,
}

impl Envelope {
    pub fn new(
        origin_id: u32,
        channel: Channel,
        sender_entity_id: u32,
        sender_name: impl Into<Bytes>,
        message: impl Into<Bytes>,
    ) -> Self {
        Self {
            origin_id,
            channel,
            sender_entity_id,
            sender_name: sender_name.into(),
            message: message.into(),
        }
    }

    /// Build from rich text, encoding each field with `codec` (plain fallback).
    pub fn from_text(
        origin_id: u32,
        channel: Channel,
        sender_entity_id: u32,
        sender_name: &ChatText,
        message: &ChatText,
        codec: &dyn TextCodec,
    ) -> Self {
        Self::new(
            origin_id,
            channel,
            sender_entity_id,
            encode_or_plain(codec, sender_name),
            encode_or_plain(codec, message),
        )
    }

    /// Identity of the process that created this envelope.
    pub fn origin_id(&self) -> u32 {
        self.origin_id
    }

    pub fn decode_sender_name(&self, codec: &dyn TextCodec) -> Result<ChatText> {
        decode_or_plain(codec, &self.sender_name)
    }

    pub fn decode_message(&self, codec: &dyn TextCodec) -> Result<ChatText> {
        decode_or_plain(codec, &self.message)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(default = "default_version")]
    v: u64,
    p: u32,
    t: u16,
    #[serde(default)]
    i: u32,
    #[serde(default)]
    s: String,
    #[serde(default)]
    m: String,
}

fn default_version() -> u64 {
    PROTOCOL_VERSION
}

/// Serialize an envelope to its wire bytes.
pub fn try_encode(env: &Envelope) -> Result<Bytes> {
    let wire = WireEnvelope {
        v: PROTOCOL_VERSION,
        p: env.origin_id,
        t: env.channel.code(),
        i: env.sender_entity_id,
        s: STANDARD.encode(&env.sender_name),
        m: STANDARD.encode(&env.message),
    };
    serde_json::to_vec(&wire)
        .map(Bytes::from)
        .map_err(|e| RelayError::Codec(format!("envelope serialization failed: {e}")))
}

/// Infallible form of `try_encode`: a failure is logged and yields empty
/// bytes, which every peer rejects as a CODEC error.
pub fn encode(env: &Envelope) -> Bytes {
    try_encode(env).unwrap_or_else(|e| {
        tracing::error!(channel = %env.channel, error = %e, "envelope encode failed");
        Bytes::new()
    })
}

/// Parse wire bytes into an envelope.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let wire: WireEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| RelayError::Codec(format!("invalid envelope json: {e}")))?;

    if wire.v != PROTOCOL_VERSION {
        return Err(RelayError::UnsupportedVersion(wire.v));
    }
    let channel = Channel::try_from(wire.t)?;

    let sender_name = STANDARD
        .decode(wire.s.as_bytes())
        .map_err(|e| RelayError::Codec(format!("sender name not base64: {e}")))?;
    let message = STANDARD
        .decode(wire.m.as_bytes())
        .map_err(|e| RelayError::Codec(format!("message not base64: {e}")))?;

    Ok(Envelope::new(wire.p, channel, wire.i, sender_name, message))
}
