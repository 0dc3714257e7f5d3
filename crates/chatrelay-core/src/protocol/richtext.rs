//! Rich chat text and its byte encodings.
//!
//! `TextCodec` is the seam for a host-provided rich-text library.
//! `SegmentCodec` is the built-in structured format:
//! - text runs are raw UTF-8
//! - payloads are framed as `0x02, kind, len, data[len], 0x03`
//!
//! Peers on other versions may not share the structured format, so both
//! directions fall back to plain UTF-8 (`encode_or_plain` / `decode_or_plain`).

use bytes::{Buf, Bytes};

use crate::error::{RelayError, Result};

/// Payload start marker.
pub const PAYLOAD_START: u8 = 0x02;
/// Payload end marker.
pub const PAYLOAD_END: u8 = 0x03;

/// One piece of rich text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Displayable text.
    Text(String),
    /// Opaque host payload (links, icons, colors...).
    Payload { kind: u8, data: Bytes },
}

/// Rich chat text: an ordered list of segments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatText {
    segments: Vec<Segment>,
}

impl ChatText {
    /// Text with a single plain run.
    pub fn plain(s: impl Into<String>) -> Self {
        let mut t = Self::default();
        t.push_text(s);
        t
    }

    /// Append a text run, merging with a trailing run.
    pub fn push_text(&mut self, s: impl Into<String>) {
        let s = s.into();
        if s.is_empty() {
            return;
        }
        match self.segments.last_mut() {
            Some(Segment::Text(prev)) => prev.push_str(&s),
            _ => self.segments.push(Segment::Text(s)),
        }
    }

    /// Append an opaque payload.
    pub fn push_payload(&mut self, kind: u8, data: impl Into<Bytes>) {
        self.segments.push(Segment::Payload {
            kind,
            data: data.into(),
        });
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Text runs only; payloads are dropped.
    pub fn to_plain(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text(t) => Some(t.as_str()),
                Segment::Payload { .. } => None,
            })
            .collect()
    }
}

/// Structured encode/decode capability for chat text.
pub trait TextCodec: Send + Sync {
    fn encode(&self, text: &ChatText) -> Result<Bytes>;
    fn decode(&self, bytes: &[u8]) -> Result<ChatText>;
}

/// Built-in marker-framed codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct SegmentCodec;

impl TextCodec for SegmentCodec {
    fn encode(&self, text: &ChatText) -> Result<Bytes> {
        let mut out = Vec::new();
        for seg in text.segments() {
            match seg {
                Segment::Text(t) => {
                    if t.bytes().any(|b| b == PAYLOAD_START || b == PAYLOAD_END) {
                        return Err(RelayError::Codec("text run contains marker byte".into()));
                    }
                    out.extend_from_slice(t.as_bytes());
                }
                Segment::Payload { kind, data } => {
                    let len = u8::try_from(data.len()).map_err(|_| {
                        RelayError::Codec(format!("payload too long: {} bytes", data.len()))
                    })?;
                    out.push(PAYLOAD_START);
                    out.push(*kind);
                    out.push(len);
                    out.extend_from_slice(data);
                    out.push(PAYLOAD_END);
                }
            }
        }
        Ok(Bytes::from(out))
    }

    fn decode(&self, bytes: &[u8]) -> Result<ChatText> {
        let mut buf = bytes;
        let mut text = ChatText::default();

        while buf.has_remaining() {
            if buf.chunk().first() == Some(&PAYLOAD_START) {
                // marker, kind, len
                if buf.remaining() < 3 {
                    return Err(RelayError::Codec("payload header truncated".into()));
                }
                buf.advance(1);
                let kind = buf.get_u8();
                let len = buf.get_u8() as usize;
                if buf.remaining() < len + 1 {
                    return Err(RelayError::Codec("payload body truncated".into()));
                }
                let data = buf.copy_to_bytes(len);
                if buf.get_u8() != PAYLOAD_END {
                    return Err(RelayError::Codec("payload missing end marker".into()));
                }
                text.push_payload(kind, data);
                continue;
            }

            let run_len = buf
                .iter()
                .position(|&b| b == PAYLOAD_START)
                .unwrap_or(buf.len());
            let (run, rest) = buf.split_at(run_len);
            if run.contains(&PAYLOAD_END) {
                return Err(RelayError::Codec("stray end marker".into()));
            }
            let s = std::str::from_utf8(run)
                .map_err(|e| RelayError::Codec(format!("text run not utf-8: {e}")))?;
            text.push_text(s);
            buf = rest;
        }

        Ok(text)
    }
}

/// Structured encode, falling back to the plain UTF-8 text.
pub fn encode_or_plain(codec: &dyn TextCodec, text: &ChatText) -> Bytes {
    match codec.encode(text) {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!(error = %e, "structured encode failed; sending plain text");
            Bytes::from(text.to_plain())
        }
    }
}

/// Structured decode, falling back to strict UTF-8.
///
/// Fails only when the bytes are neither; callers discard the message.
pub fn decode_or_plain(codec: &dyn TextCodec, bytes: &[u8]) -> Result<ChatText> {
    match codec.decode(bytes) {
        Ok(t) => Ok(t),
        Err(structured) => match std::str::from_utf8(bytes) {
            Ok(s) => {
                tracing::debug!(error = %structured, "structured decode failed; using plain text");
                Ok(ChatText::plain(s))
            }
            Err(e) => Err(RelayError::Codec(format!(
                "neither rich text ({structured}) nor utf-8 ({e})"
            ))),
        },
    }
}
