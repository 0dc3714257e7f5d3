//! Protocol modules (envelope wire record, channels, rich text).
//!
//! All parsers are panic-free: malformed input is reported as `RelayError`
//! instead of panicking or indexing raw buffers, so a hostile or corrupt
//! datagram can only ever be discarded.

pub mod channel;
pub mod envelope;
pub mod richtext;

pub use channel::Channel;
pub use envelope::{decode, encode, try_encode, Envelope, PROTOCOL_VERSION};
pub use richtext::{ChatText, Segment, SegmentCodec, TextCodec};
