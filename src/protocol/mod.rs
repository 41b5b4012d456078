//! Wire codec for the client and peer protocols
//!
//! Both protocols share one fixed-offset layout, all integers little-endian:
//!
//! ```text
//! request:  [ID:16][TYPE:1][KEY:32][VERSION:2][LEN:2][VALUE:LEN]
//! response: [ID:16][TYPE:1][VERSION:2][LEN:2][VALUE:LEN]
//! ```
//!
//! Values are capped at [`MAX_VALUE_BYTES`]. Encoders truncate longer input and
//! decoders read missing trailing fields as zero, so only a datagram too short
//! to carry an id and a type byte is rejected.

pub mod client;
pub mod peer;

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

pub use client::{ClientRequest, ClientResponse, Command, Status};
pub use peer::{RequestType, ResponseType, StoreRequest, StoreResponse};

pub const ID_BYTES: usize = 16;
pub const TYPE_BYTES: usize = 1;
pub const KEY_BYTES: usize = 32;
pub const VERSION_BYTES: usize = 2;
pub const LENGTH_BYTES: usize = 2;
pub const MAX_VALUE_BYTES: usize = 15_000;

/// Shortest decodable message: id plus type byte
pub const HEADER_BYTES: usize = ID_BYTES + TYPE_BYTES;
pub const MAX_REQUEST_BYTES: usize =
    HEADER_BYTES + KEY_BYTES + VERSION_BYTES + LENGTH_BYTES + MAX_VALUE_BYTES;
pub const MAX_RESPONSE_BYTES: usize = HEADER_BYTES + VERSION_BYTES + LENGTH_BYTES + MAX_VALUE_BYTES;

const REQUEST_VERSION_OFFSET: usize = HEADER_BYTES + KEY_BYTES;
const RESPONSE_VERSION_OFFSET: usize = HEADER_BYTES;

/// Random 16-byte token correlating a response with its request
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId([u8; ID_BYTES]);

impl RequestId {
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Id at the front of a datagram, if the datagram is long enough to hold one
    pub fn from_datagram(buf: &[u8]) -> Option<Self> {
        buf.get(..ID_BYTES)
            .and_then(|id| id.try_into().ok())
            .map(Self::from_bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", crate::common::short_hex(&self.0))
    }
}

/// Fixed-width 32-byte key; shorter input is zero-padded, longer input truncated
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Key([u8; KEY_BYTES]);

impl Key {
    pub fn new(bytes: &[u8]) -> Self {
        let mut key = [0u8; KEY_BYTES];
        let n = bytes.len().min(KEY_BYTES);
        key[..n].copy_from_slice(&bytes[..n]);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::new(s.as_bytes())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::common::hex_string(&self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", crate::common::short_hex(&self.0))
    }
}

fn decode_id(buf: &[u8]) -> crate::Result<RequestId> {
    if buf.len() < HEADER_BYTES {
        return Err(crate::Error::Malformed(format!(
            "datagram of {} bytes is shorter than the {}-byte header",
            buf.len(),
            HEADER_BYTES
        )));
    }
    RequestId::from_datagram(buf)
        .ok_or_else(|| crate::Error::Malformed("missing request id".into()))
}

fn decode_key(buf: &[u8]) -> Key {
    let end = buf.len().min(HEADER_BYTES + KEY_BYTES);
    Key::new(buf.get(HEADER_BYTES..end).unwrap_or_default())
}

/// Little-endian u16 at `offset`; absent bytes read as zero
fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    let lo = buf.get(offset).copied().unwrap_or(0);
    let hi = buf.get(offset + 1).copied().unwrap_or(0);
    u16::from_le_bytes([lo, hi])
}

/// `(version, value)` starting at `version_offset`, clamped to what the buffer holds
fn decode_versioned_value(buf: &[u8], version_offset: usize) -> (u16, Bytes) {
    let version = read_u16_le(buf, version_offset);
    let length_offset = version_offset + VERSION_BYTES;
    let length = (read_u16_le(buf, length_offset) as usize).min(MAX_VALUE_BYTES);
    let start = length_offset + LENGTH_BYTES;
    let value = match buf.get(start..) {
        Some(rest) => Bytes::copy_from_slice(&rest[..length.min(rest.len())]),
        None => Bytes::new(),
    };
    (version, value)
}

fn encode_versioned_value(dst: &mut BytesMut, version: u16, value: &[u8]) {
    let value = &value[..value.len().min(MAX_VALUE_BYTES)];
    dst.put_u16_le(version);
    dst.put_u16_le(value.len() as u16);
    dst.put_slice(value);
}
