//! Client-to-coordinator protocol
//!
//! Mirrors the peer layout with its own command and status codes. Requests
//! carry the key for every command except SHUTDOWN, and version/length/value
//! only for PUT. Responses always carry the version and length fields.

use super::{
    decode_id, decode_key, decode_versioned_value, encode_versioned_value, Key, RequestId,
    HEADER_BYTES, ID_BYTES, KEY_BYTES, LENGTH_BYTES, REQUEST_VERSION_OFFSET,
    RESPONSE_VERSION_OFFSET, VERSION_BYTES,
};
use crate::common::Result;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Put,
    Get,
    Remove,
    Shutdown,
    Unknown(u8),
}

impl Command {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => Command::Put,
            0x02 => Command::Get,
            0x03 => Command::Remove,
            0x04 => Command::Shutdown,
            other => Command::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Command::Put => 0x01,
            Command::Get => 0x02,
            Command::Remove => 0x03,
            Command::Shutdown => 0x04,
            Command::Unknown(b) => b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Successful,
    NonExistentKey,
    OutOfSpace,
    SystemOverload,
    InternalFailure,
    UnrecognizedCommand,
}

impl Status {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => Status::Successful,
            0x01 => Status::NonExistentKey,
            0x02 => Status::OutOfSpace,
            0x03 => Status::SystemOverload,
            0x04 => Status::InternalFailure,
            _ => Status::UnrecognizedCommand,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Status::Successful => 0x00,
            Status::NonExistentKey => 0x01,
            Status::OutOfSpace => 0x02,
            Status::SystemOverload => 0x03,
            Status::InternalFailure => 0x04,
            Status::UnrecognizedCommand => 0x05,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Successful => "SUCCESSFUL",
            Status::NonExistentKey => "NON_EXISTENT_KEY",
            Status::OutOfSpace => "OUT_OF_SPACE",
            Status::SystemOverload => "SYSTEM_OVERLOAD",
            Status::InternalFailure => "INTERNAL_FAILURE",
            Status::UnrecognizedCommand => "UNRECOGNIZED_COMMAND",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub id: RequestId,
    pub command: Command,
    pub key: Key,
    pub version: u16,
    pub value: Bytes,
}

impl ClientRequest {
    fn new(command: Command, key: Key, value: Bytes) -> Self {
        Self {
            id: RequestId::random(),
            command,
            key,
            version: 0,
            value,
        }
    }

    pub fn put(key: Key, value: Bytes) -> Self {
        Self::new(Command::Put, key, value)
    }

    pub fn get(key: Key) -> Self {
        Self::new(Command::Get, key, Bytes::new())
    }

    pub fn remove(key: Key) -> Self {
        Self::new(Command::Remove, key, Bytes::new())
    }

    pub fn shutdown() -> Self {
        Self::new(Command::Shutdown, Key::default(), Bytes::new())
    }

    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(
            HEADER_BYTES + KEY_BYTES + VERSION_BYTES + LENGTH_BYTES + self.value.len(),
        );
        dst.put_slice(self.id.as_bytes());
        dst.put_u8(self.command.to_byte());
        match self.command {
            Command::Put => {
                dst.put_slice(self.key.as_bytes());
                encode_versioned_value(&mut dst, self.version, &self.value);
            }
            Command::Get | Command::Remove => dst.put_slice(self.key.as_bytes()),
            Command::Shutdown | Command::Unknown(_) => {}
        }
        dst.freeze()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let id = decode_id(buf)?;
        let command = Command::from_byte(buf[ID_BYTES]);
        let key = decode_key(buf);
        let (version, value) = decode_versioned_value(buf, REQUEST_VERSION_OFFSET);
        Ok(Self {
            id,
            command,
            key,
            version,
            value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResponse {
    pub id: RequestId,
    pub status: Status,
    pub version: u16,
    pub value: Bytes,
}

impl ClientResponse {
    pub fn new(id: RequestId, status: Status) -> Self {
        Self::with_value(id, status, 0, Bytes::new())
    }

    pub fn with_value(id: RequestId, status: Status, version: u16, value: Bytes) -> Self {
        Self {
            id,
            status,
            version,
            value,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut dst =
            BytesMut::with_capacity(HEADER_BYTES + VERSION_BYTES + LENGTH_BYTES + self.value.len());
        dst.put_slice(self.id.as_bytes());
        dst.put_u8(self.status.to_byte());
        encode_versioned_value(&mut dst, self.version, &self.value);
        dst.freeze()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let id = decode_id(buf)?;
        let status = Status::from_byte(buf[ID_BYTES]);
        let (version, value) = decode_versioned_value(buf, RESPONSE_VERSION_OFFSET);
        Ok(Self {
            id,
            status,
            version,
            value,
        })
    }
}
