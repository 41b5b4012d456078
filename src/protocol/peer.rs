//! Node-to-node protocol spoken between coordinators and store nodes

use super::{
    decode_id, decode_key, decode_versioned_value, encode_versioned_value, Key, RequestId,
    HEADER_BYTES, ID_BYTES, KEY_BYTES, LENGTH_BYTES, REQUEST_VERSION_OFFSET,
    RESPONSE_VERSION_OFFSET, VERSION_BYTES,
};
use crate::common::Result;
use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Put,
    Get,
    Heartbeat,
    Unknown(u8),
}

impl RequestType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => RequestType::Put,
            0x02 => RequestType::Get,
            0x03 => RequestType::Heartbeat,
            other => RequestType::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            RequestType::Put => 0x01,
            RequestType::Get => 0x02,
            RequestType::Heartbeat => 0x03,
            RequestType::Unknown(b) => b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Successful,
    NonExistentKey,
    OutOfSpace,
    HeartbeatAck,
    UnrecognizedCommand,
}

impl ResponseType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => ResponseType::Successful,
            0x02 => ResponseType::NonExistentKey,
            0x03 => ResponseType::OutOfSpace,
            0x04 => ResponseType::HeartbeatAck,
            _ => ResponseType::UnrecognizedCommand,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ResponseType::Successful => 0x01,
            ResponseType::NonExistentKey => 0x02,
            ResponseType::OutOfSpace => 0x03,
            ResponseType::HeartbeatAck => 0x04,
            ResponseType::UnrecognizedCommand => 0x00,
        }
    }
}

/// Request sent to a store node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRequest {
    pub id: RequestId,
    pub kind: RequestType,
    pub key: Key,
    /// Zero for ordinary writes, the explicit version for repair writes
    pub version: u16,
    pub value: Bytes,
}

impl StoreRequest {
    pub fn put(key: Key, value: Bytes, version: u16) -> Self {
        Self {
            id: RequestId::random(),
            kind: RequestType::Put,
            key,
            version,
            value,
        }
    }

    pub fn get(key: Key) -> Self {
        Self {
            id: RequestId::random(),
            kind: RequestType::Get,
            key,
            version: 0,
            value: Bytes::new(),
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            id: RequestId::random(),
            kind: RequestType::Heartbeat,
            key: Key::default(),
            version: 0,
            value: Bytes::new(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(
            HEADER_BYTES + KEY_BYTES + VERSION_BYTES + LENGTH_BYTES + self.value.len(),
        );
        dst.put_slice(self.id.as_bytes());
        dst.put_u8(self.kind.to_byte());
        dst.put_slice(self.key.as_bytes());
        encode_versioned_value(&mut dst, self.version, &self.value);
        dst.freeze()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let id = decode_id(buf)?;
        let kind = RequestType::from_byte(buf[ID_BYTES]);
        let key = decode_key(buf);
        let (version, value) = decode_versioned_value(buf, REQUEST_VERSION_OFFSET);
        Ok(Self {
            id,
            kind,
            key,
            version,
            value,
        })
    }
}

/// Reply from a store node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResponse {
    pub id: RequestId,
    pub kind: ResponseType,
    pub version: u16,
    pub value: Bytes,
}

impl StoreResponse {
    pub fn new(id: RequestId, kind: ResponseType) -> Self {
        Self::with_value(id, kind, 0, Bytes::new())
    }

    pub fn with_value(id: RequestId, kind: ResponseType, version: u16, value: Bytes) -> Self {
        Self {
            id,
            kind,
            version,
            value,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut dst =
            BytesMut::with_capacity(HEADER_BYTES + VERSION_BYTES + LENGTH_BYTES + self.value.len());
        dst.put_slice(self.id.as_bytes());
        dst.put_u8(self.kind.to_byte());
        encode_versioned_value(&mut dst, self.version, &self.value);
        dst.freeze()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let id = decode_id(buf)?;
        let kind = ResponseType::from_byte(buf[ID_BYTES]);
        let (version, value) = decode_versioned_value(buf, RESPONSE_VERSION_OFFSET);
        Ok(Self {
            id,
            kind,
            version,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MAX_REQUEST_BYTES, MAX_VALUE_BYTES};

    #[test]
    fn test_put_request_layout() {
        let req = StoreRequest::put(Key::from("k1"), Bytes::from_static(b"v1"), 0x0102);
        let buf = req.encode();

        assert_eq!(buf.len(), 16 + 1 + 32 + 2 + 2 + 2);
        assert_eq!(&buf[..16], req.id.as_bytes());
        assert_eq!(buf[16], 0x01);
        assert_eq!(&buf[17..19], b"k1");
        assert_eq!(&buf[49..51], &[0x02, 0x01]);
        assert_eq!(&buf[51..53], &[2, 0]);
        assert_eq!(&buf[53..], b"v1");

        assert_eq!(StoreRequest::decode(&buf).unwrap(), req);
    }

    #[test]
    fn test_heartbeat_and_get() {
        let hb = StoreRequest::decode(&StoreRequest::heartbeat().encode()).unwrap();
        assert_eq!(hb.kind, RequestType::Heartbeat);
        assert!(hb.value.is_empty());

        let get = StoreRequest::decode(&StoreRequest::get(Key::from("abc")).encode()).unwrap();
        assert_eq!(get.kind, RequestType::Get);
        assert_eq!(get.key, Key::from("abc"));
        assert_eq!(get.version, 0);
    }

    #[test]
    fn test_oversized_value_is_truncated() {
        let value = Bytes::from(vec![1u8; MAX_VALUE_BYTES * 2]);
        let buf = StoreRequest::put(Key::from("big"), value, 0).encode();
        assert_eq!(buf.len(), MAX_REQUEST_BYTES);
        let decoded = StoreRequest::decode(&buf).unwrap();
        assert_eq!(decoded.value.len(), MAX_VALUE_BYTES);
    }

    #[test]
    fn test_truncated_request() {
        // Header only: key, version and value all default
        let mut buf = vec![5u8; 16];
        buf.push(0x02);
        let req = StoreRequest::decode(&buf).unwrap();
        assert_eq!(req.kind, RequestType::Get);
        assert_eq!(req.key, Key::default());
        assert_eq!(req.version, 0);
        assert!(req.value.is_empty());

        assert!(StoreRequest::decode(&buf[..10]).is_err());
    }

    #[test]
    fn test_unknown_request_type() {
        let mut buf = StoreRequest::heartbeat().encode().to_vec();
        buf[16] = 0x7f;
        let req = StoreRequest::decode(&buf).unwrap();
        assert_eq!(req.kind, RequestType::Unknown(0x7f));
    }

    #[test]
    fn test_response_layout() {
        let id = RequestId::random();
        let res = StoreResponse::with_value(
            id,
            ResponseType::Successful,
            3,
            Bytes::from_static(b"value"),
        );
        let buf = res.encode();
        assert_eq!(buf.len(), 16 + 1 + 2 + 2 + 5);
        assert_eq!(buf[16], 0x01);
        assert_eq!(&buf[17..19], &[3, 0]);
        assert_eq!(StoreResponse::decode(&buf).unwrap(), res);
    }

    #[test]
    fn test_response_codes() {
        for kind in [
            ResponseType::Successful,
            ResponseType::NonExistentKey,
            ResponseType::OutOfSpace,
            ResponseType::HeartbeatAck,
            ResponseType::UnrecognizedCommand,
        ] {
            assert_eq!(ResponseType::from_byte(kind.to_byte()), kind);
        }
        assert_eq!(
            ResponseType::from_byte(0x42),
            ResponseType::UnrecognizedCommand
        );
    }

    #[test]
    fn test_short_response_reads_as_empty() {
        let id = RequestId::random();
        let mut buf = id.as_bytes().to_vec();
        buf.push(ResponseType::NonExistentKey.to_byte());
        let res = StoreResponse::decode(&buf).unwrap();
        assert_eq!(res.id, id);
        assert_eq!(res.kind, ResponseType::NonExistentKey);
        assert_eq!(res.version, 0);
        assert!(res.value.is_empty());
    }
}
