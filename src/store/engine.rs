//! Versioned in-memory key-value engine run by every store node
//!
//! Each key maps to a [`VersionedEntry`] behind its own mutex. The map lock is
//! only held long enough to find or create an entry, so writers to different
//! keys never wait on each other while writers to the same key serialize their
//! read-modify-write of the version.

use crate::protocol::{Key, RequestId, RequestType, ResponseType, StoreRequest, StoreResponse};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Peer writes remembered per key for duplicate detection
const RECENT_WRITES: usize = 16;

/// Stored value and its version
///
/// An empty value is an absent key: version 0 if never written, a tombstone
/// otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionedEntry {
    pub value: Bytes,
    pub version: u16,
    /// Latest peer writes applied here and their answers, so a
    /// retransmission is answered again instead of bumping the version twice
    recent: VecDeque<(RequestId, ResponseType)>,
}

impl VersionedEntry {
    pub fn is_absent(&self) -> bool {
        self.value.is_empty()
    }
}

/// Outcome of a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub status: ResponseType,
    pub version: u16,
    pub value: Bytes,
}

type Slot = Arc<Mutex<VersionedEntry>>;

/// Per-node store
#[derive(Debug, Default)]
pub struct StoreEngine {
    entries: RwLock<HashMap<Key, Slot>>,
    /// Maximum number of keys held, unbounded when `None`
    capacity: Option<usize>,
}

fn lock(slot: &Slot) -> MutexGuard<'_, VersionedEntry> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StoreEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Number of keys materialized, tombstones and never-written reads included
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the entry for `key`, if one was ever materialized
    pub fn entry(&self, key: &Key) -> Option<VersionedEntry> {
        let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).map(|slot| lock(slot).clone())
    }

    /// Slot for `key`, created as `(empty, 0)` when missing and room remains
    fn slot(&self, key: &Key) -> Option<Slot> {
        if let Some(slot) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Some(slot.clone());
        }

        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = map.get(key) {
            return Some(slot.clone());
        }
        if self.capacity.is_some_and(|cap| map.len() >= cap) {
            return None;
        }
        let slot = Slot::default();
        map.insert(*key, slot.clone());
        Some(slot)
    }

    pub fn get(&self, key: &Key) -> Lookup {
        let entry = match self.slot(key) {
            Some(slot) => lock(&slot).clone(),
            None => VersionedEntry::default(),
        };
        let status = if entry.is_absent() {
            ResponseType::NonExistentKey
        } else {
            ResponseType::Successful
        };
        Lookup {
            status,
            version: entry.version,
            value: entry.value,
        }
    }

    /// Apply a write.
    ///
    /// `version_hint > 0` stores `(value, version_hint)` as is. Zero bumps the
    /// current version by one, except that removing an absent key is reported
    /// as `NonExistentKey` and changes nothing.
    pub fn put(&self, key: &Key, value: Bytes, version_hint: u16) -> ResponseType {
        self.write(None, key, value, version_hint)
    }

    /// Apply the write carried by peer request `id` at most once.
    ///
    /// A repeat of one of the latest requests applied to `key` gets the same
    /// answer and leaves the entry alone.
    pub fn put_once(
        &self,
        id: RequestId,
        key: &Key,
        value: Bytes,
        version_hint: u16,
    ) -> ResponseType {
        self.write(Some(id), key, value, version_hint)
    }

    fn write(
        &self,
        id: Option<RequestId>,
        key: &Key,
        value: Bytes,
        version_hint: u16,
    ) -> ResponseType {
        let Some(slot) = self.slot(key) else {
            tracing::warn!(key = %key, "Store full, rejecting write");
            return ResponseType::OutOfSpace;
        };
        let mut entry = lock(&slot);

        let Some(id) = id else {
            return Self::apply(&mut entry, key, value, version_hint);
        };
        if let Some(&(_, status)) = entry.recent.iter().find(|(seen, _)| *seen == id) {
            tracing::debug!(id = %id, key = %key, "Duplicate write, not applied");
            return status;
        }

        let status = Self::apply(&mut entry, key, value, version_hint);
        if entry.recent.len() == RECENT_WRITES {
            entry.recent.pop_front();
        }
        entry.recent.push_back((id, status));
        status
    }

    fn apply(
        entry: &mut VersionedEntry,
        key: &Key,
        value: Bytes,
        version_hint: u16,
    ) -> ResponseType {
        if version_hint > 0 {
            entry.value = value;
            entry.version = version_hint;
            return ResponseType::Successful;
        }

        if entry.is_absent() && value.is_empty() {
            return ResponseType::NonExistentKey;
        }

        let Some(version) = entry.version.checked_add(1) else {
            tracing::warn!(key = %key, "Version space exhausted");
            return ResponseType::OutOfSpace;
        };
        entry.value = value;
        entry.version = version;
        ResponseType::Successful
    }

    pub fn heartbeat(&self) -> ResponseType {
        ResponseType::HeartbeatAck
    }

    /// Answer one raw peer datagram.
    ///
    /// Returns `None` when the datagram does not even carry a request id.
    pub fn handle(&self, datagram: &[u8]) -> Option<Bytes> {
        let request = match StoreRequest::decode(datagram) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("Rejecting datagram: {}", e);
                let id = RequestId::from_datagram(datagram)?;
                return Some(StoreResponse::new(id, ResponseType::UnrecognizedCommand).encode());
            }
        };

        let response = match request.kind {
            RequestType::Put => {
                let status =
                    self.put_once(request.id, &request.key, request.value, request.version);
                tracing::trace!(id = %request.id, key = %request.key, ?status, "PUT");
                StoreResponse::new(request.id, status)
            }
            RequestType::Get => {
                let lookup = self.get(&request.key);
                tracing::trace!(id = %request.id, key = %request.key, status = ?lookup.status, "GET");
                StoreResponse::with_value(request.id, lookup.status, lookup.version, lookup.value)
            }
            RequestType::Heartbeat => StoreResponse::new(request.id, self.heartbeat()),
            RequestType::Unknown(b) => {
                tracing::debug!(id = %request.id, "Unknown request type 0x{:02x}", b);
                StoreResponse::new(request.id, ResponseType::UnrecognizedCommand)
            }
        };
        Some(response.encode())
    }
}
