//! Shared test utilities: an in-memory record store standing in for the
//! persistent engine, and the hashing policy the engine would normally apply.

#![allow(dead_code)]

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use oxipmem::index::HashHint;
use oxipmem::record::{PmemOffset, RecordAccessor, RecordHandle, RecordKind, RecordMeta};

/// Thread-safe in-memory record store. Handles are keyed by their payload,
/// which doubles as the allocation offset.
#[derive(Default)]
pub struct TestRecords {
    records: RwLock<HashMap<u64, (Vec<u8>, RecordMeta)>>,
    next_offset: AtomicU64,
    clock: AtomicU64,
}

impl TestRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record and return the handle a real engine would have
    /// allocated for it.
    pub fn put(&self, key: &[u8], value_len: u32, kind: RecordKind) -> RecordHandle {
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed) + 1;
        let meta = RecordMeta {
            timestamp: self.clock.fetch_add(1, Ordering::Relaxed) + 1,
            kind,
            key_len: key.len() as u32,
            value_len,
        };
        self.records.write().insert(offset, (key.to_vec(), meta));
        RecordHandle::StringRecord(PmemOffset(offset))
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }
}

impl RecordAccessor for TestRecords {
    fn key_bytes(&self, handle: &RecordHandle) -> Option<Cow<'_, [u8]>> {
        self.records
            .read()
            .get(&handle.payload())
            .map(|(key, _)| Cow::Owned(key.clone()))
    }

    fn record_meta(&self, handle: &RecordHandle) -> Option<RecordMeta> {
        self.records.read().get(&handle.payload()).map(|(_, m)| *m)
    }
}

/// FNV-1a, standing in for the engine's key hashing.
pub fn hash_key(key: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &byte in key {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Derive the hint the engine would pass down for `key`.
pub fn hint_for(key: &[u8], num_buckets: u64, num_slots: u64) -> HashHint {
    let hash = hash_key(key);
    HashHint {
        bucket: hash & (num_buckets - 1),
        slot: (hash % num_slots) as u32,
        hash,
    }
}

/// Hint forcing `key` into a chosen bucket, for chain-stress tests.
pub fn hint_in_bucket(key: &[u8], bucket: u64, num_slots: u64) -> HashHint {
    let hash = hash_key(key);
    HashHint {
        bucket,
        slot: (hash % num_slots) as u32,
        hash,
    }
}

/// Mask accepting string data and string tombstones.
pub fn string_mask() -> RecordKind {
    RecordKind::STRING_DATA | RecordKind::STRING_DELETE
}
