//! Hash entry codec for the bucket store
//!
//! Each index entry is a fixed 16-byte record: a packed header word (status,
//! handle kind, record kind, 32-bit key-hash prefix) plus a handle word. The
//! live in-bucket representation is [`AtomicHashEntry`]; lookups work on
//! value-type [`HashEntry`] snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::record::{HandleKind, RecordHandle, RecordKind};

/// Lifecycle status of a hash entry.
///
/// Transitions: `Empty -> Initializing -> Normal -> Updating -> Normal`.
/// `Initializing` marks a slot reserved for a brand-new key before its record
/// is published; recovery treats it as uncommitted. `Updating` marks a live
/// entry claimed by a writer for an in-place overwrite; readers may still
/// match it by key identity but must not trust its record as final.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryStatus {
    /// Initial state of every zeroed entry slot
    #[default]
    Empty = 0,
    /// Reserved by a writer for a new key, record not yet published
    Initializing = 1,
    /// Steady committed state
    Normal = 2,
    /// Claimed by a writer for an in-place overwrite
    Updating = 3,
}

impl EntryStatus {
    /// Decode a raw status byte
    #[inline]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Empty),
            1 => Some(Self::Initializing),
            2 => Some(Self::Normal),
            3 => Some(Self::Updating),
            _ => None,
        }
    }
}

/// Consistent 16-byte view of one index entry.
///
/// Header word layout (low to high bits): status (8), handle kind (8),
/// record kind (16), key-hash prefix (32). The handle word is the raw
/// payload of the tagged [`RecordHandle`].
///
/// `PartialEq` compares both words; the read path relies on this as its
/// byte-for-byte "did a writer touch this entry" check.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct HashEntry {
    header: u64,
    handle: u64,
}

impl HashEntry {
    /// The all-zero empty entry
    pub const EMPTY: Self = Self {
        header: 0,
        handle: 0,
    };

    const STATUS_SHIFT: u32 = 0;
    const HANDLE_KIND_SHIFT: u32 = 8;
    const RECORD_KIND_SHIFT: u32 = 16;
    const PREFIX_SHIFT: u32 = 32;

    /// Encode a new entry
    #[inline]
    pub const fn new(
        key_prefix: u32,
        kind: RecordKind,
        status: EntryStatus,
        handle: RecordHandle,
    ) -> Self {
        let header = ((status as u64) << Self::STATUS_SHIFT)
            | ((handle.kind().as_raw() as u64) << Self::HANDLE_KIND_SHIFT)
            | ((kind.bits() as u64) << Self::RECORD_KIND_SHIFT)
            | ((key_prefix as u64) << Self::PREFIX_SHIFT);
        Self {
            header,
            handle: handle.payload(),
        }
    }

    /// Rebuild an entry from its raw words
    #[inline]
    pub const fn from_words(header: u64, handle: u64) -> Self {
        Self { header, handle }
    }

    /// Get the raw header word
    #[inline]
    pub const fn header_word(&self) -> u64 {
        self.header
    }

    /// Get the raw handle word
    #[inline]
    pub const fn handle_word(&self) -> u64 {
        self.handle
    }

    /// Get the entry status. Unknown raw values decode as `Empty`, which the
    /// lookup engine rejects anyway.
    #[inline]
    pub fn status(&self) -> EntryStatus {
        let raw = (self.header >> Self::STATUS_SHIFT) as u8;
        EntryStatus::from_raw(raw).unwrap_or(EntryStatus::Empty)
    }

    /// Get the raw handle kind tag byte
    #[inline]
    pub const fn handle_kind_raw(&self) -> u8 {
        (self.header >> Self::HANDLE_KIND_SHIFT) as u8
    }

    /// Get the record type tag
    #[inline]
    pub const fn record_kind(&self) -> RecordKind {
        RecordKind::from_bits((self.header >> Self::RECORD_KIND_SHIFT) as u16)
    }

    /// Get the stored 32-bit key-hash prefix
    #[inline]
    pub const fn key_prefix(&self) -> u32 {
        (self.header >> Self::PREFIX_SHIFT) as u32
    }

    /// Decode the record handle. `None` if the kind tag is unrecognized,
    /// which callers treat as corruption (log and ignore).
    #[inline]
    pub fn handle(&self) -> Option<RecordHandle> {
        HandleKind::from_raw(self.handle_kind_raw())
            .map(|kind| RecordHandle::from_parts(kind, self.handle))
    }

    /// Check whether this entry's slot may be recycled for a new key: a
    /// committed entry whose record is a logical deletion.
    #[inline]
    pub fn is_reusable(&self) -> bool {
        self.status() == EntryStatus::Normal && self.record_kind().is_tombstone()
    }

    /// Copy of this entry with a different status
    #[inline]
    pub const fn with_status(&self, status: EntryStatus) -> Self {
        let header = (self.header & !0xFF) | (status as u64);
        Self {
            header,
            handle: self.handle,
        }
    }
}

impl std::fmt::Debug for HashEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashEntry")
            .field("status", &self.status())
            .field("record_kind", &self.record_kind())
            .field("handle_kind", &self.handle_kind_raw())
            .field("key_prefix", &self.key_prefix())
            .field("handle", &self.handle)
            .finish()
    }
}

/// Live in-bucket entry: two atomic words updated with the publish-copy
/// discipline.
///
/// `snapshot` and `publish` give an atomic-enough fixed-width copy: each word
/// is individually atomic, but the pair is not. A reader can observe a torn
/// header/handle combination; the read path's re-snapshot-compare retry is
/// what makes this safe. That retry assumes a writer's publish always changes
/// at least one word, which holds here because every publish moves the status
/// field through `Initializing`/`Updating` before returning to `Normal`.
#[derive(Debug, Default)]
pub struct AtomicHashEntry {
    header: AtomicU64,
    handle: AtomicU64,
}

impl AtomicHashEntry {
    /// Create an empty entry
    pub const fn empty() -> Self {
        Self {
            header: AtomicU64::new(0),
            handle: AtomicU64::new(0),
        }
    }

    /// Read a consistent-enough 16-byte copy of the entry
    #[inline]
    pub fn snapshot(&self) -> HashEntry {
        HashEntry {
            header: self.header.load(Ordering::Acquire),
            handle: self.handle.load(Ordering::Acquire),
        }
    }

    /// Publish a full entry.
    ///
    /// The handle word is stored before the header word, both with release
    /// ordering: a reader that observes the new header (and thus a non-empty
    /// status) also observes the new handle.
    #[inline]
    pub fn publish(&self, entry: HashEntry) {
        self.handle.store(entry.handle, Ordering::Release);
        self.header.store(entry.header, Ordering::Release);
    }

    /// Overwrite only the status field.
    ///
    /// Callers must hold the external per-slot write exclusivity; this is a
    /// plain read-modify-write, not a CAS.
    #[inline]
    pub fn set_status(&self, status: EntryStatus) {
        let header = self.header.load(Ordering::Relaxed);
        self.header
            .store((header & !0xFF) | (status as u64), Ordering::Release);
    }

    /// Reset the entry to the zeroed empty state
    #[inline]
    pub fn clear(&self) {
        self.handle.store(0, Ordering::Release);
        self.header.store(0, Ordering::Release);
    }
}
