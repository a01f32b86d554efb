//! Record types and the accessor boundary of the hash index
//!
//! The index never interprets the records it points to. Every entry carries a
//! [`RecordKind`] type tag and a [`RecordHandle`] reference; the engine above
//! resolves both through its [`RecordAccessor`] implementation.

use std::borrow::Cow;
use std::fmt;

/// Bitmask-compatible record type tag stored in each hash entry.
///
/// Searches match with a bitwise AND against a caller-supplied mask, so a
/// single lookup can accept several kinds (e.g. data and tombstone of the
/// same namespace).
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RecordKind(u16);

impl RecordKind {
    /// No record kind
    pub const NONE: Self = Self(0);
    /// String key-value record
    pub const STRING_DATA: Self = Self(1);
    /// String tombstone record (logical delete)
    pub const STRING_DELETE: Self = Self(1 << 1);
    /// Element record of a sorted collection (doubly linked)
    pub const SORTED_DATA: Self = Self(1 << 2);
    /// Tombstone element of a sorted collection
    pub const SORTED_DELETE: Self = Self(1 << 3);
    /// Header record of a sorted collection
    pub const SORTED_HEADER: Self = Self(1 << 4);
    /// Element record of an unordered collection (doubly linked)
    pub const HASH_ELEM: Self = Self(1 << 5);
    /// Header record of an unordered collection
    pub const HASH_HEADER: Self = Self(1 << 6);
    /// Header record of a queue
    pub const QUEUE_HEADER: Self = Self(1 << 7);

    /// Kinds whose records represent a logical deletion; entries carrying
    /// them are candidates for in-place slot reuse.
    pub const TOMBSTONE: Self = Self(Self::STRING_DELETE.0 | Self::SORTED_DELETE.0);

    /// Mask accepting every kind
    pub const ANY: Self = Self(u16::MAX);

    /// Create a kind from its raw bit pattern
    #[inline]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Get the raw bit pattern
    #[inline]
    pub const fn bits(&self) -> u16 {
        self.0
    }

    /// Check whether this kind shares any bit with `mask`
    #[inline]
    pub const fn intersects(&self, mask: RecordKind) -> bool {
        (self.0 & mask.0) != 0
    }

    /// Check whether this kind marks a logically deleted record
    #[inline]
    pub const fn is_tombstone(&self) -> bool {
        self.intersects(Self::TOMBSTONE)
    }
}

impl std::ops::BitOr for RecordKind {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordKind({:#06x})", self.0)
    }
}

/// Discriminant of the handle union stored in a hash entry.
///
/// Each kind resolves its key differently: string and dl-records keep the key
/// inline, collection and queue headers expose a name, skip-list nodes
/// indirect through their backing record.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Direct persistent string record
    StringRecord = 1,
    /// Doubly linked record (element of an ordered or unordered collection)
    DlRecord = 2,
    /// Unordered collection header
    HashCollection = 3,
    /// Queue header
    Queue = 4,
    /// DRAM skip-list node owning a persistent record pointer
    SkiplistNode = 5,
    /// Skip-list (sorted collection) header
    Skiplist = 6,
}

impl HandleKind {
    /// Decode a raw tag byte. `None` for unrecognized values, which callers
    /// must treat as an invariant break (log and ignore the entry).
    #[inline]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::StringRecord),
            2 => Some(Self::DlRecord),
            3 => Some(Self::HashCollection),
            4 => Some(Self::Queue),
            5 => Some(Self::SkiplistNode),
            6 => Some(Self::Skiplist),
            _ => None,
        }
    }

    /// Get the raw tag byte
    #[inline]
    pub const fn as_raw(&self) -> u8 {
        *self as u8
    }
}

/// Reference from a hash entry to the record holding the key/value payload.
///
/// This is the typed rendition of what the entry codec packs into its second
/// word: either a direct reference into persistent memory, or a reference to
/// a DRAM-side structure that itself owns a persistent record pointer. The
/// payloads are opaque to the index; only the [`RecordAccessor`] gives them
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordHandle {
    /// Direct persistent string record
    StringRecord(PmemOffset),
    /// Doubly linked record element
    DlRecord(PmemOffset),
    /// Unordered collection header
    HashCollection(CollectionRef),
    /// Queue header
    Queue(CollectionRef),
    /// DRAM skip-list node
    SkiplistNode(IndexNodeRef),
    /// Skip-list header
    Skiplist(CollectionRef),
}

impl RecordHandle {
    /// Get the handle kind discriminant
    #[inline]
    pub const fn kind(&self) -> HandleKind {
        match self {
            Self::StringRecord(_) => HandleKind::StringRecord,
            Self::DlRecord(_) => HandleKind::DlRecord,
            Self::HashCollection(_) => HandleKind::HashCollection,
            Self::Queue(_) => HandleKind::Queue,
            Self::SkiplistNode(_) => HandleKind::SkiplistNode,
            Self::Skiplist(_) => HandleKind::Skiplist,
        }
    }

    /// Get the raw 64-bit payload
    #[inline]
    pub const fn payload(&self) -> u64 {
        match self {
            Self::StringRecord(p) | Self::DlRecord(p) => p.0,
            Self::HashCollection(c) | Self::Queue(c) | Self::Skiplist(c) => c.0,
            Self::SkiplistNode(n) => n.0,
        }
    }

    /// Reassemble a handle from its codec parts
    #[inline]
    pub const fn from_parts(kind: HandleKind, payload: u64) -> Self {
        match kind {
            HandleKind::StringRecord => Self::StringRecord(PmemOffset(payload)),
            HandleKind::DlRecord => Self::DlRecord(PmemOffset(payload)),
            HandleKind::HashCollection => Self::HashCollection(CollectionRef(payload)),
            HandleKind::Queue => Self::Queue(CollectionRef(payload)),
            HandleKind::SkiplistNode => Self::SkiplistNode(IndexNodeRef(payload)),
            HandleKind::Skiplist => Self::Skiplist(CollectionRef(payload)),
        }
    }
}

/// Opaque offset of a record in persistent memory
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PmemOffset(pub u64);

/// Opaque reference to a collection header owned by the engine
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionRef(pub u64);

/// Opaque reference to a DRAM-side index node (skip-list style)
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexNodeRef(pub u64);

/// Fixed metadata header of a stored record.
///
/// Copied into caller-provided storage during a match so the engine can
/// inspect record metadata without a second dereference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordMeta {
    /// Engine timestamp of the record
    pub timestamp: u64,
    /// Record type tag
    pub kind: RecordKind,
    /// Length of the stored key in bytes
    pub key_len: u32,
    /// Length of the stored value in bytes
    pub value_len: u32,
}

/// Uniform "fetch stored key given a typed handle" capability.
///
/// Implemented by the engine above the index. `None` returns mean the handle
/// could not be resolved; the lookup engine treats such entries as
/// non-matching.
pub trait RecordAccessor {
    /// Stored key bytes of the record behind `handle`
    fn key_bytes(&self, handle: &RecordHandle) -> Option<Cow<'_, [u8]>>;

    /// Fixed metadata header of the record behind `handle`
    fn record_meta(&self, handle: &RecordHandle) -> Option<RecordMeta>;
}
