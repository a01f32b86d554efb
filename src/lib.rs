//! oxipmem - DRAM-resident hash index core for a persistent-memory key-value engine
//!
//! This crate implements the primary key index of a persistent key-value
//! engine: a DRAM hash table whose entries point into variable-shaped records
//! kept in persistently-backed memory. It answers "does key K exist, and
//! where is its latest record" with minimal latency, supports concurrent
//! readers overlapping a writer on different keys, and is rebuildable from
//! the persistent log during recovery.
//!
//! The record formats themselves, the persistent allocator, and key hashing
//! are external collaborators: records are reached through the
//! [`RecordAccessor`] trait, and every operation consumes a caller-computed
//! [`HashHint`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use oxipmem::index::{HashTable, HashTableConfig, HashHint};
//!
//! let table = HashTable::new(&HashTableConfig::default())?;
//!
//! // Writer: reserve a slot, then publish the record handle.
//! let slot = table.search_for_write(&hint, key, mask, &accessor, None, false)?;
//! table.insert(&hint, slot.entry, kind, handle);
//!
//! // Reader: lock-free lookup.
//! let result = table.search_for_read(&hint, key, mask, &accessor, None);
//! ```

#![warn(missing_docs)]
#![allow(dead_code)]

pub mod error;
pub mod index;
pub mod record;
mod utility;

// Re-exports for convenience
pub use error::IndexError;
pub use index::{HashHint, HashTable, HashTableConfig};
pub use record::{HandleKind, RecordAccessor, RecordHandle, RecordKind, RecordMeta};

/// Constants used throughout the library
pub mod constants {
    /// Size of one encoded hash entry in bytes
    pub const HASH_ENTRY_BYTES: usize = 16;

    /// Bytes reserved at the tail of each bucket block for the chain link
    pub const BLOCK_LINK_BYTES: usize = 8;
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::error::IndexError;
    pub use crate::index::{HashHint, HashTable, HashTableConfig};
    pub use crate::record::{HandleKind, RecordAccessor, RecordHandle, RecordKind, RecordMeta};
}
