//! Hash index of the key-value engine
//!
//! This module provides the DRAM-resident primary key index: bucket storage,
//! the fixed-width entry codec, the per-slot lookup cache, and the lock-free
//! read / reserve-for-write search protocols over them.

mod bucket;
mod hash_entry;
mod hash_table;
mod slot_cache;

pub use bucket::{BlockHandle, BucketBlock, BucketStore, EntryAddr};
pub use hash_entry::{AtomicHashEntry, EntryStatus, HashEntry};
pub use hash_table::{HashTable, IndexStats, ReadResult, WriteReservation};
pub use slot_cache::SlotCache;

use crate::constants::{BLOCK_LINK_BYTES, HASH_ENTRY_BYTES};
use crate::error::IndexError;
use crate::utility::is_power_of_two;

/// Precomputed hash hint for one key, supplied by the engine's hashing
/// policy. The index never computes hashes itself.
///
/// `bucket` and `slot` are derived from the low hash bits upstream; the
/// upper 32 bits of `hash` are the key-hash prefix stored in entries for
/// cheap rejection. Both indices must be in range for the table they are
/// used against; out-of-range hints are the caller's bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashHint {
    /// Bucket index
    pub bucket: u64,
    /// Logical slot index (slot-cache group, also the per-key lock group)
    pub slot: u32,
    /// Full 64-bit key hash
    pub hash: u64,
}

impl HashHint {
    /// The 32-bit key-hash prefix stored in entries
    #[inline]
    pub const fn key_prefix(&self) -> u32 {
        (self.hash >> 32) as u32
    }
}

/// Construction-time configuration of the hash table
#[derive(Debug, Clone)]
pub struct HashTableConfig {
    /// Number of hash buckets (must be a power of two)
    pub num_buckets: u64,
    /// Size of one bucket block in bytes, chain link included
    pub block_size: usize,
    /// Number of logical slots for the slot cache
    pub num_slots: u64,
    /// DRAM budget in bytes for bucket storage (main array plus growth)
    pub dram_budget: usize,
    /// Expected number of concurrent writer threads; reserved for sizing
    /// allocator-side bookkeeping, the table itself is writer-count agnostic
    pub write_threads: u32,
}

impl HashTableConfig {
    /// Entries that fit one block next to its chain link. Zero for block
    /// sizes too small to hold an entry; such configs fail validation.
    #[inline]
    pub const fn entries_per_block(&self) -> usize {
        self.block_size.saturating_sub(BLOCK_LINK_BYTES) / HASH_ENTRY_BYTES
    }

    /// The DRAM budget expressed in blocks. Zero for a zero block size.
    #[inline]
    pub const fn capacity_blocks(&self) -> usize {
        if self.block_size == 0 {
            0
        } else {
            self.dram_budget / self.block_size
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), IndexError> {
        if !is_power_of_two(self.num_buckets) {
            return Err(IndexError::InvalidConfig("num_buckets must be a power of two"));
        }
        if self.block_size < BLOCK_LINK_BYTES + HASH_ENTRY_BYTES {
            return Err(IndexError::InvalidConfig("block_size holds no entries"));
        }
        if self.entries_per_block() > u16::MAX as usize {
            return Err(IndexError::InvalidConfig("block_size holds too many entries"));
        }
        if self.num_slots == 0 {
            return Err(IndexError::InvalidConfig("num_slots must be non-zero"));
        }
        if self.capacity_blocks() < self.num_buckets as usize {
            return Err(IndexError::InvalidConfig(
                "dram_budget smaller than the main bucket array",
            ));
        }
        Ok(())
    }
}

impl Default for HashTableConfig {
    fn default() -> Self {
        Self {
            num_buckets: 1 << 20,
            block_size: 128, // 7 entries + chain link
            num_slots: 1 << 10,
            dram_budget: 1 << 30,
            write_threads: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hint_key_prefix() {
        let hint = HashHint {
            bucket: 3,
            slot: 1,
            hash: 0xDEAD_BEEF_0000_1234,
        };
        assert_eq!(hint.key_prefix(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = HashTableConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.entries_per_block(), 7);
    }

    #[test]
    fn test_config_rejects_non_power_of_two_buckets() {
        let config = HashTableConfig {
            num_buckets: 3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_rejects_tiny_blocks() {
        let config = HashTableConfig {
            block_size: 16,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_rejects_zero_slots() {
        let config = HashTableConfig {
            num_slots: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_rejects_budget_below_main_array() {
        let config = HashTableConfig {
            num_buckets: 1 << 10,
            block_size: 128,
            dram_budget: 128 * 512,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_degenerate_block_sizes_do_not_panic() {
        let zero = HashTableConfig {
            block_size: 0,
            ..Default::default()
        };
        assert_eq!(zero.entries_per_block(), 0);
        assert_eq!(zero.capacity_blocks(), 0);
        assert!(zero.validate().is_err());

        let tiny = HashTableConfig {
            block_size: 4, // smaller than the chain link alone
            ..Default::default()
        };
        assert_eq!(tiny.entries_per_block(), 0);
        assert!(tiny.validate().is_err());
    }

    #[test]
    fn test_entries_per_block_derivation() {
        let config = HashTableConfig {
            block_size: 72, // 4 entries + link
            ..Default::default()
        };
        assert_eq!(config.entries_per_block(), 4);
    }
}
