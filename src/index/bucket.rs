//! Bucket storage for the hash index
//!
//! Buckets are chains of fixed-size blocks. Each block holds a fixed number
//! of entries plus an atomic link to its overflow successor; the first block
//! of every bucket is allocated at table construction, later blocks are
//! appended lazily under memory pressure. Blocks live in an append-only
//! arena with stable addresses and are never freed while the table lives.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::IndexError;
use crate::index::hash_entry::AtomicHashEntry;

/// Opaque 1-based handle to a bucket block; the raw value 0 means "none"
/// and terminates a chain.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle(u64);

impl BlockHandle {
    /// Create a handle from its raw 1-based value
    #[inline]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Get the raw 1-based value
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// Addressable position of one entry inside the bucket store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryAddr {
    /// Block holding the entry
    pub block: BlockHandle,
    /// Entry index inside the block
    pub slot: u32,
}

impl EntryAddr {
    const SLOT_BITS: u32 = 16;

    /// Pack into a non-zero word for the slot cache. The block handle is
    /// 1-based, so a valid address never packs to 0.
    #[inline]
    pub const fn pack(&self) -> u64 {
        (self.block.0 << Self::SLOT_BITS) | (self.slot as u64)
    }

    /// Unpack a slot-cache word; 0 means "no cached entry".
    #[inline]
    pub const fn unpack(packed: u64) -> Option<Self> {
        let raw_block = packed >> Self::SLOT_BITS;
        match BlockHandle::from_raw(raw_block) {
            Some(block) => Some(Self {
                block,
                slot: (packed & ((1 << Self::SLOT_BITS) - 1)) as u32,
            }),
            None => None,
        }
    }
}

/// One fixed-size bucket block: `entries_per_block` entries plus the chain
/// link to the next block (0 = end of chain).
pub struct BucketBlock {
    entries: Box<[AtomicHashEntry]>,
    next: AtomicU64,
}

impl BucketBlock {
    fn new(entries_per_block: usize) -> Self {
        let entries = (0..entries_per_block)
            .map(|_| AtomicHashEntry::empty())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            entries,
            next: AtomicU64::new(0),
        }
    }

    /// Number of entries in this block
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Get the entry cell at `index`
    #[inline]
    pub fn entry(&self, index: usize) -> &AtomicHashEntry {
        &self.entries[index]
    }

    /// Next block in the chain, if any
    #[inline]
    pub fn next(&self) -> Option<BlockHandle> {
        BlockHandle::from_raw(self.next.load(Ordering::Acquire))
    }

    /// Link `next` as this block's chain successor
    #[inline]
    fn link_next(&self, next: BlockHandle) {
        self.next.store(next.0, Ordering::Release);
    }
}

/// Append-only arena of bucket blocks.
///
/// Blocks are boxed so their addresses stay stable across vector growth;
/// handles are 1-based indices into the vector. The capacity is the DRAM
/// budget expressed in blocks: once reached, `allocate` reports exhaustion
/// and the caller surfaces `MemoryOverflow`.
#[derive(Debug)]
pub(crate) struct BlockArena {
    blocks: RwLock<Vec<*mut BucketBlock>>,
    capacity: usize,
    entries_per_block: usize,
}

impl BlockArena {
    pub(crate) fn new(capacity: usize, entries_per_block: usize) -> Self {
        Self {
            blocks: RwLock::new(Vec::new()),
            capacity,
            entries_per_block,
        }
    }

    /// Allocate a zeroed block; `None` when the budget is exhausted.
    pub(crate) fn allocate(&self) -> Option<BlockHandle> {
        let mut blocks = self.blocks.write();
        if blocks.len() >= self.capacity {
            return None;
        }
        let block = Box::new(BucketBlock::new(self.entries_per_block));
        blocks.push(Box::into_raw(block));
        Some(BlockHandle(blocks.len() as u64))
    }

    /// Resolve a handle to its block.
    ///
    /// The returned reference stays valid for the arena's lifetime: blocks
    /// are boxed, never freed before drop, and only mutated through atomics.
    pub(crate) fn block(&self, handle: BlockHandle) -> Option<&BucketBlock> {
        let blocks = self.blocks.read();
        let ptr = blocks.get(handle.0 as usize - 1).copied()?;
        // SAFETY: `ptr` originates from `Box::into_raw`, is freed only in
        // `Drop`, and its pointee is interior-mutable via atomics only.
        Some(unsafe { &*ptr })
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for BlockArena {
    fn drop(&mut self) {
        let blocks = self.blocks.get_mut();
        for ptr in blocks.drain(..) {
            // SAFETY: each pointer came from `Box::into_raw` and is freed
            // exactly once, here.
            unsafe { drop(Box::from_raw(ptr)) };
        }
    }
}

// Safety: blocks are only reached through shared references and mutated via
// atomic operations; the vector itself is behind an RwLock.
unsafe impl Send for BlockArena {}
unsafe impl Sync for BlockArena {}

/// The contiguous set of bucket chains plus per-bucket occupancy counters.
#[derive(Debug)]
pub struct BucketStore {
    arena: BlockArena,
    heads: Vec<BlockHandle>,
    /// Entries ever allocated per bucket; bumped only by the writer holding
    /// the bucket's insertion right, monotonically non-decreasing.
    occupancy: Vec<AtomicU64>,
    entries_per_block: usize,
}

impl BucketStore {
    /// Create the store and allocate every bucket's first block.
    pub fn new(
        num_buckets: u64,
        entries_per_block: usize,
        capacity_blocks: usize,
    ) -> Result<Self, IndexError> {
        let arena = BlockArena::new(capacity_blocks, entries_per_block);
        let mut heads = Vec::with_capacity(num_buckets as usize);
        for bucket in 0..num_buckets {
            match arena.allocate() {
                Some(handle) => heads.push(handle),
                None => {
                    tracing::error!(bucket, "no dram budget left for main bucket array");
                    return Err(IndexError::MemoryOverflow { bucket });
                }
            }
        }
        let occupancy = (0..num_buckets).map(|_| AtomicU64::new(0)).collect();
        Ok(Self {
            arena,
            heads,
            occupancy,
            entries_per_block,
        })
    }

    /// Number of entries per block
    #[inline]
    pub fn entries_per_block(&self) -> usize {
        self.entries_per_block
    }

    /// First block of `bucket`'s chain
    #[inline]
    pub fn head(&self, bucket: u64) -> BlockHandle {
        self.heads[bucket as usize]
    }

    /// Resolve a block handle
    #[inline]
    pub fn block(&self, handle: BlockHandle) -> Option<&BucketBlock> {
        self.arena.block(handle)
    }

    /// Resolve an entry address to its live cell
    pub fn entry(&self, addr: EntryAddr) -> Option<&AtomicHashEntry> {
        let block = self.arena.block(addr.block)?;
        if (addr.slot as usize) < block.len() {
            Some(block.entry(addr.slot as usize))
        } else {
            None
        }
    }

    /// Append a zeroed block to `bucket`'s chain behind `tail`.
    ///
    /// On allocation failure nothing is linked and the chain is unchanged.
    /// A `tail` that already has a successor is never relinked; the existing
    /// successor is returned instead, so every appended block stays reachable
    /// from the bucket head.
    pub fn grow(&self, bucket: u64, tail: BlockHandle) -> Result<BlockHandle, IndexError> {
        let Some(tail_block) = self.arena.block(tail) else {
            tracing::error!(bucket, tail = tail.raw(), "bucket chain tail unresolved");
            return Err(IndexError::MemoryOverflow { bucket });
        };
        if let Some(existing) = tail_block.next() {
            tracing::error!(bucket, tail = tail.raw(), "grow called on a non-tail block");
            return Ok(existing);
        }
        let Some(handle) = self.arena.allocate() else {
            tracing::error!(bucket, "memory overflow growing bucket chain");
            return Err(IndexError::MemoryOverflow { bucket });
        };
        tail_block.link_next(handle);
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(bucket, block = handle.raw(), "bucket chain grown");
        }
        Ok(handle)
    }

    /// Entries ever allocated in `bucket`
    #[inline]
    pub fn occupancy(&self, bucket: u64) -> u64 {
        self.occupancy[bucket as usize].load(Ordering::Acquire)
    }

    /// Record one more allocated entry in `bucket`. Only the writer holding
    /// the bucket's insertion right may call this.
    #[inline]
    pub fn bump_occupancy(&self, bucket: u64) {
        self.occupancy[bucket as usize].fetch_add(1, Ordering::Release);
    }

    /// Total blocks currently allocated (main array plus overflow)
    #[inline]
    pub fn blocks_allocated(&self) -> usize {
        self.arena.len()
    }

    /// Block budget in blocks
    #[inline]
    pub fn block_capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Number of blocks in `bucket`'s chain
    pub fn chain_len(&self, bucket: u64) -> usize {
        let mut len = 0;
        let mut handle = Some(self.head(bucket));
        while let Some(h) = handle {
            len += 1;
            handle = self.block(h).and_then(|b| b.next());
        }
        len
    }
}
