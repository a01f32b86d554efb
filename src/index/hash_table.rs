//! Lookup engine over the bucket store
//!
//! Implements the read and reserve-for-write search protocols. Readers are
//! lock-free: they work on entry snapshots and re-validate any negative
//! comparison against a fresh snapshot, retrying if a concurrent writer
//! mutated the entry mid-comparison. Writers rely on an external per-slot
//! exclusivity contract (one writer at a time per key, enforced above this
//! layer); the table itself only serializes at entry granularity through the
//! status field and the publish-copy discipline.

use crate::error::IndexError;
use crate::index::bucket::{BucketBlock, BucketStore, EntryAddr};
use crate::index::hash_entry::{EntryStatus, HashEntry};
use crate::index::slot_cache::SlotCache;
use crate::index::{HashHint, HashTableConfig};
use crate::record::{RecordAccessor, RecordHandle, RecordKind, RecordMeta};
use crate::utility::prefetch_read;

/// Result of a read-path lookup
#[derive(Debug)]
pub struct ReadResult {
    /// Position of the matched entry, `None` when the key is absent
    pub entry: Option<EntryAddr>,
    /// Consistent snapshot of the matched entry
    pub snapshot: HashEntry,
}

impl ReadResult {
    /// Create a not-found result
    #[inline]
    pub(crate) fn not_found() -> Self {
        Self {
            entry: None,
            snapshot: HashEntry::EMPTY,
        }
    }

    /// Check whether the key was found
    #[inline]
    pub fn found(&self) -> bool {
        self.entry.is_some()
    }
}

/// Result of a write-path lookup: either the located live entry (marked
/// `Updating` for the caller) or a reserved slot for a brand-new key.
#[derive(Debug)]
pub struct WriteReservation {
    /// Position the caller must publish into via [`HashTable::insert`]
    pub entry: EntryAddr,
    /// Snapshot of the matched live entry; `None` when the key was absent
    /// and `entry` is a freshly reserved (or recycled) slot
    pub existing: Option<HashEntry>,
    /// Whether the reserved slot recycles a logically deleted entry
    pub reused: bool,
}

impl WriteReservation {
    /// Check whether an existing entry for the key was found
    #[inline]
    pub fn found(&self) -> bool {
        self.existing.is_some()
    }
}

/// Distribution statistics of the index
#[derive(Debug, Clone)]
pub struct IndexStats {
    /// Number of hash buckets
    pub num_buckets: u64,
    /// Blocks currently allocated (main array plus overflow)
    pub allocated_blocks: usize,
    /// Entries ever allocated across all buckets
    pub allocated_entries: u64,
    /// Allocated entries currently reusable (logically deleted)
    pub reusable_entries: u64,
    /// Allocated entries over total entry capacity of allocated blocks
    pub load_factor: f64,
}

impl std::fmt::Display for IndexStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Index statistics:")?;
        writeln!(f, "  Buckets: {}", self.num_buckets)?;
        writeln!(f, "  Allocated blocks: {}", self.allocated_blocks)?;
        writeln!(f, "  Allocated entries: {}", self.allocated_entries)?;
        writeln!(f, "  Reusable entries: {}", self.reusable_entries)?;
        writeln!(f, "  Load factor: {:.2}%", self.load_factor * 100.0)
    }
}

/// The DRAM-resident primary key index.
///
/// Maps key hashes to typed record handles. Concurrent readers may overlap a
/// writer on different keys without locks; per-key write exclusivity is the
/// caller's contract.
pub struct HashTable {
    store: BucketStore,
    cache: SlotCache,
    num_buckets: u64,
}

impl HashTable {
    /// Create a table, allocating the main bucket array out of the DRAM
    /// budget. Fails with `MemoryOverflow` if the array does not fit.
    pub fn new(config: &HashTableConfig) -> Result<Self, IndexError> {
        config.validate()?;
        let store = BucketStore::new(
            config.num_buckets,
            config.entries_per_block(),
            config.capacity_blocks(),
        )?;
        Ok(Self {
            store,
            cache: SlotCache::new(config.num_slots),
            num_buckets: config.num_buckets,
        })
    }

    /// Number of hash buckets
    #[inline]
    pub fn num_buckets(&self) -> u64 {
        self.num_buckets
    }

    /// Entries per bucket block
    #[inline]
    pub fn entries_per_block(&self) -> usize {
        self.store.entries_per_block()
    }

    /// Entries ever allocated in `bucket`
    #[inline]
    pub fn bucket_occupancy(&self, bucket: u64) -> u64 {
        self.store.occupancy(bucket)
    }

    /// Number of blocks in `bucket`'s chain
    #[inline]
    pub fn bucket_chain_len(&self, bucket: u64) -> usize {
        self.store.chain_len(bucket)
    }

    /// Match one entry snapshot against a query.
    ///
    /// Cheap rejections (status, type mask, hash prefix) come before any
    /// handle dereference; the record's fixed metadata is copied out once the
    /// cheap checks pass, before the full key compare, mirroring the fact
    /// that a prefix match almost always is the key.
    fn match_entry<A: RecordAccessor>(
        accessor: &A,
        key: &[u8],
        key_prefix: u32,
        type_mask: RecordKind,
        snapshot: &HashEntry,
        meta_out: Option<&mut RecordMeta>,
    ) -> bool {
        if snapshot.status() == EntryStatus::Empty {
            return false;
        }
        if !snapshot.record_kind().intersects(type_mask) || snapshot.key_prefix() != key_prefix {
            return false;
        }
        let Some(handle) = snapshot.handle() else {
            tracing::error!(
                kind = snapshot.handle_kind_raw(),
                "unrecognized handle kind in hash entry"
            );
            return false;
        };
        let Some(stored_key) = accessor.key_bytes(&handle) else {
            return false;
        };
        if let Some(meta_out) = meta_out {
            if let Some(meta) = accessor.record_meta(&handle) {
                *meta_out = meta;
            }
        }
        stored_key.as_ref() == key
    }

    /// Resolve the block holding chain position `i`, advancing `handle` /
    /// `block` when `i` crosses a block boundary. Returns `false` if the
    /// chain ends early, which means the chain is shorter than the occupancy
    /// counter claims; the scan stops there.
    fn advance_block<'a>(
        &'a self,
        i: u64,
        handle: &mut crate::index::bucket::BlockHandle,
        block: &mut &'a BucketBlock,
    ) -> bool {
        let epb = self.store.entries_per_block() as u64;
        if i == 0 || i % epb != 0 {
            return true;
        }
        let Some(next) = block.next() else {
            tracing::error!(
                position = i,
                "bucket chain ends before its occupancy counter"
            );
            return false;
        };
        let Some(next_block) = self.store.block(next) else {
            tracing::error!(block = next.raw(), "bucket chain link does not resolve");
            return false;
        };
        prefetch_read(next_block.entry(0) as *const _);
        *handle = next;
        *block = next_block;
        true
    }

    /// Read-path search: find the latest entry for `key` among record kinds
    /// accepted by `type_mask`.
    ///
    /// Probes the slot cache first, then walks the bucket chain up to the
    /// occupancy counter. Each entry is compared on a snapshot; a negative
    /// compare is only final once a re-snapshot is byte-identical, otherwise
    /// a concurrent writer touched the entry and the compare is retried on
    /// the fresh copy. Never mutates the table beyond refreshing the slot
    /// cache on a hit; never grows a bucket.
    pub fn search_for_read<A: RecordAccessor>(
        &self,
        hint: &HashHint,
        key: &[u8],
        type_mask: RecordKind,
        accessor: &A,
        mut meta_out: Option<&mut RecordMeta>,
    ) -> ReadResult {
        let prefix = hint.key_prefix();

        // Slot cache probe: soft hint, re-validated via the snapshot match.
        if let Some(addr) = self.cache.get(hint.slot) {
            if let Some(cell) = self.store.entry(addr) {
                let snap = cell.snapshot();
                if Self::match_entry(accessor, key, prefix, type_mask, &snap, meta_out.as_deref_mut())
                {
                    return ReadResult {
                        entry: Some(addr),
                        snapshot: snap,
                    };
                }
            }
        }

        let occupancy = self.store.occupancy(hint.bucket);
        let mut handle = self.store.head(hint.bucket);
        let Some(mut block) = self.store.block(handle) else {
            tracing::error!(bucket = hint.bucket, "bucket head block does not resolve");
            return ReadResult::not_found();
        };
        let epb = self.store.entries_per_block() as u64;

        for i in 0..occupancy {
            if !self.advance_block(i, &mut handle, &mut block) {
                break;
            }
            let slot = (i % epb) as u32;
            let cell = block.entry(slot as usize);
            loop {
                let snap = cell.snapshot();
                if Self::match_entry(
                    accessor,
                    key,
                    prefix,
                    type_mask,
                    &snap,
                    meta_out.as_deref_mut(),
                ) {
                    let addr = EntryAddr { block: handle, slot };
                    self.cache.set(hint.slot, addr);
                    return ReadResult {
                        entry: Some(addr),
                        snapshot: snap,
                    };
                }
                // A byte-identical re-snapshot makes the negative final; any
                // difference means a writer published mid-compare and the
                // match must be retried on the fresh copy.
                if cell.snapshot() == snap {
                    break;
                }
            }
        }
        ReadResult::not_found()
    }

    /// Write-path search: locate `key`'s live entry or reserve a slot for it.
    ///
    /// The caller must hold the external per-key write exclusivity. On a
    /// match the live entry is marked `Updating` and returned. On a miss the
    /// returned slot is, in order of preference: the next unused slot of the
    /// current tail block; the first logically deleted entry seen during the
    /// scan (skipped when `in_recovery`, so a later log replay cannot be
    /// masked); or slot 0 of a freshly grown block. Fresh slots are marked
    /// `Initializing`; recycled slots keep their stale status for the caller
    /// to overwrite via [`HashTable::insert`].
    pub fn search_for_write<A: RecordAccessor>(
        &self,
        hint: &HashHint,
        key: &[u8],
        type_mask: RecordKind,
        accessor: &A,
        mut meta_out: Option<&mut RecordMeta>,
        in_recovery: bool,
    ) -> Result<WriteReservation, IndexError> {
        let prefix = hint.key_prefix();

        // Slot cache probe.
        if let Some(addr) = self.cache.get(hint.slot) {
            if let Some(cell) = self.store.entry(addr) {
                let snap = cell.snapshot();
                if Self::match_entry(accessor, key, prefix, type_mask, &snap, meta_out.as_deref_mut())
                {
                    cell.set_status(EntryStatus::Updating);
                    return Ok(WriteReservation {
                        entry: addr,
                        existing: Some(snap),
                        reused: false,
                    });
                }
            }
        }

        let occupancy = self.store.occupancy(hint.bucket);
        let mut handle = self.store.head(hint.bucket);
        let Some(mut block) = self.store.block(handle) else {
            tracing::error!(bucket = hint.bucket, "bucket head block does not resolve");
            return Err(IndexError::MemoryOverflow {
                bucket: hint.bucket,
            });
        };
        let epb = self.store.entries_per_block() as u64;
        let mut reusable: Option<EntryAddr> = None;

        let mut i = 0;
        while i < occupancy {
            if !self.advance_block(i, &mut handle, &mut block) {
                break;
            }
            let slot = (i % epb) as u32;
            let cell = block.entry(slot as usize);
            let snap = cell.snapshot();
            if Self::match_entry(
                accessor,
                key,
                prefix,
                type_mask,
                &snap,
                meta_out.as_deref_mut(),
            ) {
                let addr = EntryAddr { block: handle, slot };
                self.cache.set(hint.slot, addr);
                cell.set_status(EntryStatus::Updating);
                return Ok(WriteReservation {
                    entry: addr,
                    existing: Some(snap),
                    reused: false,
                });
            }
            // Slot recycling never happens mid-scan: the full match pass
            // completes first, the candidate is only used at chain end.
            if !in_recovery && reusable.is_none() && snap.is_reusable() {
                reusable = Some(EntryAddr { block: handle, slot });
            }
            i += 1;
        }

        // Chain exhausted without a match: pick the insertion point.
        let (entry, reused) = if i > 0 && i % epb == 0 {
            // Scan ended exactly at a block boundary: recycle or grow.
            match reusable {
                Some(addr) => (addr, true),
                None => {
                    // The tail may already have an empty successor, left
                    // behind by a writer that grew the chain but never
                    // published; descend into it rather than relinking it
                    // away.
                    let target = match block.next() {
                        Some(next) => next,
                        None => self.store.grow(hint.bucket, handle)?,
                    };
                    (
                        EntryAddr {
                            block: target,
                            slot: 0,
                        },
                        false,
                    )
                }
            }
        } else {
            // The tail block still has unused physical slots.
            (
                EntryAddr {
                    block: handle,
                    slot: (i % epb) as u32,
                },
                false,
            )
        };

        if !reused {
            if let Some(cell) = self.store.entry(entry) {
                cell.set_status(EntryStatus::Initializing);
            }
        }
        Ok(WriteReservation {
            entry,
            existing: None,
            reused,
        })
    }

    /// Publish a record binding into a slot reserved by
    /// [`HashTable::search_for_write`].
    ///
    /// The bucket's occupancy counter is bumped exactly once, and only when
    /// the reserved slot was a genuinely new one (`Initializing`), never on
    /// reuse or on an in-place update of a live entry.
    pub fn insert(
        &self,
        hint: &HashHint,
        entry: EntryAddr,
        kind: RecordKind,
        handle: RecordHandle,
    ) {
        let Some(cell) = self.store.entry(entry) else {
            tracing::error!(?entry, "insert target does not resolve");
            return;
        };
        let fresh = cell.snapshot().status() == EntryStatus::Initializing;
        cell.publish(HashEntry::new(
            hint.key_prefix(),
            kind,
            EntryStatus::Normal,
            handle,
        ));
        if fresh {
            self.store.bump_occupancy(hint.bucket);
        }
    }

    /// Reset entries left `Initializing` by writers that never published,
    /// e.g. after a crash. Returns the number of entries cleared. Must not
    /// run concurrently with writers.
    pub fn reclaim_uncommitted(&self) -> u64 {
        let mut cleared = 0;
        for bucket in 0..self.num_buckets {
            let mut handle = Some(self.store.head(bucket));
            while let Some(h) = handle {
                let Some(block) = self.store.block(h) else {
                    break;
                };
                for slot in 0..block.len() {
                    let cell = block.entry(slot);
                    if cell.snapshot().status() == EntryStatus::Initializing {
                        cell.clear();
                        cleared += 1;
                    }
                }
                handle = block.next();
            }
        }
        if cleared > 0 {
            tracing::debug!(cleared, "uncommitted hash entries reclaimed");
        }
        cleared
    }

    /// Gather distribution statistics
    pub fn stats(&self) -> IndexStats {
        let epb = self.store.entries_per_block() as u64;
        let mut allocated_entries = 0;
        let mut reusable_entries = 0;

        for bucket in 0..self.num_buckets {
            let occupancy = self.store.occupancy(bucket);
            allocated_entries += occupancy;

            let mut handle = self.store.head(bucket);
            let Some(mut block) = self.store.block(handle) else {
                continue;
            };
            for i in 0..occupancy {
                if !self.advance_block(i, &mut handle, &mut block) {
                    break;
                }
                if block.entry((i % epb) as usize).snapshot().is_reusable() {
                    reusable_entries += 1;
                }
            }
        }

        let capacity = (self.store.blocks_allocated() as u64) * epb;
        IndexStats {
            num_buckets: self.num_buckets,
            allocated_blocks: self.store.blocks_allocated(),
            allocated_entries,
            reusable_entries,
            load_factor: if capacity == 0 {
                0.0
            } else {
                allocated_entries as f64 / capacity as f64
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &BucketStore {
        &self.store
    }
}
