//! Per-slot "last matched entry" cache
//!
//! One packed entry address per logical slot group, remembering where the
//! last lookup for that slot matched. Purely a soft hint: the cached position
//! may have been overwritten for a different key since, so every hit must be
//! re-validated against a fresh snapshot before it is trusted.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::index::bucket::EntryAddr;

/// Best-effort single-entry memo per logical slot
pub struct SlotCache {
    slots: Box<[AtomicU64]>,
}

impl SlotCache {
    /// Create a cache with `num_slots` empty slots
    pub fn new(num_slots: u64) -> Self {
        let slots = (0..num_slots)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { slots }
    }

    /// Number of logical slots
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Last matched entry address for `slot`, if any was recorded.
    /// Out-of-range slots miss rather than fail.
    #[inline]
    pub fn get(&self, slot: u32) -> Option<EntryAddr> {
        let cell = self.slots.get(slot as usize)?;
        EntryAddr::unpack(cell.load(Ordering::Relaxed))
    }

    /// Record `addr` as the last match for `slot`
    #[inline]
    pub fn set(&self, slot: u32, addr: EntryAddr) {
        if let Some(cell) = self.slots.get(slot as usize) {
            cell.store(addr.pack(), Ordering::Relaxed);
        }
    }
}
