//! Concurrency tests: readers running lock-free against a writer must never
//! observe a torn entry (a header from one publish paired with the handle of
//! another) and must never miss a key that is continuously present.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use oxipmem::index::{HashTable, HashTableConfig};
use oxipmem::record::{RecordAccessor, RecordKind};

mod common;
use common::{hint_for, hint_in_bucket, string_mask, TestRecords};

const NUM_BUCKETS: u64 = 64;
const NUM_SLOTS: u64 = 32;

fn create_table() -> HashTable {
    HashTable::new(&HashTableConfig {
        num_buckets: NUM_BUCKETS,
        block_size: 72,
        num_slots: NUM_SLOTS,
        dram_budget: 72 * (NUM_BUCKETS as usize + 1024),
        write_threads: 1,
    })
    .unwrap()
}

#[test]
fn test_readers_see_consistent_entries_during_updates() {
    let table = Arc::new(create_table());
    let records = Arc::new(TestRecords::new());
    let stop = Arc::new(AtomicBool::new(false));

    // Publish the key once before readers start, so it is continuously live.
    let hint = hint_for(b"hot", NUM_BUCKETS, NUM_SLOTS);
    {
        let slot = table
            .search_for_write(&hint, b"hot", string_mask(), &*records, None, false)
            .unwrap();
        let handle = records.put(b"hot", 0, RecordKind::STRING_DATA);
        table.insert(&hint, slot.entry, RecordKind::STRING_DATA, handle);
    }

    let mut readers = Vec::new();
    for _ in 0..4 {
        let table = Arc::clone(&table);
        let records = Arc::clone(&records);
        let stop = Arc::clone(&stop);
        readers.push(thread::spawn(move || {
            let mut hits = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let result =
                    table.search_for_read(&hint, b"hot", string_mask(), &*records, None);
                // The key is never deleted, so every read must land.
                assert!(result.found(), "continuously live key went missing");

                // A consistent snapshot decodes to a handle that resolves to
                // this key; a torn header/handle pair would fail here.
                let handle = result
                    .snapshot
                    .handle()
                    .expect("snapshot carries an undecodable handle");
                let key = records
                    .key_bytes(&handle)
                    .expect("snapshot handle resolves to no record");
                assert_eq!(key.as_ref(), b"hot");
                hits += 1;
            }
            hits
        }));
    }

    // Single writer, as the per-key exclusivity contract requires.
    let writer = {
        let table = Arc::clone(&table);
        let records = Arc::clone(&records);
        thread::spawn(move || {
            for i in 0..20_000u32 {
                let slot = table
                    .search_for_write(&hint, b"hot", string_mask(), &*records, None, false)
                    .unwrap();
                assert!(slot.found());
                let handle = records.put(b"hot", i, RecordKind::STRING_DATA);
                table.insert(&hint, slot.entry, RecordKind::STRING_DATA, handle);
            }
        })
    };

    writer.join().unwrap();
    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }

    // Occupancy stayed at one: in-place updates allocate nothing.
    let bucket = hint.bucket;
    assert_eq!(table.bucket_occupancy(bucket), 1);
}

#[test]
fn test_readers_during_chain_growth() {
    let table = Arc::new(create_table());
    let records = Arc::new(TestRecords::new());
    let stop = Arc::new(AtomicBool::new(false));

    // A stable key in the stressed bucket, inserted first.
    let anchor_hint = hint_in_bucket(b"anchor", 0, NUM_SLOTS);
    {
        let slot = table
            .search_for_write(&anchor_hint, b"anchor", string_mask(), &*records, None, false)
            .unwrap();
        let handle = records.put(b"anchor", 0, RecordKind::STRING_DATA);
        table.insert(&anchor_hint, slot.entry, RecordKind::STRING_DATA, handle);
    }

    let mut readers = Vec::new();
    for _ in 0..3 {
        let table = Arc::clone(&table);
        let records = Arc::clone(&records);
        let stop = Arc::clone(&stop);
        readers.push(thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                // The anchor must stay reachable while the writer keeps
                // appending blocks to the same bucket chain.
                let result = table.search_for_read(
                    &anchor_hint,
                    b"anchor",
                    string_mask(),
                    &*records,
                    None,
                );
                assert!(result.found());
            }
        }));
    }

    let writer = {
        let table = Arc::clone(&table);
        let records = Arc::clone(&records);
        thread::spawn(move || {
            for i in 0..400u32 {
                let key = format!("grow-{}", i).into_bytes();
                let hint = hint_in_bucket(&key, 0, NUM_SLOTS);
                let slot = table
                    .search_for_write(&hint, &key, string_mask(), &*records, None, false)
                    .unwrap();
                let handle = records.put(&key, i, RecordKind::STRING_DATA);
                table.insert(&hint, slot.entry, RecordKind::STRING_DATA, handle);
            }
        })
    };

    writer.join().unwrap();
    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(table.bucket_occupancy(0), 401);
    assert!(table.bucket_chain_len(0) > 1);

    // Post-stress verification: every appended key resolves.
    for i in 0..400u32 {
        let key = format!("grow-{}", i).into_bytes();
        let hint = hint_in_bucket(&key, 0, NUM_SLOTS);
        assert!(table
            .search_for_read(&hint, &key, string_mask(), &*records, None)
            .found());
    }
}

#[test]
fn test_parallel_writers_on_disjoint_buckets() {
    let table = Arc::new(create_table());
    let records = Arc::new(TestRecords::new());

    // Per-key exclusivity holds trivially: each thread owns its own bucket.
    let mut writers = Vec::new();
    for t in 0..4u64 {
        let table = Arc::clone(&table);
        let records = Arc::clone(&records);
        writers.push(thread::spawn(move || {
            for i in 0..200u32 {
                let key = format!("t{}-k{}", t, i).into_bytes();
                let hint = hint_in_bucket(&key, t, NUM_SLOTS);
                let slot = table
                    .search_for_write(&hint, &key, string_mask(), &*records, None, false)
                    .unwrap();
                let handle = records.put(&key, i, RecordKind::STRING_DATA);
                table.insert(&hint, slot.entry, RecordKind::STRING_DATA, handle);
            }
        }));
    }
    for writer in writers {
        writer.join().unwrap();
    }

    for t in 0..4u64 {
        assert_eq!(table.bucket_occupancy(t), 200);
        for i in 0..200u32 {
            let key = format!("t{}-k{}", t, i).into_bytes();
            let hint = hint_in_bucket(&key, t, NUM_SLOTS);
            assert!(table
                .search_for_read(&hint, &key, string_mask(), &*records, None)
                .found());
        }
    }
}
