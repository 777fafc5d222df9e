//! Readers and writers sharing one index across threads.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, thread};

use inferadb_ledger_index::{IndexConfig, PageStore, RecordId, SingleValueIndex, StoreConfig};

const WRITERS: i64 = 4;
const KEYS_PER_WRITER: i64 = 300;

fn index() -> Arc<SingleValueIndex> {
    let store = Arc::new(PageStore::in_memory(StoreConfig::default()).unwrap());
    let config = IndexConfig::builder().max_bucket_entries(8).cursor_batch_size(16).build();
    Arc::new(SingleValueIndex::create(store, "shared", config).unwrap())
}

fn key(writer: i64, n: i64) -> Vec<u8> {
    format!("w{writer}/{n:05}").into_bytes()
}

#[test]
fn test_parallel_writers_and_scanning_readers() {
    let index = index();

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for n in 0..KEYS_PER_WRITER {
                    let rid = RecordId::new(writer as i16, n);
                    index.put(Some(key(writer, n).as_slice()), rid).unwrap();
                    if n % 4 == 3 {
                        index.remove(Some(key(writer, n - 1).as_slice())).unwrap();
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for _ in 0..20 {
                    let keys: Vec<Vec<u8>> = index.all_entries().map(|(key, _)| key).collect();
                    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    let expected = WRITERS * (KEYS_PER_WRITER - KEYS_PER_WRITER / 4);
    assert_eq!(index.size().unwrap(), expected);
    assert_eq!(index.all_entries().count() as i64, expected);
    for writer in 0..WRITERS {
        assert_eq!(index.get(Some(key(writer, 2).as_slice())).unwrap(), None);
        assert_eq!(
            index.get(Some(key(writer, 3).as_slice())).unwrap(),
            Some(RecordId::new(writer as i16, 3))
        );
    }
    index.tree().assert_free_pages().unwrap();
}

#[test]
fn test_cursor_in_one_thread_while_another_inserts() {
    let index = index();
    for n in (0..1_000i64).step_by(2) {
        index.put(Some(key(0, n).as_slice()), RecordId::new(0, n)).unwrap();
    }

    let writer = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            for n in (1..1_000i64).step_by(2) {
                index.put(Some(key(0, n).as_slice()), RecordId::new(0, n)).unwrap();
            }
        })
    };

    let seen: Vec<Vec<u8>> = index.all_entries().map(|(key, _)| key).collect();
    writer.join().unwrap();

    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    for n in (0..1_000i64).step_by(2) {
        assert!(seen.contains(&key(0, n)), "missing pre-existing key {n}");
    }
    assert_eq!(index.size().unwrap(), 1_000);
}
