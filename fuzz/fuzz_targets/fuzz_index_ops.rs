//! Fuzz target for index mutations.
//!
//! Interprets the input as a log of puts, removes and lookups over short keys,
//! applies it to a tree with tiny buckets and to a `BTreeMap`, and checks that
//! both agree and that no page leaks.

#![no_main]

use std::{collections::BTreeMap, sync::Arc};

use libfuzzer_sys::fuzz_target;

use inferadb_ledger_index::{
    BinaryBTree, IndexConfig, MIN_PAGE_SIZE, PageStore, RecordId, StoreConfig,
};

fuzz_target!(|data: &[u8]| {
    let Some((&cap, mut rest)) = data.split_first() else {
        return;
    };
    let store_config = StoreConfig::builder().page_size(MIN_PAGE_SIZE).build();
    let Ok(store) = PageStore::in_memory(store_config) else {
        return;
    };
    let config = IndexConfig::builder()
        .max_key_size(64)
        .max_bucket_entries(2 + usize::from(cap % 4))
        .cursor_batch_size(3)
        .build();
    let Ok(tree) = BinaryBTree::create(Arc::new(store), "fuzz", config) else {
        return;
    };
    let mut model = BTreeMap::new();

    // Each op: selector byte, key length byte, key bytes.
    while let [selector, len, tail @ ..] = rest {
        let len = usize::from(*len % 8).min(tail.len());
        let (key, next) = tail.split_at(len);
        rest = next;
        let value = RecordId::new(1, i64::from(*selector));

        match selector % 3 {
            0 => {
                tree.put(key, value).expect("put");
                model.insert(key.to_vec(), value);
            },
            1 => {
                assert_eq!(tree.remove(key).expect("remove"), model.remove(key), "remove mismatch");
            },
            _ => {
                assert_eq!(tree.get(key).expect("get"), model.get(key).copied(), "get mismatch");
            },
        }
    }

    let entries: Vec<_> = tree.all_entries().collect();
    let expected: Vec<_> = model.into_iter().collect();
    assert_eq!(entries, expected, "scan mismatch");
    tree.assert_free_pages().expect("page accounting");
});
