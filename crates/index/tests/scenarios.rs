//! End-to-end behaviour of a small index whose buckets are capped at a
//! handful of entries, so that splits and merges happen after a few puts.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use inferadb_ledger_index::{
    BinaryBTree, Error, IndexConfig, MIN_PAGE_SIZE, PageStore, RecordId, SingleValueIndex,
    StoreConfig, Validation,
};

fn store() -> Arc<PageStore> {
    let config = StoreConfig::builder().page_size(MIN_PAGE_SIZE).build();
    Arc::new(PageStore::in_memory(config).unwrap())
}

fn capped(entries: usize) -> IndexConfig {
    IndexConfig::builder().max_key_size(64).max_bucket_entries(entries).build()
}

fn rid(position: i64) -> RecordId {
    RecordId::new(3, position)
}

#[test]
fn test_split_leaf_keeps_keys_ordered() {
    let tree = BinaryBTree::create(store(), "letters", capped(2)).unwrap();
    for (position, key) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
        tree.put(key.as_bytes(), rid(position as i64)).unwrap();
    }

    assert_eq!(tree.first_key().unwrap(), Some(b"a".to_vec()));
    assert_eq!(tree.last_key().unwrap(), Some(b"e".to_vec()));
    let keys: Vec<Vec<u8>> = tree
        .iterate_entries_between(b"b", true, b"d", true, true)
        .unwrap()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    tree.assert_free_pages().unwrap();
}

#[test]
fn test_ignored_validation_keeps_value() {
    let index = SingleValueIndex::create(store(), "users.email", capped(4)).unwrap();
    index.put(Some(b"x".as_slice()), rid(1)).unwrap();

    let stored = index
        .validated_put(Some(b"x".as_slice()), rid(2), |_, _, _| Ok(Validation::Ignore))
        .unwrap();

    assert!(!stored);
    assert_eq!(index.get(Some(b"x".as_slice())).unwrap(), Some(rid(1)));
    assert_eq!(index.size().unwrap(), 1);
}

#[test]
fn test_removals_shrink_tree_to_single_leaf() {
    let store = store();
    let tree = BinaryBTree::create(Arc::clone(&store), "shrink", capped(2)).unwrap();
    tree.put(b"k1", rid(1)).unwrap();
    tree.put(b"k2", rid(2)).unwrap();
    tree.put(b"k3", rid(3)).unwrap();
    tree.assert_free_pages().unwrap();

    assert_eq!(tree.remove(b"k1").unwrap(), Some(rid(1)));
    assert_eq!(tree.remove(b"k2").unwrap(), Some(rid(2)));

    assert_eq!(tree.size().unwrap(), 1);
    assert_eq!(tree.all_entries().collect::<Vec<_>>(), vec![(b"k3".to_vec(), rid(3))]);
    tree.assert_free_pages().unwrap();

    // Both freed pages come back before the file grows.
    tree.put(b"k4", rid(4)).unwrap();
    tree.put(b"k5", rid(5)).unwrap();
    tree.assert_free_pages().unwrap();
    assert_eq!(tree.size().unwrap(), 3);
}

#[test]
fn test_cursor_batches_stay_consistent_under_inserts() {
    let config = IndexConfig::builder()
        .max_key_size(64)
        .max_bucket_entries(3)
        .cursor_batch_size(4)
        .build();
    let tree = BinaryBTree::create(store(), "cursor", config).unwrap();
    for position in 0..50i64 {
        tree.put(format!("key{:04}", position * 10).as_bytes(), rid(position)).unwrap();
    }

    let mut cursor = tree.all_entries();
    let mut yielded: Vec<Vec<u8>> = Vec::new();
    let mut step = 0i64;
    while let Some((key, _)) = cursor.next_entry().unwrap() {
        yielded.push(key);
        // Insert behind the cursor, into the range it already visited.
        step += 1;
        tree.put(format!("key{:04}", step * 10 - 5).as_bytes(), rid(1000 + step)).unwrap();
    }

    assert!(yielded.windows(2).all(|pair| pair[0] < pair[1]), "duplicate or out of order key");
    for position in 0..50i64 {
        let key = format!("key{:04}", position * 10).into_bytes();
        assert!(yielded.contains(&key), "missing {key:?}");
    }
}

#[test]
fn test_null_key_lives_outside_tree() {
    let index = SingleValueIndex::create(store(), "nullable", capped(2)).unwrap();
    index.put(None, rid(0)).unwrap();
    for position in 1..10i64 {
        index.put(Some(format!("v{position}").as_bytes()), rid(position)).unwrap();
    }

    assert_eq!(index.size().unwrap(), 10);
    assert_eq!(index.tree().size().unwrap(), 9);
    assert_eq!(index.all_entries().count(), 9);
    assert_eq!(index.first_key().unwrap(), Some(b"v1".to_vec()));
    assert_eq!(index.remove(None).unwrap(), Some(rid(0)));
    assert_eq!(index.get(None).unwrap(), None);
}

#[test]
fn test_failed_validation_rolls_back() {
    let tree = BinaryBTree::create(store(), "unique", capped(2)).unwrap();
    for position in 0..6i64 {
        tree.put(format!("u{position}").as_bytes(), rid(position)).unwrap();
    }

    let err = tree
        .validated_put(b"u9", rid(9), |_, _, _| {
            Err(Error::ValidationFailed { reason: "rejected".to_string() })
        })
        .unwrap_err();

    assert!(matches!(err, Error::ValidationFailed { .. }));
    assert_eq!(tree.get(b"u9").unwrap(), None);
    assert_eq!(tree.size().unwrap(), 6);
    tree.assert_free_pages().unwrap();
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = IndexConfig::builder().max_key_size(4096).build();
    assert!(matches!(
        BinaryBTree::create(store(), "too_wide", config),
        Err(Error::InvalidConfig { .. })
    ));
}
