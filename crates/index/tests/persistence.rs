//! Index files survive closing and reopening the store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use inferadb_ledger_index::{
    BinaryBTree, Error, IndexConfig, PageStore, RecordId, SingleValueIndex, StoreConfig,
};
use inferadb_ledger_test_utils::TestDir;

fn open(dir: &TestDir) -> Arc<PageStore> {
    let config = StoreConfig::builder().page_size(1024).sync_on_commit(true).build();
    Arc::new(PageStore::open(dir.path(), config).unwrap())
}

fn config() -> IndexConfig {
    IndexConfig::builder().max_key_size(128).build()
}

fn key(n: u32) -> Vec<u8> {
    format!("tenant/{}/document/{n:06}", n % 7).into_bytes()
}

#[test]
fn test_reopen_preserves_entries() {
    let dir = TestDir::new();
    {
        let index = SingleValueIndex::create(open(&dir), "docs.path", config()).unwrap();
        for n in 0..2_000u32 {
            index.put(Some(key(n).as_slice()), RecordId::new(1, i64::from(n))).unwrap();
        }
        index.put(None, RecordId::new(1, -1)).unwrap();
        for n in (0..2_000u32).step_by(3) {
            index.remove(Some(key(n).as_slice())).unwrap();
        }
        index.close();
    }

    assert!(dir.join("docs.path.sbt").exists());
    assert!(dir.join("docs.path.nbt").exists());

    let index = SingleValueIndex::load(open(&dir), "docs.path", config()).unwrap();
    let expected: Vec<u32> = (0..2_000u32).filter(|n| n % 3 != 0).collect();
    assert_eq!(index.size().unwrap(), expected.len() as i64 + 1);
    assert_eq!(index.get(None).unwrap(), Some(RecordId::new(1, -1)));
    for &n in &expected {
        assert_eq!(
            index.get(Some(key(n).as_slice())).unwrap(),
            Some(RecordId::new(1, i64::from(n)))
        );
    }

    let keys: Vec<Vec<u8>> = index.all_entries().map(|(key, _)| key).collect();
    assert_eq!(keys.len(), expected.len());
    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    index.tree().assert_free_pages().unwrap();
}

#[test]
fn test_free_list_survives_reopen() {
    let dir = TestDir::new();
    {
        let tree = BinaryBTree::create(open(&dir), "churn", config()).unwrap();
        for n in 0..500u32 {
            tree.put(&key(n), RecordId::new(2, i64::from(n))).unwrap();
        }
        for n in 0..500u32 {
            tree.remove(&key(n)).unwrap();
        }
        tree.assert_free_pages().unwrap();
        tree.close();
    }

    let file_len = std::fs::metadata(dir.join("churn.sbt")).unwrap().len();
    let tree = BinaryBTree::load(open(&dir), "churn", config()).unwrap();
    assert_eq!(tree.size().unwrap(), 0);
    tree.assert_free_pages().unwrap();

    for n in 0..500u32 {
        tree.put(&key(n), RecordId::new(2, i64::from(n))).unwrap();
    }
    tree.assert_free_pages().unwrap();
    assert_eq!(std::fs::metadata(dir.join("churn.sbt")).unwrap().len(), file_len);
}

#[test]
fn test_load_missing_index() {
    let dir = TestDir::new();
    assert!(matches!(
        SingleValueIndex::load(open(&dir), "absent", config()),
        Err(Error::IndexNotFound { .. })
    ));
}

#[test]
fn test_delete_removes_files() {
    let dir = TestDir::new();
    let index = SingleValueIndex::create(open(&dir), "temp", config()).unwrap();
    index.delete().unwrap();

    assert!(!dir.join("temp.sbt").exists());
    assert!(!dir.join("temp.nbt").exists());
}
