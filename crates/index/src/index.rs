//! Single-value index: a tree for ordinary keys plus a null bucket.

use std::sync::Arc;

use crate::{
    btree::{BinaryBTree, EntryCursor, Validation, null_bucket::NullBucket},
    config::IndexConfig,
    error::{Error, Result},
    storage::PageStore,
    types::RecordId,
};

/// Maps optional byte keys to record ids.
///
/// `Some(key)` entries live in a [`BinaryBTree`] stored in `<name>.sbt`, the
/// `None` entry in a [`NullBucket`] stored in `<name>.nbt`. Cursors only
/// cover the tree.
#[derive(Debug)]
pub struct SingleValueIndex {
    tree: BinaryBTree,
    null_bucket: NullBucket,
}

impl SingleValueIndex {
    /// Creates an empty index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexExists`] if either file exists.
    /// Returns [`Error::InvalidConfig`] if `config` does not suit the store.
    pub fn create(store: Arc<PageStore>, name: &str, config: IndexConfig) -> Result<Self> {
        let tree = BinaryBTree::create(Arc::clone(&store), name, config)?;
        let null_bucket = match NullBucket::create(store, name) {
            Ok(null_bucket) => null_bucket,
            Err(err) => {
                tree.delete()?;
                return Err(err);
            },
        };
        Ok(Self { tree, null_bucket })
    }

    /// Opens an existing index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexNotFound`] if either file is missing.
    pub fn load(store: Arc<PageStore>, name: &str, config: IndexConfig) -> Result<Self> {
        let tree = BinaryBTree::load(Arc::clone(&store), name, config)?;
        let null_bucket = match NullBucket::load(store, name) {
            Ok(null_bucket) => null_bucket,
            Err(err) => {
                tree.close();
                return Err(err);
            },
        };
        Ok(Self { tree, null_bucket })
    }

    /// Removes both files of an empty index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotEmpty`] if the index holds entries, the null key included.
    pub fn delete(self) -> Result<()> {
        let size = self.size()?;
        if size > 0 {
            return Err(Error::NotEmpty { name: self.tree.name().to_string(), size });
        }
        self.tree.delete()?;
        self.null_bucket.delete()
    }

    /// Closes the index, keeping its files.
    pub fn close(self) {
        self.tree.close();
        self.null_bucket.close();
    }

    /// Index name.
    pub fn name(&self) -> &str {
        self.tree.name()
    }

    /// The tree holding the non-null keys.
    pub fn tree(&self) -> &BinaryBTree {
        &self.tree
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Same as [`BinaryBTree::get`].
    pub fn get(&self, key: Option<&[u8]>) -> Result<Option<RecordId>> {
        match key {
            Some(key) => self.tree.get(key),
            None => self.null_bucket.get(),
        }
    }

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Same as [`BinaryBTree::put`].
    pub fn put(&self, key: Option<&[u8]>, value: RecordId) -> Result<()> {
        match key {
            Some(key) => self.tree.put(key, value),
            None => self.null_bucket.set(value).map(|_| ()),
        }
    }

    /// Stores `value` under `key` after consulting `validator`, which sees
    /// `None` as the key of the null entry.
    ///
    /// Returns false if the validator answered [`Validation::Ignore`].
    ///
    /// # Errors
    ///
    /// Same as [`BinaryBTree::validated_put`].
    pub fn validated_put<V>(
        &self,
        key: Option<&[u8]>,
        value: RecordId,
        validator: V,
    ) -> Result<bool>
    where
        V: FnOnce(Option<&[u8]>, Option<RecordId>, RecordId) -> Result<Validation>,
    {
        match key {
            Some(key) => {
                self.tree.validated_put(key, value, |key, old, new| validator(Some(key), old, new))
            },
            None => self.null_bucket.set_with(|old| {
                Ok(match validator(None, old, value)? {
                    Validation::Store(value) => Some(value),
                    Validation::Ignore => None,
                })
            }),
        }
    }

    /// Removes `key`, returning the value it held.
    ///
    /// # Errors
    ///
    /// Same as [`BinaryBTree::remove`].
    pub fn remove(&self, key: Option<&[u8]>) -> Result<Option<RecordId>> {
        match key {
            Some(key) => self.tree.remove(key),
            None => self.null_bucket.remove(),
        }
    }

    /// Number of entries, the null entry included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexIo`] if a page cannot be read.
    pub fn size(&self) -> Result<i64> {
        let null = i64::from(self.null_bucket.get()?.is_some());
        Ok(self.tree.size()? + null)
    }

    /// Smallest non-null key.
    ///
    /// # Errors
    ///
    /// Same as [`BinaryBTree::first_key`].
    pub fn first_key(&self) -> Result<Option<Vec<u8>>> {
        self.tree.first_key()
    }

    /// Largest non-null key.
    ///
    /// # Errors
    ///
    /// Same as [`BinaryBTree::last_key`].
    pub fn last_key(&self) -> Result<Option<Vec<u8>>> {
        self.tree.last_key()
    }

    /// Iterates over every non-null entry in ascending key order.
    pub fn all_entries(&self) -> EntryCursor<'_> {
        self.tree.all_entries()
    }

    /// Iterates over the entries with keys below `to_key`.
    pub fn iterate_entries_minor(
        &self,
        to_key: &[u8],
        inclusive: bool,
        ascending: bool,
    ) -> EntryCursor<'_> {
        self.tree.iterate_entries_minor(to_key, inclusive, ascending)
    }

    /// Iterates over the entries with keys above `from_key`.
    pub fn iterate_entries_major(
        &self,
        from_key: &[u8],
        inclusive: bool,
        ascending: bool,
    ) -> EntryCursor<'_> {
        self.tree.iterate_entries_major(from_key, inclusive, ascending)
    }

    /// Iterates over the entries with keys between `from_key` and `to_key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `from_key` sorts after `to_key`.
    pub fn iterate_entries_between(
        &self,
        from_key: &[u8],
        from_inclusive: bool,
        to_key: &[u8],
        to_inclusive: bool,
        ascending: bool,
    ) -> Result<EntryCursor<'_>> {
        self.tree.iterate_entries_between(from_key, from_inclusive, to_key, to_inclusive, ascending)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    fn index() -> SingleValueIndex {
        let store = Arc::new(PageStore::in_memory(StoreConfig::default()).unwrap());
        SingleValueIndex::create(store, "people.email", IndexConfig::default()).unwrap()
    }

    #[test]
    fn test_null_key_is_separate() {
        let index = index();
        index.put(Some(b"ann@example.com".as_slice()), RecordId::new(5, 1)).unwrap();
        index.put(None, RecordId::new(5, 2)).unwrap();

        assert_eq!(index.get(None).unwrap(), Some(RecordId::new(5, 2)));
        assert_eq!(
            index.get(Some(b"ann@example.com".as_slice())).unwrap(),
            Some(RecordId::new(5, 1))
        );
        assert_eq!(index.size().unwrap(), 2);
        assert_eq!(index.all_entries().count(), 1);

        assert_eq!(index.remove(None).unwrap(), Some(RecordId::new(5, 2)));
        assert_eq!(index.size().unwrap(), 1);
    }

    #[test]
    fn test_validated_put_on_null_key() {
        let index = index();
        index.put(None, RecordId::new(1, 1)).unwrap();

        let stored = index
            .validated_put(None, RecordId::new(1, 2), |key, old, _| {
                assert!(key.is_none());
                assert_eq!(old, Some(RecordId::new(1, 1)));
                Ok(Validation::Ignore)
            })
            .unwrap();
        assert!(!stored);
        assert_eq!(index.get(None).unwrap(), Some(RecordId::new(1, 1)));
    }

    #[test]
    fn test_validator_can_reject() {
        let index = index();
        index.put(Some(b"k".as_slice()), RecordId::new(1, 1)).unwrap();

        let result =
            index.validated_put(Some(b"k".as_slice()), RecordId::new(1, 2), |_, old, _| match old {
                Some(_) => Err(Error::ValidationFailed { reason: "duplicate key".to_string() }),
                None => Ok(Validation::Store(RecordId::new(1, 2))),
            });
        assert!(matches!(result, Err(Error::ValidationFailed { .. })));
        assert_eq!(index.get(Some(b"k".as_slice())).unwrap(), Some(RecordId::new(1, 1)));
    }

    #[test]
    fn test_delete_requires_empty() {
        let index = index();
        index.put(None, RecordId::new(1, 1)).unwrap();
        assert!(matches!(index.delete(), Err(Error::NotEmpty { size: 1, .. })));
    }

    #[test]
    fn test_delete_empty_index_removes_both_files() {
        let store = Arc::new(PageStore::in_memory(StoreConfig::default()).unwrap());
        let index =
            SingleValueIndex::create(Arc::clone(&store), "idx", IndexConfig::default()).unwrap();
        index.put(Some(b"k".as_slice()), RecordId::new(1, 1)).unwrap();
        index.remove(Some(b"k".as_slice())).unwrap();
        index.delete().unwrap();

        assert!(!store.file_exists("idx.sbt"));
        assert!(!store.file_exists("idx.nbt"));
        SingleValueIndex::create(store, "idx", IndexConfig::default()).unwrap();
    }
}
