//! Prefix-compressed B+ tree over byte keys.
//!
//! The tree maps encoded keys to [`RecordId`]s inside one page file. Page 0
//! holds the [`EntryPoint`](entry_point::EntryPoint) and page 1 is always the
//! root; splits and merges never move the root, they rewrite it in place.
//!
//! ## Structure
//!
//! - `boundary.rs`: key ranges, common prefixes and separators
//! - `bucket.rs`: page layout of leaf and branch buckets
//! - `entry_point.rs`: tree metadata page
//! - `locator.rs`: descent from the root, recording the path taken
//! - `split.rs`: bucket splits during insertion
//! - `rebalance.rs`: rotations and merges during removal
//! - `allocator.rs`: page allocation and the free list
//! - `cursor.rs`: batched range iteration over the leaf chain
//! - `null_bucket.rs`: storage for the value of the null key
//!
//! ## Concurrency
//!
//! Every public call takes the component lock of the tree (registered under
//! its name in the store's [`AtomicOperationsManager`]) shared, and then the
//! tree's own structural lock: shared for reads, exclusive for writes. Only
//! `delete` and `close` take the component lock exclusively. Writes run
//! inside one atomic operation, so a failed insert or remove leaves the
//! committed tree untouched.
//!
//! [`AtomicOperationsManager`]: crate::storage::AtomicOperationsManager

mod allocator;
/// Key boundaries, common prefixes and separators.
pub mod boundary;
/// Leaf and branch bucket layout.
pub mod bucket;
/// Batched range iteration.
pub mod cursor;
/// Tree metadata page.
pub mod entry_point;
mod locator;
/// Out-of-tree storage for the null key.
pub mod null_bucket;
mod rebalance;
mod split;

use std::sync::Arc;

pub use cursor::{Direction, EntryCursor};
use entry_point::EntryPoint;
use parking_lot::RwLock;

use crate::{
    btree::{
        boundary::extract_common_prefix,
        bucket::{BucketMut, BucketRef},
        cursor::KeyBound,
    },
    config::IndexConfig,
    error::{Error, Result},
    page::Page,
    storage::{AtomicOperation, FileId, PageStore},
    types::{
        ENTRY_POINT_INDEX, PageIndex, ROOT_INDEX, ROOT_LARGEST_LOWER_BOUND,
        ROOT_SMALLEST_UPPER_BOUND, RecordId, decode_key, encode_key,
    },
};

/// File extension of tree files.
pub const TREE_FILE_EXTENSION: &str = "sbt";

/// Outcome of a put validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// Store this value.
    Store(RecordId),
    /// Leave the tree unchanged.
    Ignore,
}

/// A B+ tree index stored in one page file.
pub struct BinaryBTree {
    name: String,
    store: Arc<PageStore>,
    file: FileId,
    config: IndexConfig,
    component: Arc<RwLock<()>>,
    lock: RwLock<()>,
}

impl BinaryBTree {
    /// Creates an empty tree in a new file `<name>.sbt`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not suit the store's page size.
    /// Returns [`Error::IndexExists`] if a tree with this name exists.
    /// Returns [`Error::Io`] if the file cannot be created.
    pub fn create(store: Arc<PageStore>, name: &str, config: IndexConfig) -> Result<Self> {
        config.validate(store.page_size())?;
        let file = store.add_file(&file_name(name))?;
        let tree = Self::with_file(store, name, file, config);

        let created = tree.write_locked(|op| {
            let index = tree.add_page(op)?;
            let mut entry_point = tree.write_page(op, index)?;
            EntryPoint::new().write(&mut entry_point);
            tree.release_page(op, entry_point);

            let index = tree.add_page(op)?;
            let mut root = tree.write_page(op, index)?;
            let prefix = extract_common_prefix(ROOT_LARGEST_LOWER_BOUND, ROOT_SMALLEST_UPPER_BOUND);
            BucketMut::init(&mut root, true, &prefix);
            tree.release_page(op, root);
            Ok(())
        });

        if let Err(err) = created {
            tree.store.delete_file(file)?;
            return Err(err);
        }
        tracing::info!(index = %tree.name, "Created index");
        Ok(tree)
    }

    /// Opens the existing tree `<name>.sbt`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexNotFound`] if no such tree exists.
    /// Returns [`Error::PageTypeMismatch`] if the file does not hold a tree.
    pub fn load(store: Arc<PageStore>, name: &str, config: IndexConfig) -> Result<Self> {
        config.validate(store.page_size())?;
        let file = store.open_file(&file_name(name))?;
        let tree = Self::with_file(store, name, file, config);

        let size = tree.read_locked(|| {
            let root = tree.read_page(None, ROOT_INDEX)?;
            BucketRef::from_page(&root)?;
            tree.entry_point(None).map(|entry_point| entry_point.tree_size)
        });
        let size = match size {
            Ok(size) => size,
            Err(err) => {
                tree.store.close_file(file);
                return Err(err);
            },
        };
        tracing::info!(index = %tree.name, size, "Loaded index");
        Ok(tree)
    }

    fn with_file(store: Arc<PageStore>, name: &str, file: FileId, config: IndexConfig) -> Self {
        let component = store.atomic_operations().component_lock(name);
        Self {
            name: name.to_string(),
            store,
            file,
            config,
            component,
            lock: RwLock::new(()),
        }
    }

    /// Removes the tree and its file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotEmpty`] if the tree still holds entries.
    /// Returns [`Error::Io`] if the file cannot be removed.
    pub fn delete(self) -> Result<()> {
        let size = self.size()?;
        if size > 0 {
            return Err(Error::NotEmpty { name: self.name.clone(), size });
        }

        let _component = self.component.write();
        let _tree = self.lock.write();
        self.store.delete_file(self.file).map_err(|err| err.in_index(&self.name))?;
        self.store.atomic_operations().remove_component(&self.name);
        tracing::info!(index = %self.name, "Deleted index");
        Ok(())
    }

    /// Closes the tree, keeping its file.
    pub fn close(self) {
        let _component = self.component.write();
        let _tree = self.lock.write();
        self.store.close_file(self.file);
        tracing::debug!(index = %self.name, "Closed index");
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the descent finds a broken tree.
    /// Returns [`Error::IndexIo`] if a page cannot be read.
    pub fn get(&self, key: &[u8]) -> Result<Option<RecordId>> {
        let key = encode_key(key);
        self.read_locked(|| {
            let (leaf, item) = self.find_bucket(None, &key)?;
            match item {
                Ok(index) => {
                    let page = self.read_page(None, leaf)?;
                    Ok(Some(BucketRef::from_page(&page)?.value(index)))
                },
                Err(_) => Ok(None),
            }
        })
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyTooLarge`] if the encoded key exceeds `max_key_size`.
    /// Returns [`Error::Corrupted`] if the tree is broken.
    /// Returns [`Error::IndexIo`] if a page cannot be read or written.
    pub fn put(&self, key: &[u8], value: RecordId) -> Result<()> {
        let validator = None::<fn(&[u8], Option<RecordId>, RecordId) -> Result<Validation>>;
        self.put_with(key, value, validator).map(|_| ())
    }

    /// Stores `value` under `key` after consulting `validator`.
    ///
    /// The validator sees the key, the current value if any and the proposed
    /// value. It may substitute the value, ask for the put to be skipped or
    /// fail it with an error.
    ///
    /// Returns false if the validator answered [`Validation::Ignore`].
    ///
    /// # Errors
    ///
    /// Returns the validator's error unchanged, and otherwise the same errors
    /// as [`put`](Self::put).
    pub fn validated_put<V>(&self, key: &[u8], value: RecordId, validator: V) -> Result<bool>
    where
        V: FnOnce(&[u8], Option<RecordId>, RecordId) -> Result<Validation>,
    {
        self.put_with(key, value, Some(validator))
    }

    fn put_with<V>(&self, key: &[u8], value: RecordId, validator: Option<V>) -> Result<bool>
    where
        V: FnOnce(&[u8], Option<RecordId>, RecordId) -> Result<Validation>,
    {
        let encoded = encode_key(key);
        if encoded.len() > self.config.max_key_size {
            return Err(Error::KeyTooLarge { size: encoded.len(), max: self.config.max_key_size });
        }

        self.write_locked(|op| {
            let path = self.find_bucket_for_update(op, &encoded)?;
            let leaf = path.leaf();
            let old = match path.item {
                Ok(index) => {
                    let page = self.read_page(Some(op), leaf.page)?;
                    Some(BucketRef::from_page(&page)?.value(index))
                },
                Err(_) => None,
            };

            let value = match validator {
                None => value,
                Some(validator) => match validator(key, old, value)? {
                    Validation::Store(value) => value,
                    Validation::Ignore => return Ok(false),
                },
            };

            match path.item {
                Ok(index) => {
                    let mut page = self.write_page(op, leaf.page)?;
                    BucketMut::from_page(&mut page)?.update_value(index, value);
                    self.release_page(op, page);
                },
                Err(index) => {
                    let mut page = self.write_page(op, leaf.page)?;
                    let added = self
                        .bucket_mut(&mut page)?
                        .add_leaf_entry(index, &encoded[leaf.prefix.len()..], value);
                    if added {
                        self.release_page(op, page);
                    } else {
                        drop(page);
                        let entry = bucket::BucketEntry {
                            key: encoded.clone(),
                            value: bucket::EntryValue::Record(value),
                        };
                        let depth = path.levels.len() - 1;
                        self.insert_with_split(op, &path.levels, depth, index, entry)?;
                    }
                    self.update_tree_size(op, 1)?;
                },
            }
            Ok(true)
        })
    }

    /// Removes `key`, returning the value it held.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the tree is broken.
    /// Returns [`Error::IndexIo`] if a page cannot be read or written.
    pub fn remove(&self, key: &[u8]) -> Result<Option<RecordId>> {
        let key = encode_key(key);
        self.write_locked(|op| {
            let Some(path) = self.find_bucket_for_remove(op, &key)? else {
                return Ok(None);
            };
            let leaf_level = path.levels.len() - 1;
            let leaf = path.leaf();

            let mut page = self.write_page(op, leaf.page)?;
            let (removed, now_empty) = {
                let mut bucket = BucketMut::from_page(&mut page)?;
                let removed = bucket.as_ref().value(leaf.entry);
                bucket.remove_entry(leaf.entry);
                (removed, bucket.as_ref().is_empty())
            };
            self.release_page(op, page);

            if now_empty && leaf_level > 0 {
                self.rebalance_empty_leaf(op, &path.levels)?;
            }
            self.update_tree_size(op, -1)?;
            Ok(Some(removed))
        })
    }

    /// Number of entries in the tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexIo`] if the entry point cannot be read.
    pub fn size(&self) -> Result<i64> {
        self.read_locked(|| Ok(self.entry_point(None)?.tree_size))
    }

    /// Smallest key in the tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the tree is broken.
    pub fn first_key(&self) -> Result<Option<Vec<u8>>> {
        self.read_locked(|| self.edge_key(Direction::Forward))
    }

    /// Largest key in the tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the tree is broken.
    pub fn last_key(&self) -> Result<Option<Vec<u8>>> {
        self.read_locked(|| self.edge_key(Direction::Backward))
    }

    fn edge_key(&self, direction: Direction) -> Result<Option<Vec<u8>>> {
        let item = match direction {
            Direction::Forward => self.first_item(None)?,
            Direction::Backward => self.last_item(None)?,
        };
        let Some((leaf, index)) = item else {
            return Ok(None);
        };
        let page = self.read_page(None, leaf)?;
        decode_key(&BucketRef::from_page(&page)?.full_key(index)).map(Some)
    }

    /// Iterates over every entry in ascending key order.
    pub fn all_entries(&self) -> EntryCursor<'_> {
        EntryCursor::new(self, None, None, Direction::Forward)
    }

    /// Iterates over the entries with keys below `to_key`.
    pub fn iterate_entries_minor(
        &self,
        to_key: &[u8],
        inclusive: bool,
        ascending: bool,
    ) -> EntryCursor<'_> {
        let to = KeyBound::new(to_key, inclusive);
        EntryCursor::new(self, None, Some(to), Direction::from_ascending(ascending))
    }

    /// Iterates over the entries with keys above `from_key`.
    pub fn iterate_entries_major(
        &self,
        from_key: &[u8],
        inclusive: bool,
        ascending: bool,
    ) -> EntryCursor<'_> {
        let from = KeyBound::new(from_key, inclusive);
        EntryCursor::new(self, Some(from), None, Direction::from_ascending(ascending))
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
        if from_key > to_key {
            return Err(Error::InvalidRange {
                reason: format!("lower bound {from_key:?} is above upper bound {to_key:?}"),
            });
        }
        let from = KeyBound::new(from_key, from_inclusive);
        let to = KeyBound::new(to_key, to_inclusive);
        Ok(EntryCursor::new(self, Some(from), Some(to), Direction::from_ascending(ascending)))
    }

    // ------------------------------------------------------------------
    // Locking and page helpers
    // ------------------------------------------------------------------

    /// Runs `f` under the shared component and tree locks.
    fn read_locked<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _component = self.component.read();
        let _tree = self.lock.read();
        f().map_err(|err| err.in_index(&self.name))
    }

    /// Runs `f` inside an atomic operation under the shared component lock and
    /// the exclusive tree lock.
    fn write_locked<T>(&self, f: impl FnOnce(&mut AtomicOperation) -> Result<T>) -> Result<T> {
        let _component = self.component.read();
        let _tree = self.lock.write();
        self.store.calculate_in_atomic_operation(f).map_err(|err| err.in_index(&self.name))
    }

    fn read_page(&self, op: Option<&AtomicOperation>, index: PageIndex) -> Result<Page> {
        self.store.load_page_for_read(op, self.file, index)
    }

    fn write_page(&self, op: &AtomicOperation, index: PageIndex) -> Result<Page> {
        self.store.load_page_for_write(op, self.file, index)
    }

    fn release_page(&self, op: &mut AtomicOperation, page: Page) {
        self.store.release_page_from_write(op, self.file, page);
    }

    fn add_page(&self, op: &mut AtomicOperation) -> Result<PageIndex> {
        self.store.add_page(op, self.file)
    }

    /// Mutable bucket view honouring the configured entry cap.
    fn bucket_mut<'p>(&self, page: &'p mut Page) -> Result<BucketMut<'p>> {
        Ok(BucketMut::from_page(page)?.limit_entries(self.config.max_bucket_entries))
    }

    fn entry_point(&self, op: Option<&AtomicOperation>) -> Result<EntryPoint> {
        EntryPoint::read(&self.read_page(op, ENTRY_POINT_INDEX)?)
    }

    fn update_tree_size(&self, op: &mut AtomicOperation, delta: i64) -> Result<()> {
        let mut page = self.write_page(op, ENTRY_POINT_INDEX)?;
        let mut entry_point = EntryPoint::read(&page)?;
        entry_point.tree_size += delta;
        entry_point.write(&mut page);
        self.release_page(op, page);
        Ok(())
    }
}

impl std::fmt::Debug for BinaryBTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryBTree")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("config", &self.config)
            .finish()
    }
}

fn file_name(name: &str) -> String {
    format!("{name}.{TREE_FILE_EXTENSION}")
}
