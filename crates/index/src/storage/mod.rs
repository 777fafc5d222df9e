//! Page store: named page files, page access and atomic commits.
//!
//! ```text
//! load_page_for_read ──► operation write set ──► page cache ──► backend
//!                                                                  │
//!                                      checksum verify + LSN bump ◄┘
//! ```
//!
//! Every page handed out is an owned copy. Writers take a page with
//! [`PageStore::load_page_for_write`], mutate it and hand it back with
//! [`PageStore::release_page_from_write`], which parks it in the
//! [`AtomicOperation`]. Pages are stamped, checksummed and written when the
//! operation commits.

mod atomic;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

pub use atomic::{AtomicOperation, AtomicOperationsManager};
use parking_lot::{Mutex, RwLock};

use crate::{
    backend::{FileBackend, InMemoryBackend, StorageBackend},
    config::StoreConfig,
    error::{Error, PageType, Result},
    page::{CacheStats, Page, PageCache},
    types::{PageIndex, page_id},
};

/// Identifier of a file registered in a [`PageStore`].
pub type FileId = u32;

/// Where a store keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Files live in memory and vanish with the store.
    Memory,
    /// One file per name inside this directory.
    Directory(PathBuf),
}

struct StoreFile {
    name: String,
    backend: Box<dyn StorageBackend>,
    cache: PageCache,
    /// Committed page count.
    filled_up_to: AtomicU64,
}

#[derive(Default)]
struct Registry {
    files: HashMap<FileId, Arc<StoreFile>>,
    by_name: HashMap<String, FileId>,
}

/// Shared page storage for every index of one database.
pub struct PageStore {
    location: StoreLocation,
    config: StoreConfig,
    registry: RwLock<Registry>,
    next_file_id: AtomicU32,
    /// Highest LSN handed out or observed on disk.
    lsn: AtomicU64,
    /// Serializes commits so LSNs are written in order.
    commit_lock: Mutex<()>,
    atomic_operations: AtomicOperationsManager,
}

impl PageStore {
    /// Creates a store whose files live in memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn in_memory(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_location(StoreLocation::Memory, config))
    }

    /// Opens a store backed by `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    /// Returns [`Error::Io`] if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self::with_location(StoreLocation::Directory(dir.as_ref().to_path_buf()), config))
    }

    fn with_location(location: StoreLocation, config: StoreConfig) -> Self {
        Self {
            location,
            config,
            registry: RwLock::new(Registry::default()),
            next_file_id: AtomicU32::new(0),
            lsn: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
            atomic_operations: AtomicOperationsManager::new(),
        }
    }

    /// Page size shared by all files.
    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Where the store keeps its files.
    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Coordination locks for the components living in this store.
    pub fn atomic_operations(&self) -> &AtomicOperationsManager {
        &self.atomic_operations
    }

    /// Most recent LSN handed out by a commit or read from disk.
    pub fn current_lsn(&self) -> u64 {
        self.lsn.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // File registry
    // ------------------------------------------------------------------

    fn file_path(&self, name: &str) -> Option<PathBuf> {
        match &self.location {
            StoreLocation::Memory => None,
            StoreLocation::Directory(dir) => Some(dir.join(name)),
        }
    }

    /// Returns true if a file with this name is registered or present on disk.
    pub fn file_exists(&self, name: &str) -> bool {
        if self.registry.read().by_name.contains_key(name) {
            return true;
        }
        self.file_path(name).is_some_and(|path| path.exists())
    }

    /// Creates a new empty file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexExists`] if the name is taken.
    /// Returns [`Error::Io`] if the file cannot be created.
    pub fn add_file(&self, name: &str) -> Result<FileId> {
        let mut registry = self.registry.write();
        if registry.by_name.contains_key(name)
            || self.file_path(name).is_some_and(|path| path.exists())
        {
            return Err(Error::IndexExists { name: name.to_string() });
        }

        let backend: Box<dyn StorageBackend> = match self.file_path(name) {
            None => Box::new(InMemoryBackend::with_page_size(self.config.page_size)?),
            Some(path) => Box::new(FileBackend::create(path, self.config.page_size)?),
        };

        Ok(self.register(&mut registry, name, backend, 0))
    }

    /// Opens an existing file, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexNotFound`] if no such file exists.
    /// Returns [`Error::InvalidConfig`] if the file uses a different page size.
    /// Returns [`Error::Io`] or a header error if the file cannot be read.
    pub fn open_file(&self, name: &str) -> Result<FileId> {
        let mut registry = self.registry.write();
        if let Some(&file) = registry.by_name.get(name) {
            return Ok(file);
        }

        let path = match self.file_path(name) {
            Some(path) if path.exists() => path,
            _ => return Err(Error::IndexNotFound { name: name.to_string() }),
        };

        let backend = FileBackend::open(&path)?;
        if backend.page_size() != self.config.page_size {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "File {} uses {}-byte pages, store uses {}",
                    path.display(),
                    backend.page_size(),
                    self.config.page_size
                ),
            });
        }
        let filled_up_to = backend.page_count()?;

        Ok(self.register(&mut registry, name, Box::new(backend), filled_up_to))
    }

    fn register(
        &self,
        registry: &mut Registry,
        name: &str,
        backend: Box<dyn StorageBackend>,
        filled_up_to: u64,
    ) -> FileId {
        let file = self.next_file_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = StoreFile {
            name: name.to_string(),
            backend,
            cache: PageCache::new(self.config.cache_size),
            filled_up_to: AtomicU64::new(filled_up_to),
        };
        registry.files.insert(file, Arc::new(entry));
        registry.by_name.insert(name.to_string(), file);
        file
    }

    /// Unregisters a file, keeping its contents on disk.
    pub fn close_file(&self, file: FileId) {
        let mut registry = self.registry.write();
        if let Some(entry) = registry.files.remove(&file) {
            registry.by_name.remove(&entry.name);
        }
    }

    /// Unregisters a file and removes it from disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be removed.
    pub fn delete_file(&self, file: FileId) -> Result<()> {
        let entry = {
            let mut registry = self.registry.write();
            let Some(entry) = registry.files.remove(&file) else {
                return Ok(());
            };
            registry.by_name.remove(&entry.name);
            entry
        };

        let path = self.file_path(&entry.name);
        drop(entry);
        if let Some(path) = path.filter(|path| path.exists()) {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Name the file was registered under.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the file id is unknown.
    pub fn file_name(&self, file: FileId) -> Result<String> {
        Ok(self.file(file)?.name.clone())
    }

    /// Cache statistics of one file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the file id is unknown.
    pub fn cache_stats(&self, file: FileId) -> Result<CacheStats> {
        Ok(self.file(file)?.cache.stats())
    }

    fn file(&self, file: FileId) -> Result<Arc<StoreFile>> {
        self.registry
            .read()
            .files
            .get(&file)
            .cloned()
            .ok_or_else(|| Error::Corrupted { reason: format!("Unknown file id {file}") })
    }

    // ------------------------------------------------------------------
    // Page access
    // ------------------------------------------------------------------

    /// Number of pages in `file`, as seen by `op` when given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the file id is unknown.
    pub fn filled_up_to(&self, op: Option<&AtomicOperation>, file: FileId) -> Result<u64> {
        if let Some(pending) = op.and_then(|op| op.filled_up_to(file)) {
            return Ok(pending);
        }
        Ok(self.file(file)?.filled_up_to.load(Ordering::Acquire))
    }

    /// Appends a zeroed page to `file` and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the file id is unknown or the file is full.
    pub fn add_page(&self, op: &mut AtomicOperation, file: FileId) -> Result<PageIndex> {
        let filled_up_to = self.filled_up_to(Some(op), file)?;
        let index = PageIndex::try_from(filled_up_to)
            .map_err(|_| Error::Corrupted { reason: format!("File {file} is full") })?;

        op.put_page(file, index, Page::new(page_id(index), self.config.page_size, PageType::Free));
        op.set_filled_up_to(file, filled_up_to + 1);
        Ok(index)
    }

    /// Returns a copy of a page, preferring the image buffered in `op`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageNotFound`] if the page lies beyond the end of the file.
    /// Returns [`Error::PageChecksumMismatch`] if the stored image is damaged.
    /// Returns [`Error::Io`] if the backend read fails.
    pub fn load_page_for_read(
        &self,
        op: Option<&AtomicOperation>,
        file: FileId,
        index: PageIndex,
    ) -> Result<Page> {
        if let Some(page) = op.and_then(|op| op.page(file, index)) {
            return Ok(page.clone());
        }

        let id = page_id(index);
        if id >= self.filled_up_to(op, file)? {
            return Err(Error::PageNotFound { page_id: id });
        }

        let entry = self.file(file)?;
        if let Some(page) = entry.cache.get(id) {
            return Ok(page);
        }

        let page = Page::from_bytes(id, entry.backend.read_page(id)?);
        if !page.verify_checksum() {
            tracing::warn!(file = %entry.name, page_id = id, "Page checksum mismatch");
            return Err(Error::PageChecksumMismatch { page_id: id });
        }
        self.lsn.fetch_max(page.lsn(), Ordering::AcqRel);
        entry.cache.insert(page.clone());
        Ok(page)
    }

    /// Returns a copy of a page for modification.
    ///
    /// The copy must be handed back with [`release_page_from_write`](Self::release_page_from_write)
    /// for the changes to become part of `op`.
    ///
    /// # Errors
    ///
    /// Same as [`load_page_for_read`](Self::load_page_for_read).
    pub fn load_page_for_write(
        &self,
        op: &AtomicOperation,
        file: FileId,
        index: PageIndex,
    ) -> Result<Page> {
        let mut page = self.load_page_for_read(Some(op), file, index)?;
        page.dirty = true;
        Ok(page)
    }

    /// Parks a modified page in `op`.
    pub fn release_page_from_write(&self, op: &mut AtomicOperation, file: FileId, page: Page) {
        // Page ids are only ever built from page indexes.
        let index = page.id as PageIndex;
        op.put_page(file, index, page);
    }

    // ------------------------------------------------------------------
    // Atomic operations
    // ------------------------------------------------------------------

    /// Starts a new atomic operation.
    pub fn start_atomic_operation(&self) -> AtomicOperation {
        self.atomic_operations.start_atomic_operation()
    }

    /// Ends an atomic operation, committing its pages unless `rollback` is set.
    ///
    /// Commit stamps every buffered page with one fresh LSN, checksums it and
    /// writes it to its backend. Page images and grown page counts are
    /// published to readers only after every write (and the sync, when
    /// enabled) has succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a backend write or sync fails. Nothing is
    /// published in that case.
    pub fn end_atomic_operation(&self, op: AtomicOperation, rollback: bool) -> Result<()> {
        if rollback {
            tracing::debug!(
                operation = op.id(),
                pages = op.page_count(),
                "Rolled back atomic operation"
            );
            return Ok(());
        }
        let operation_id = op.id();
        let (pages, filled_up_to) = op.into_parts();
        if pages.is_empty() && filled_up_to.is_empty() {
            return Ok(());
        }

        let _commit = self.commit_lock.lock();
        let lsn = self.lsn.fetch_add(1, Ordering::AcqRel) + 1;
        let page_count = pages.len();
        let mut touched: HashMap<FileId, Arc<StoreFile>> = HashMap::new();
        let mut written = Vec::with_capacity(page_count);

        for ((file, _), mut page) in pages {
            let entry = match touched.get(&file) {
                Some(entry) => Arc::clone(entry),
                // Deleted while the operation was running.
                None => match self.file(file) {
                    Ok(entry) => {
                        touched.insert(file, Arc::clone(&entry));
                        entry
                    },
                    Err(_) => continue,
                },
            };

            page.set_lsn(lsn);
            page.update_checksum();
            entry.backend.write_page(page.id, &page.data)?;
            written.push((entry, page));
        }

        if self.config.sync_on_commit {
            for entry in touched.values() {
                entry.backend.sync()?;
            }
        }

        // Readers see the operation only after every write has succeeded.
        for (entry, page) in written {
            entry.cache.insert(page);
        }
        for (file, count) in filled_up_to {
            if let Ok(entry) = self.file(file) {
                entry.filled_up_to.fetch_max(count, Ordering::AcqRel);
                touched.entry(file).or_insert(entry);
            }
        }

        tracing::trace!(
            operation = operation_id,
            lsn,
            pages = page_count,
            files = touched.len(),
            "Committed atomic operation"
        );
        Ok(())
    }

    /// Runs `f` inside a fresh atomic operation, committing on success and
    /// rolling back on error.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `f`, or a commit failure.
    pub fn calculate_in_atomic_operation<T>(
        &self,
        f: impl FnOnce(&mut AtomicOperation) -> Result<T>,
    ) -> Result<T> {
        let mut op = self.start_atomic_operation();
        match f(&mut op) {
            Ok(value) => {
                self.end_atomic_operation(op, false)?;
                Ok(value)
            },
            Err(err) => {
                self.end_atomic_operation(op, true)?;
                Err(err)
            },
        }
    }
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore")
            .field("location", &self.location)
            .field("page_size", &self.config.page_size)
            .field("files", &self.registry.read().files.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::{backend::MIN_PAGE_SIZE, error::PageId};

    fn memory_store() -> PageStore {
        PageStore::in_memory(StoreConfig::builder().page_size(MIN_PAGE_SIZE).build()).unwrap()
    }

    /// In-memory backend whose writes to one page always fail.
    struct FailingBackend {
        inner: InMemoryBackend,
        fail_on: PageId,
    }

    impl StorageBackend for FailingBackend {
        fn read_header(&self) -> Result<Vec<u8>> {
            self.inner.read_header()
        }

        fn write_header(&self, header: &[u8]) -> Result<()> {
            self.inner.write_header(header)
        }

        fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
            self.inner.read_page(page_id)
        }

        fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
            if page_id == self.fail_on {
                return Err(std::io::Error::other("disk full").into());
            }
            self.inner.write_page(page_id, data)
        }

        fn sync(&self) -> Result<()> {
            self.inner.sync()
        }

        fn file_size(&self) -> Result<u64> {
            self.inner.file_size()
        }

        fn page_size(&self) -> usize {
            self.inner.page_size()
        }
    }

    #[test]
    fn test_add_and_open_file() {
        let store = memory_store();
        let file = store.add_file("idx.sbt").unwrap();

        assert!(store.file_exists("idx.sbt"));
        assert_eq!(store.open_file("idx.sbt").unwrap(), file);
        assert_eq!(store.file_name(file).unwrap(), "idx.sbt");
        assert!(matches!(store.add_file("idx.sbt"), Err(Error::IndexExists { .. })));
        assert!(matches!(store.open_file("missing.sbt"), Err(Error::IndexNotFound { .. })));
    }

    #[test]
    fn test_pages_invisible_until_commit() {
        let store = memory_store();
        let file = store.add_file("idx.sbt").unwrap();

        let mut op = store.start_atomic_operation();
        let index = store.add_page(&mut op, file).unwrap();
        assert_eq!(index, 0);

        let mut page = store.load_page_for_write(&op, file, index).unwrap();
        page.set_page_type(PageType::EntryPoint);
        page.content_mut()[0] = 0x5A;
        store.release_page_from_write(&mut op, file, page);

        assert_eq!(store.filled_up_to(Some(&op), file).unwrap(), 1);
        assert_eq!(store.filled_up_to(None, file).unwrap(), 0);
        assert!(matches!(
            store.load_page_for_read(None, file, index),
            Err(Error::PageNotFound { .. })
        ));

        store.end_atomic_operation(op, false).unwrap();

        let page = store.load_page_for_read(None, file, index).unwrap();
        assert_eq!(page.content()[0], 0x5A);
        assert_eq!(page.page_type().unwrap(), PageType::EntryPoint);
        assert!(page.lsn() > 0);
    }

    #[test]
    fn test_rollback_discards_pages() {
        let store = memory_store();
        let file = store.add_file("idx.sbt").unwrap();

        let result: Result<()> = store.calculate_in_atomic_operation(|op| {
            store.add_page(op, file)?;
            Err(Error::ValidationFailed { reason: "rejected".to_string() })
        });

        assert!(result.is_err());
        assert_eq!(store.filled_up_to(None, file).unwrap(), 0);
    }

    #[test]
    fn test_failed_commit_publishes_nothing() {
        let store = memory_store();
        let backend = FailingBackend {
            inner: InMemoryBackend::with_page_size(MIN_PAGE_SIZE).unwrap(),
            fail_on: 1,
        };
        let file = store.register(&mut store.registry.write(), "idx.sbt", Box::new(backend), 0);

        store
            .calculate_in_atomic_operation(|op| {
                let index = store.add_page(op, file)?;
                let mut page = store.load_page_for_write(op, file, index)?;
                page.content_mut()[0] = 1;
                store.release_page_from_write(op, file, page);
                Ok(())
            })
            .unwrap();

        // Page 0 reaches the backend before the write of page 1 fails.
        let mut op = store.start_atomic_operation();
        let mut page = store.load_page_for_write(&op, file, 0).unwrap();
        page.content_mut()[0] = 2;
        store.release_page_from_write(&mut op, file, page);
        store.add_page(&mut op, file).unwrap();
        assert!(matches!(store.end_atomic_operation(op, false), Err(Error::Io { .. })));

        assert_eq!(store.filled_up_to(None, file).unwrap(), 1);
        assert_eq!(store.load_page_for_read(None, file, 0).unwrap().content()[0], 1);
        assert!(matches!(
            store.load_page_for_read(None, file, 1),
            Err(Error::PageNotFound { page_id: 1 })
        ));
    }

    #[test]
    fn test_each_commit_gets_new_lsn() {
        let store = memory_store();
        let file = store.add_file("idx.sbt").unwrap();

        store.calculate_in_atomic_operation(|op| store.add_page(op, file).map(|_| ())).unwrap();
        let first = store.load_page_for_read(None, file, 0).unwrap().lsn();

        store
            .calculate_in_atomic_operation(|op| {
                let page = store.load_page_for_write(op, file, 0)?;
                store.release_page_from_write(op, file, page);
                Ok(())
            })
            .unwrap();
        let second = store.load_page_for_read(None, file, 0).unwrap().lsn();

        assert!(second > first);
        assert_eq!(store.current_lsn(), second);
    }

    #[test]
    fn test_directory_store_persists_and_deletes() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::builder().page_size(MIN_PAGE_SIZE).sync_on_commit(false).build();

        {
            let store = PageStore::open(dir.path(), config.clone()).unwrap();
            let file = store.add_file("idx.sbt").unwrap();
            store
                .calculate_in_atomic_operation(|op| {
                    let index = store.add_page(op, file)?;
                    let mut page = store.load_page_for_write(op, file, index)?;
                    page.content_mut()[3] = 9;
                    store.release_page_from_write(op, file, page);
                    Ok(())
                })
                .unwrap();
        }

        let store = PageStore::open(dir.path(), config).unwrap();
        assert!(store.file_exists("idx.sbt"));
        let file = store.open_file("idx.sbt").unwrap();
        assert_eq!(store.filled_up_to(None, file).unwrap(), 1);
        let page = store.load_page_for_read(None, file, 0).unwrap();
        assert_eq!(page.content()[3], 9);
        assert_eq!(store.current_lsn(), page.lsn());

        store.delete_file(file).unwrap();
        assert!(!store.file_exists("idx.sbt"));
        assert!(!dir.path().join("idx.sbt").exists());
    }

    #[test]
    fn test_damaged_page_is_reported() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::builder().page_size(MIN_PAGE_SIZE).build();
        let path = dir.path().join("idx.sbt");

        {
            let store = PageStore::open(dir.path(), config.clone()).unwrap();
            let file = store.add_file("idx.sbt").unwrap();
            store.calculate_in_atomic_operation(|op| store.add_page(op, file).map(|_| ())).unwrap();
        }

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let store = PageStore::open(dir.path(), config).unwrap();
        let file = store.open_file("idx.sbt").unwrap();
        assert!(matches!(
            store.load_page_for_read(None, file, 0),
            Err(Error::PageChecksumMismatch { page_id: 0 })
        ));
    }
}
