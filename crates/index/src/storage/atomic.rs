//! Atomic operations: the unit in which page writes become visible.
//!
//! An [`AtomicOperation`] buffers every page a write call touches. Nothing
//! reaches the backend or the page cache until the operation is committed by
//! [`PageStore::end_atomic_operation`](super::PageStore::end_atomic_operation),
//! so an operation that fails halfway leaves the committed state untouched.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};

use super::FileId;
use crate::{page::Page, types::PageIndex};

/// Pages written by one in-flight operation.
pub struct AtomicOperation {
    id: u64,
    /// Buffered page images, ordered so commits write files front to back.
    pages: BTreeMap<(FileId, PageIndex), Page>,
    /// Per-file page counts grown by this operation.
    filled_up_to: HashMap<FileId, u64>,
}

impl AtomicOperation {
    pub(crate) fn new(id: u64) -> Self {
        Self { id, pages: BTreeMap::new(), filled_up_to: HashMap::new() }
    }

    /// Operation id, unique within the store.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of pages buffered so far.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Returns the buffered image of a page, if this operation wrote it.
    pub(crate) fn page(&self, file: FileId, index: PageIndex) -> Option<&Page> {
        self.pages.get(&(file, index))
    }

    pub(crate) fn put_page(&mut self, file: FileId, index: PageIndex, page: Page) {
        self.pages.insert((file, index), page);
    }

    pub(crate) fn filled_up_to(&self, file: FileId) -> Option<u64> {
        self.filled_up_to.get(&file).copied()
    }

    pub(crate) fn set_filled_up_to(&mut self, file: FileId, filled_up_to: u64) {
        self.filled_up_to.insert(file, filled_up_to);
    }

    pub(crate) fn into_parts(
        self,
    ) -> (BTreeMap<(FileId, PageIndex), Page>, HashMap<FileId, u64>) {
        (self.pages, self.filled_up_to)
    }
}

impl std::fmt::Debug for AtomicOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicOperation")
            .field("id", &self.id)
            .field("pages", &self.pages.len())
            .finish()
    }
}

/// Hands out operation ids and the per-component coordination locks.
///
/// A component (one index, identified by name) takes its lock shared for
/// reads and exclusive for the whole body of a write operation. These locks
/// are distinct from the tree's own structural lock.
#[derive(Default)]
pub struct AtomicOperationsManager {
    next_operation_id: AtomicU64,
    components: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl AtomicOperationsManager {
    /// Creates a manager with no registered components.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the coordination lock for `component`, creating it on first use.
    pub fn component_lock(&self, component: &str) -> Arc<RwLock<()>> {
        let mut components = self.components.lock();
        Arc::clone(components.entry(component.to_string()).or_default())
    }

    /// Forgets the lock of a dropped component.
    pub fn remove_component(&self, component: &str) {
        self.components.lock().remove(component);
    }

    pub(crate) fn start_atomic_operation(&self) -> AtomicOperation {
        let id = self.next_operation_id.fetch_add(1, Ordering::Relaxed) + 1;
        AtomicOperation::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_ids_increase() {
        let manager = AtomicOperationsManager::new();
        let first = manager.start_atomic_operation();
        let second = manager.start_atomic_operation();
        assert!(second.id() > first.id());
    }

    #[test]
    fn test_component_lock_is_shared_by_name() {
        let manager = AtomicOperationsManager::new();
        let a = manager.component_lock("people.name");
        let b = manager.component_lock("people.name");
        let other = manager.component_lock("people.age");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));

        let _guard = a.write();
        assert!(b.try_read().is_none());
        assert!(other.try_read().is_some());
    }
}
