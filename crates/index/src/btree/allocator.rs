//! Page allocation and the free list.
//!
//! Freed buckets are pushed onto a singly linked list whose head lives in
//! the entry point. Allocation pops that list first, then reuses spare tail
//! pages past `pages_size`, and only then grows the file.

use std::collections::HashSet;

use super::{
    BinaryBTree,
    bucket::{BucketRef, format_free_page, next_free_list_page},
    entry_point::EntryPoint,
};
use crate::{
    error::{Error, PageType, Result},
    storage::AtomicOperation,
    types::{ENTRY_POINT_INDEX, PageIndex, ROOT_INDEX},
};

impl BinaryBTree {
    /// Returns a page the caller may format as a new bucket.
    pub(crate) fn allocate_new_page(&self, op: &mut AtomicOperation) -> Result<PageIndex> {
        let mut entry_point_page = self.write_page(op, ENTRY_POINT_INDEX)?;
        let mut entry_point = EntryPoint::read(&entry_point_page)?;

        let index = match entry_point.free_list_head {
            Some(head) => {
                let page = self.read_page(Some(op), head)?;
                let found = page.page_type()?;
                if found != PageType::Free {
                    return Err(Error::Corrupted {
                        reason: format!("free list page {head} has type {found:?}"),
                    });
                }
                entry_point.free_list_head = next_free_list_page(&page);
                tracing::trace!(index = %self.name, page = head, "Reused free page");
                head
            },
            None => {
                let next = entry_point.pages_size + 1;
                if u64::from(next) < self.store.filled_up_to(Some(op), self.file)? {
                    next
                } else {
                    self.add_page(op)?
                }
            },
        };

        entry_point.pages_size = entry_point.pages_size.max(index);
        entry_point.write(&mut entry_point_page);
        self.release_page(op, entry_point_page);
        Ok(index)
    }

    /// Pushes `index` onto the free list.
    pub(crate) fn add_to_free_list(
        &self,
        op: &mut AtomicOperation,
        index: PageIndex,
    ) -> Result<()> {
        let mut entry_point_page = self.write_page(op, ENTRY_POINT_INDEX)?;
        let mut entry_point = EntryPoint::read(&entry_point_page)?;

        let mut page = self.write_page(op, index)?;
        format_free_page(&mut page, entry_point.free_list_head);
        self.release_page(op, page);

        entry_point.free_list_head = Some(index);
        entry_point.write(&mut entry_point_page);
        self.release_page(op, entry_point_page);
        tracing::trace!(index = %self.name, page = index, "Freed page");
        Ok(())
    }

    /// Checks that every page up to `pages_size` is either in the tree or on
    /// the free list, and none is in both or reachable twice.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] describing the first leaked, shared or
    /// out-of-range page.
    pub fn assert_free_pages(&self) -> Result<()> {
        self.read_locked(|| {
            let entry_point = self.entry_point(None)?;
            let mut seen: HashSet<PageIndex> = HashSet::new();
            let mut claim = |page: PageIndex, owner: &str| -> Result<()> {
                if page <= ENTRY_POINT_INDEX || page > entry_point.pages_size {
                    return Err(Error::Corrupted {
                        reason: format!(
                            "{owner} page {page} outside 1..={}",
                            entry_point.pages_size
                        ),
                    });
                }
                if !seen.insert(page) {
                    return Err(Error::Corrupted {
                        reason: format!("page {page} reachable twice (second time from {owner})"),
                    });
                }
                Ok(())
            };

            let mut pending = vec![ROOT_INDEX];
            while let Some(index) = pending.pop() {
                claim(index, "tree")?;
                let page = self.read_page(None, index)?;
                let bucket = BucketRef::from_page(&page)?;
                if !bucket.is_leaf() && !bucket.is_empty() {
                    pending.push(bucket.left(0));
                    pending.extend((0..bucket.size()).map(|entry| bucket.right(entry)));
                }
            }

            let mut next = entry_point.free_list_head;
            while let Some(index) = next {
                claim(index, "free list")?;
                let page = self.read_page(None, index)?;
                next = next_free_list_page(&page);
            }

            let missing: Vec<PageIndex> =
                (ROOT_INDEX..=entry_point.pages_size).filter(|page| !seen.contains(page)).collect();
            if !missing.is_empty() {
                tracing::warn!(index = %self.name, ?missing, "Leaked pages");
                return Err(Error::Corrupted { reason: format!("leaked pages {missing:?}") });
            }
            Ok(())
        })
    }
}
