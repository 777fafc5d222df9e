//! Descent from the root to the leaf responsible for a key.

use super::{
    BinaryBTree,
    boundary::{extract_common_prefix, largest_lower_boundary, smallest_upper_boundary},
    bucket::BucketRef,
};
use crate::{
    error::{Error, Result},
    storage::AtomicOperation,
    types::{PageIndex, ROOT_INDEX, ROOT_LARGEST_LOWER_BOUND, ROOT_SMALLEST_UPPER_BOUND},
};

/// One bucket visited during a descent.
#[derive(Debug, Clone)]
pub(crate) struct PathLevel {
    /// Page of the bucket.
    pub page: PageIndex,
    /// Prefix the bucket stores its keys under.
    pub prefix: Vec<u8>,
    /// Lower boundary of the bucket's key range.
    pub llb: Vec<u8>,
    /// Upper boundary of the bucket's key range.
    pub sub: Vec<u8>,
    /// Branch entry followed, or for the leaf the item position.
    pub entry: usize,
    /// Whether the descent took the left child of `entry`.
    pub is_left: bool,
}

impl PathLevel {
    /// Position of the followed child among the bucket's children.
    pub fn child_slot(&self) -> usize {
        if self.is_left { self.entry } else { self.entry + 1 }
    }
}

/// Buckets visited from the root down to a leaf.
#[derive(Debug)]
pub(crate) struct TreePath {
    /// Root first, leaf last.
    pub levels: Vec<PathLevel>,
    /// Position of the key in the leaf, or where it would be inserted.
    pub item: std::result::Result<usize, usize>,
}

impl TreePath {
    pub fn leaf(&self) -> &PathLevel {
        // A path always ends in a leaf.
        &self.levels[self.levels.len() - 1]
    }
}

/// Which child a branch search result leads to.
///
/// An exact match leads right of the separator. A key above every separator
/// goes right of the last one; anything else goes left of the first larger one.
fn route(search: std::result::Result<usize, usize>, size: usize) -> (usize, bool) {
    match search {
        Ok(index) => (index, false),
        Err(insertion) if insertion >= size => (size - 1, false),
        Err(insertion) => (insertion, true),
    }
}

impl BinaryBTree {
    /// Walks from the root to the leaf responsible for `key`, recording every level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the path is longer than `max_path_length`,
    /// a branch is empty, or a bucket prefix disagrees with its key range.
    fn descend(&self, op: Option<&AtomicOperation>, key: &[u8]) -> Result<TreePath> {
        let mut levels = Vec::new();
        let mut page_index = ROOT_INDEX;
        let mut llb = ROOT_LARGEST_LOWER_BOUND.to_vec();
        let mut sub = ROOT_SMALLEST_UPPER_BOUND.to_vec();

        loop {
            if levels.len() >= self.config.max_path_length {
                tracing::warn!(
                    index = %self.name,
                    depth = levels.len(),
                    "Descent exceeded the maximum path length"
                );
                return Err(Error::Corrupted {
                    reason: format!("path longer than {} levels", self.config.max_path_length),
                });
            }

            let page = self.read_page(op, page_index)?;
            let bucket = BucketRef::from_page(&page)?;
            let prefix = bucket.prefix().to_vec();
            if prefix != extract_common_prefix(&llb, &sub) {
                tracing::warn!(index = %self.name, page = page_index, "Bucket prefix out of range");
                return Err(Error::Corrupted {
                    reason: format!(
                        "bucket {page_index} prefix {prefix:?} does not match its range"
                    ),
                });
            }
            let Some(suffix) = key.strip_prefix(prefix.as_slice()) else {
                return Err(Error::Corrupted {
                    reason: format!(
                        "key {key:?} routed to bucket {page_index} with prefix {prefix:?}"
                    ),
                });
            };
            let search = bucket.find(suffix);

            if bucket.is_leaf() {
                let (Ok(entry) | Err(entry)) = search;
                levels.push(PathLevel {
                    page: page_index,
                    prefix,
                    llb,
                    sub,
                    entry,
                    is_left: false,
                });
                return Ok(TreePath { levels, item: search });
            }

            if bucket.is_empty() {
                return Err(Error::Corrupted {
                    reason: format!("branch bucket {page_index} is empty"),
                });
            }
            let (entry, is_left) = route(search, bucket.size());
            let child = if is_left { bucket.left(entry) } else { bucket.right(entry) };
            let child_llb = largest_lower_boundary(&bucket, entry, is_left, &prefix, &llb);
            let child_sub = smallest_upper_boundary(&bucket, entry, is_left, &prefix, &sub);

            levels.push(PathLevel { page: page_index, prefix, llb, sub, entry, is_left });
            page_index = child;
            llb = child_llb;
            sub = child_sub;
        }
    }

    /// Finds the leaf for `key` and the key's position in it.
    pub(crate) fn find_bucket(
        &self,
        op: Option<&AtomicOperation>,
        key: &[u8],
    ) -> Result<(PageIndex, std::result::Result<usize, usize>)> {
        let path = self.descend(op, key)?;
        Ok((path.leaf().page, path.item))
    }

    /// Finds the leaf for `key`, keeping the full path for splits.
    pub(crate) fn find_bucket_for_update(
        &self,
        op: &AtomicOperation,
        key: &[u8],
    ) -> Result<TreePath> {
        self.descend(Some(op), key)
    }

    /// Finds the path to `key`, or `None` if the key is absent.
    pub(crate) fn find_bucket_for_remove(
        &self,
        op: &AtomicOperation,
        key: &[u8],
    ) -> Result<Option<TreePath>> {
        let path = self.descend(Some(op), key)?;
        Ok(path.item.is_ok().then_some(path))
    }

    /// Leaf and position of the smallest entry, `None` for an empty tree.
    pub(crate) fn first_item(
        &self,
        op: Option<&AtomicOperation>,
    ) -> Result<Option<(PageIndex, usize)>> {
        self.edge_item(op, true)
    }

    /// Leaf and position of the largest entry, `None` for an empty tree.
    pub(crate) fn last_item(
        &self,
        op: Option<&AtomicOperation>,
    ) -> Result<Option<(PageIndex, usize)>> {
        self.edge_item(op, false)
    }

    fn edge_item(
        &self,
        op: Option<&AtomicOperation>,
        leftmost: bool,
    ) -> Result<Option<(PageIndex, usize)>> {
        let mut page_index = ROOT_INDEX;
        for _ in 0..self.config.max_path_length {
            let page = self.read_page(op, page_index)?;
            let bucket = BucketRef::from_page(&page)?;
            if bucket.is_empty() {
                if bucket.is_leaf() {
                    return Ok(None);
                }
                return Err(Error::Corrupted {
                    reason: format!("branch bucket {page_index} is empty"),
                });
            }

            let last = bucket.size() - 1;
            if bucket.is_leaf() {
                return Ok(Some((page_index, if leftmost { 0 } else { last })));
            }
            page_index = if leftmost { bucket.left(0) } else { bucket.right(last) };
        }

        tracing::warn!(index = %self.name, "Edge descent exceeded the maximum path length");
        Err(Error::Corrupted {
            reason: format!("path longer than {} levels", self.config.max_path_length),
        })
    }
}
