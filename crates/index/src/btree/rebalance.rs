//! Rebalancing after a removal empties a leaf.
//!
//! # Algorithm Overview
//!
//! Only empty buckets are rebalanced; a bucket that still holds one entry is
//! left alone however small it is.
//!
//! 1. **Leaf rotation**: when the empty leaf's sibling under the same parent
//!    holds more than one entry, the sibling's nearest entry moves over and
//!    the parent separator is replaced by the shortest key between the moved
//!    entry and its old neighbour.
//!
//! 2. **Leaf merge**: when the sibling holds a single entry, the sibling
//!    takes over the empty leaf's range, the empty leaf is unlinked from the
//!    leaf chain and freed, and the parent loses one child.
//!
//! 3. **Branch repair**: a branch that loses the child of its last entry is
//!    left with one child. It borrows the nearest entry of its own sibling
//!    through the grandparent (rotation), or is folded into a sibling with a
//!    single entry (merge), which removes a child from the grandparent in
//!    turn.
//!
//! 4. **Root absorption**: when the root is left with one child, the child's
//!    contents move into the root page and the child is freed. The tree gets
//!    one level shallower.

use super::{
    BinaryBTree,
    boundary::{
        extract_common_prefix, largest_lower_boundary, shortest_separator, smallest_upper_boundary,
    },
    bucket::{BucketEntry, BucketMut, BucketRef, EntryValue},
    locator::PathLevel,
};
use crate::{
    error::{Error, Result},
    storage::AtomicOperation,
    types::{PageIndex, ROOT_INDEX},
};

/// A sibling bucket reached through the parent, with its key range.
struct Sibling {
    page: PageIndex,
    separator: Vec<u8>,
    llb: Vec<u8>,
    sub: Vec<u8>,
}

fn children(entry: &BucketEntry) -> Result<(PageIndex, PageIndex)> {
    match entry.value {
        EntryValue::Children { left, right } => Ok((left, right)),
        EntryValue::Record(_) => {
            Err(Error::Corrupted { reason: "leaf entry found in branch bucket".to_string() })
        },
    }
}

impl BinaryBTree {
    /// Finds the sibling of the child followed at `parent`: the right child of
    /// the entry when the path went left, the left child otherwise.
    fn sibling_of(&self, op: &AtomicOperation, parent: &PathLevel) -> Result<Sibling> {
        let page = self.read_page(Some(op), parent.page)?;
        let bucket = BucketRef::from_page(&page)?;
        let separator = bucket.full_key(parent.entry);

        Ok(if parent.is_left {
            Sibling {
                page: bucket.right(parent.entry),
                llb: separator.clone(),
                sub: smallest_upper_boundary(
                    &bucket,
                    parent.entry,
                    false,
                    &parent.prefix,
                    &parent.sub,
                ),
                separator,
            }
        } else {
            Sibling {
                page: bucket.left(parent.entry),
                llb: largest_lower_boundary(
                    &bucket,
                    parent.entry,
                    true,
                    &parent.prefix,
                    &parent.llb,
                ),
                sub: separator.clone(),
                separator,
            }
        })
    }

    /// Rebalances around the leaf at the end of `levels`, which has just
    /// become empty and is not the root.
    pub(crate) fn rebalance_empty_leaf(
        &self,
        op: &mut AtomicOperation,
        levels: &[PathLevel],
    ) -> Result<()> {
        let level = levels.len() - 1;
        let leaf = &levels[level];
        let parent = &levels[level - 1];
        let sibling = self.sibling_of(op, parent)?;

        let mut sibling_page = self.write_page(op, sibling.page)?;
        let mut entries = {
            let bucket = BucketRef::from_page(&sibling_page)?;
            if !bucket.is_leaf() {
                return Err(Error::Corrupted {
                    reason: format!("sibling {} of leaf {} is a branch", sibling.page, leaf.page),
                });
            }
            bucket.entries()
        };

        if entries.len() > 1 {
            let mut leaf_page = self.write_page(op, leaf.page)?;
            let separator = if parent.is_left {
                let moved = entries.remove(0);
                let separator = shortest_separator(&moved.key, &entries[0].key);
                let prefix = extract_common_prefix(&leaf.llb, &separator);
                self.bucket_mut(&mut leaf_page)?.rebuild(&prefix, &[moved])?;
                let prefix = extract_common_prefix(&separator, &sibling.sub);
                self.bucket_mut(&mut sibling_page)?.rebuild(&prefix, &entries)?;
                separator
            } else {
                let Some(moved) = entries.pop() else {
                    return Err(Error::Corrupted { reason: "sibling emptied".to_string() });
                };
                let separator = shortest_separator(&entries[entries.len() - 1].key, &moved.key);
                let prefix = extract_common_prefix(&separator, &leaf.sub);
                self.bucket_mut(&mut leaf_page)?.rebuild(&prefix, &[moved])?;
                let prefix = extract_common_prefix(&sibling.llb, &separator);
                self.bucket_mut(&mut sibling_page)?.rebuild(&prefix, &entries)?;
                separator
            };
            self.release_page(op, leaf_page);
            self.release_page(op, sibling_page);
            tracing::debug!(
                index = %self.name,
                leaf = leaf.page,
                sibling = sibling.page,
                "Rotated entry into empty leaf"
            );
            return self.replace_separator(op, levels, level - 1, separator);
        }

        if entries.is_empty() {
            return Err(Error::Corrupted {
                reason: format!(
                    "leaf {} and its sibling {} are both empty",
                    leaf.page, sibling.page
                ),
            });
        }

        let (leaf_left, leaf_right) = {
            let page = self.read_page(Some(op), leaf.page)?;
            let bucket = BucketRef::from_page(&page)?;
            (bucket.left_sibling(), bucket.right_sibling())
        };
        let expected = if parent.is_left { leaf_right } else { leaf_left };
        if expected != Some(sibling.page) {
            return Err(Error::Corrupted {
                reason: format!("leaf chain of {} skips sibling {}", leaf.page, sibling.page),
            });
        }

        // The sibling takes over the whole range; its neighbour on the far
        // side of the freed leaf is relinked.
        let (llb, sub, outer) = if parent.is_left {
            (&leaf.llb, &sibling.sub, leaf_left)
        } else {
            (&sibling.llb, &leaf.sub, leaf_right)
        };
        {
            let prefix = extract_common_prefix(llb, sub);
            let mut bucket = self.bucket_mut(&mut sibling_page)?;
            bucket.rebuild(&prefix, &entries)?;
            if parent.is_left {
                bucket.set_left_sibling(outer);
            } else {
                bucket.set_right_sibling(outer);
            }
        }
        self.release_page(op, sibling_page);

        if let Some(outer) = outer {
            let mut outer_page = self.write_page(op, outer)?;
            let mut bucket = BucketMut::from_page(&mut outer_page)?;
            if parent.is_left {
                bucket.set_right_sibling(Some(sibling.page));
            } else {
                bucket.set_left_sibling(Some(sibling.page));
            }
            self.release_page(op, outer_page);
        }

        self.add_to_free_list(op, leaf.page)?;
        tracing::debug!(
            index = %self.name,
            leaf = leaf.page,
            sibling = sibling.page,
            separator_len = sibling.separator.len(),
            "Merged empty leaf into sibling"
        );
        self.remove_child(op, levels, level - 1)
    }

    /// Drops the child followed at `levels[level]` from its branch.
    fn remove_child(
        &self,
        op: &mut AtomicOperation,
        levels: &[PathLevel],
        level: usize,
    ) -> Result<()> {
        let current = &levels[level];
        let entry = current.entry;
        let mut page = self.write_page(op, current.page)?;

        let (size, left, right) = {
            let bucket = BucketRef::from_page(&page)?;
            if bucket.is_leaf() || entry >= bucket.size() {
                return Err(Error::Corrupted {
                    reason: format!("bucket {} has no child entry {entry}", current.page),
                });
            }
            (bucket.size(), bucket.left(entry), bucket.right(entry))
        };

        if size > 1 {
            let mut bucket = BucketMut::from_page(&mut page)?;
            bucket.remove_entry(entry);
            if current.is_left {
                if entry > 0 {
                    bucket.set_right(entry - 1, right);
                }
            } else if entry < size - 1 {
                bucket.set_left(entry, left);
            }
            self.release_page(op, page);
            return Ok(());
        }

        drop(page);
        let survivor = if current.is_left { right } else { left };
        if level == 0 {
            return self.absorb_into_root(op, survivor);
        }
        self.repair_single_child_branch(op, levels, level, survivor)
    }

    /// Restores the branch at `levels[level]`, whose only remaining child is
    /// `survivor`, by rotation or merge with its sibling.
    fn repair_single_child_branch(
        &self,
        op: &mut AtomicOperation,
        levels: &[PathLevel],
        level: usize,
        survivor: PageIndex,
    ) -> Result<()> {
        let current = &levels[level];
        let grand = &levels[level - 1];
        let sibling = self.sibling_of(op, grand)?;

        let mut sibling_page = self.write_page(op, sibling.page)?;
        let mut entries = {
            let bucket = BucketRef::from_page(&sibling_page)?;
            if bucket.is_leaf() || bucket.is_empty() {
                return Err(Error::Corrupted {
                    reason: format!(
                        "sibling {} of branch {} is malformed",
                        sibling.page, current.page
                    ),
                });
            }
            bucket.entries()
        };
        let separator = sibling.separator.clone();

        if entries.len() > 1 {
            let mut page = self.write_page(op, current.page)?;
            let moved_up = if grand.is_left {
                let first = entries.remove(0);
                let (first_left, _) = children(&first)?;
                let kept = [BucketEntry {
                    key: separator,
                    value: EntryValue::Children { left: survivor, right: first_left },
                }];
                let prefix = extract_common_prefix(&current.llb, &first.key);
                self.bucket_mut(&mut page)?.rebuild(&prefix, &kept)?;
                let prefix = extract_common_prefix(&first.key, &sibling.sub);
                self.bucket_mut(&mut sibling_page)?.rebuild(&prefix, &entries)?;
                first.key
            } else {
                let Some(last) = entries.pop() else {
                    return Err(Error::Corrupted { reason: "sibling emptied".to_string() });
                };
                let (_, last_right) = children(&last)?;
                let kept = [BucketEntry {
                    key: separator,
                    value: EntryValue::Children { left: last_right, right: survivor },
                }];
                let prefix = extract_common_prefix(&last.key, &current.sub);
                self.bucket_mut(&mut page)?.rebuild(&prefix, &kept)?;
                let prefix = extract_common_prefix(&sibling.llb, &last.key);
                self.bucket_mut(&mut sibling_page)?.rebuild(&prefix, &entries)?;
                last.key
            };
            self.release_page(op, page);
            self.release_page(op, sibling_page);
            tracing::debug!(
                index = %self.name,
                branch = current.page,
                sibling = sibling.page,
                "Rotated entry into single-child branch"
            );
            return self.replace_separator(op, levels, level - 1, moved_up);
        }

        let only = entries.remove(0);
        let (only_left, only_right) = children(&only)?;
        let (merged, llb, sub) = if grand.is_left {
            let pulled = BucketEntry {
                key: separator,
                value: EntryValue::Children { left: survivor, right: only_left },
            };
            (vec![pulled, only], &current.llb, &sibling.sub)
        } else {
            let pulled = BucketEntry {
                key: separator,
                value: EntryValue::Children { left: only_right, right: survivor },
            };
            (vec![only, pulled], &sibling.llb, &current.sub)
        };
        let prefix = extract_common_prefix(llb, sub);
        self.bucket_mut(&mut sibling_page)?.rebuild(&prefix, &merged)?;
        self.release_page(op, sibling_page);

        self.add_to_free_list(op, current.page)?;
        tracing::debug!(
            index = %self.name,
            branch = current.page,
            sibling = sibling.page,
            "Merged single-child branch into sibling"
        );
        self.remove_child(op, levels, level - 1)
    }

    /// Replaces the separator of entry `levels[level].entry`, keeping its
    /// children. A longer key may overflow the bucket and split it.
    fn replace_separator(
        &self,
        op: &mut AtomicOperation,
        levels: &[PathLevel],
        level: usize,
        key: Vec<u8>,
    ) -> Result<()> {
        let current = &levels[level];
        let entry = current.entry;
        let mut page = self.write_page(op, current.page)?;

        let Some(suffix) = key.strip_prefix(current.prefix.as_slice()) else {
            return Err(Error::Corrupted {
                reason: format!("separator {key:?} outside bucket {}", current.page),
            });
        };
        let (left, right, replaced) = {
            let mut bucket = self.bucket_mut(&mut page)?;
            let (left, right) = (bucket.as_ref().left(entry), bucket.as_ref().right(entry));
            bucket.remove_entry(entry);
            (left, right, bucket.add_branch_entry(entry, suffix, left, right))
        };
        self.release_page(op, page);

        if replaced {
            return Ok(());
        }
        let separator = BucketEntry { key, value: EntryValue::Children { left, right } };
        self.insert_with_split(op, levels, level, entry, separator)
    }

    /// Moves the contents of the root's only child into the root page.
    fn absorb_into_root(&self, op: &mut AtomicOperation, child: PageIndex) -> Result<()> {
        let (is_leaf, prefix, entries) = {
            let page = self.read_page(Some(op), child)?;
            let bucket = BucketRef::from_page(&page)?;
            (bucket.is_leaf(), bucket.prefix().to_vec(), bucket.entries())
        };

        let mut root = self.write_page(op, ROOT_INDEX)?;
        BucketMut::init(&mut root, is_leaf, &prefix).rebuild(&prefix, &entries)?;
        self.release_page(op, root);
        self.add_to_free_list(op, child)?;
        tracing::debug!(
            index = %self.name,
            child,
            entries = entries.len(),
            "Root absorbed its only child"
        );
        Ok(())
    }
}
