//! Bucket splitting during insertion.
//!
//! # Algorithm Overview
//!
//! When a bucket cannot take a new entry, its entries and the pending one are
//! divided into two halves that each cover a subrange of the bucket's range:
//!
//! 1. **Leaf split** (`plan_leaf_split`): the halves are cut near the byte
//!    median. Around it, the cut with the shortest separator wins; the
//!    separator is the shortest key above the left half and at or below the
//!    first key of the right half, so it need not be a stored key.
//!
//! 2. **Branch split** (`plan_branch_split`): the middle entry moves up as the
//!    separator and leaves the bucket. Its children become the last right
//!    child of the left half and the first left child of the right half.
//!
//! Each half is rebuilt under the common prefix of its new range, which is
//! never shorter than the old prefix.
//!
//! A non-root bucket keeps the left half in place and moves the right half to
//! a new page, then inserts the separator into its parent (which may split in
//! turn). The root never moves: both halves go to new pages and the root is
//! rewritten as a branch with a single separator.

use super::{
    BinaryBTree,
    boundary::{extract_common_prefix, shortest_separator},
    bucket::{BucketEntry, BucketMut, BucketRef, EntryValue, fits},
    locator::PathLevel,
};
use crate::{
    error::{Error, Result},
    page::Page,
    storage::AtomicOperation,
    types::PageIndex,
};

/// How a full bucket is divided.
#[derive(Debug)]
pub(crate) struct SplitPlan {
    /// Entries kept in the left bucket.
    pub left: Vec<BucketEntry>,
    /// Key that goes up into the parent.
    pub separator: Vec<u8>,
    /// Entries moved to the right bucket.
    pub right: Vec<BucketEntry>,
}

/// Smallest cut position whose left side holds at least half the bytes.
fn byte_median(entries: &[BucketEntry], prefix_len: usize) -> usize {
    let total: usize = entries.iter().map(|entry| entry.size_under(prefix_len)).sum();
    let mut cumulative = 0;
    for (index, entry) in entries.iter().enumerate() {
        if cumulative * 2 >= total {
            return index;
        }
        cumulative += entry.size_under(prefix_len);
    }
    entries.len()
}

/// Divides the sorted entries of an overflowing leaf covering `[llb, sub)`.
///
/// # Errors
///
/// Returns [`Error::Corrupted`] if no cut yields two halves that fit.
pub(crate) fn plan_leaf_split(
    page_size: usize,
    entry_limit: usize,
    prefix_len: usize,
    mut entries: Vec<BucketEntry>,
    llb: &[u8],
    sub: &[u8],
) -> Result<SplitPlan> {
    if entries.len() < 2 {
        return Err(Error::Corrupted { reason: format!("cannot split {} entries", entries.len()) });
    }

    let mid = byte_median(&entries, prefix_len).clamp(1, entries.len() - 1);
    let mut best: Option<(usize, Vec<u8>)> = None;
    // Listed mid first so it wins ties.
    for cut in [mid, mid - 1, mid + 1] {
        if cut == 0 || cut >= entries.len() {
            continue;
        }
        let separator = shortest_separator(&entries[cut - 1].key, &entries[cut].key);
        if best.as_ref().is_some_and(|(_, chosen)| chosen.len() <= separator.len()) {
            continue;
        }
        let (left, right) = entries.split_at(cut);
        if fits(page_size, entry_limit, &extract_common_prefix(llb, &separator), left)
            && fits(page_size, entry_limit, &extract_common_prefix(&separator, sub), right)
        {
            best = Some((cut, separator));
        }
    }

    let Some((cut, separator)) = best else {
        return Err(Error::Corrupted {
            reason: format!("no split of {} leaf entries fits", entries.len()),
        });
    };
    let right = entries.split_off(cut);
    Ok(SplitPlan { left: entries, separator, right })
}

/// Divides the sorted entries of an overflowing branch covering `[llb, sub)`.
///
/// The middle entry by count is promoted when both halves fit; otherwise the
/// byte median is tried.
///
/// # Errors
///
/// Returns [`Error::Corrupted`] if neither choice yields two halves that fit.
pub(crate) fn plan_branch_split(
    page_size: usize,
    entry_limit: usize,
    prefix_len: usize,
    mut entries: Vec<BucketEntry>,
    llb: &[u8],
    sub: &[u8],
) -> Result<SplitPlan> {
    let len = entries.len();
    if len < 3 {
        return Err(Error::Corrupted { reason: format!("cannot split {len} branch entries") });
    }

    let by_count = len / 2;
    let by_size = byte_median(&entries, prefix_len).clamp(1, len - 2);
    for promoted in [by_count, by_size] {
        let separator = &entries[promoted].key;
        let left = &entries[..promoted];
        let right = &entries[promoted + 1..];
        if fits(page_size, entry_limit, &extract_common_prefix(llb, separator), left)
            && fits(page_size, entry_limit, &extract_common_prefix(separator, sub), right)
        {
            let right = entries.split_off(promoted + 1);
            let separator = entries.pop().map(|entry| entry.key).unwrap_or_default();
            return Ok(SplitPlan { left: entries, separator, right });
        }
    }

    Err(Error::Corrupted { reason: format!("no split of {len} branch entries fits") })
}

/// Inserts `entry` into a sorted entry list at `index`, pointing branch
/// neighbours at its children.
fn insert_pending(entries: &mut Vec<BucketEntry>, index: usize, entry: BucketEntry) {
    if let EntryValue::Children { left, right } = entry.value {
        if let Some(EntryValue::Children { right: previous, .. }) =
            index.checked_sub(1).and_then(|i| entries.get_mut(i)).map(|e| &mut e.value)
        {
            *previous = left;
        }
        if let Some(EntryValue::Children { left: next, .. }) =
            entries.get_mut(index).map(|e| &mut e.value)
        {
            *next = right;
        }
    }
    entries.insert(index, entry);
}

impl BinaryBTree {
    fn entry_limit(&self) -> usize {
        self.config.max_bucket_entries.unwrap_or(usize::from(u16::MAX))
    }

    /// Inserts `entry` at position `index` of the bucket at `levels[level]`,
    /// splitting it (and its ancestors) when it is full.
    ///
    /// Leaf levels take [`EntryValue::Record`] entries, branch levels take
    /// separators with their children.
    pub(crate) fn insert_with_split(
        &self,
        op: &mut AtomicOperation,
        levels: &[PathLevel],
        level: usize,
        index: usize,
        entry: BucketEntry,
    ) -> Result<()> {
        let current = &levels[level];
        let mut page = self.write_page(op, current.page)?;

        let overflow = {
            let mut bucket = self.bucket_mut(&mut page)?;
            let Some(suffix) = entry.key.strip_prefix(current.prefix.as_slice()) else {
                return Err(Error::Corrupted {
                    reason: format!("key {:?} outside bucket {}", entry.key, current.page),
                });
            };
            let added = match entry.value {
                EntryValue::Record(value) if bucket.as_ref().is_leaf() => {
                    bucket.add_leaf_entry(index, suffix, value)
                },
                EntryValue::Children { left, right } if !bucket.as_ref().is_leaf() => {
                    bucket.add_separator(index, suffix, left, right)
                },
                _ => {
                    return Err(Error::Corrupted {
                        reason: format!("entry kind does not match bucket {}", current.page),
                    });
                },
            };
            if added { None } else { Some((bucket.as_ref().is_leaf(), bucket.as_ref().entries())) }
        };
        let Some((is_leaf, mut entries)) = overflow else {
            self.release_page(op, page);
            return Ok(());
        };

        insert_pending(&mut entries, index, entry);
        let page_size = self.store.page_size();
        let count = entries.len();
        let plan = if is_leaf {
            plan_leaf_split(
                page_size,
                self.entry_limit(),
                current.prefix.len(),
                entries,
                &current.llb,
                &current.sub,
            )?
        } else {
            plan_branch_split(
                page_size,
                self.entry_limit(),
                current.prefix.len(),
                entries,
                &current.llb,
                &current.sub,
            )?
        };
        tracing::debug!(
            index = %self.name,
            page = current.page,
            level,
            is_leaf,
            entries = count,
            separator_len = plan.separator.len(),
            "Splitting bucket"
        );

        if level == 0 {
            self.split_root(op, page, is_leaf, current, plan)
        } else {
            let right = self.split_non_root(op, page, is_leaf, current, &plan)?;
            let separator = BucketEntry {
                key: plan.separator,
                value: EntryValue::Children { left: current.page, right },
            };
            self.insert_with_split(op, levels, level - 1, levels[level - 1].child_slot(), separator)
        }
    }

    /// Writes `entries` into a fresh bucket on page `index`.
    fn fill_new_bucket(
        &self,
        op: &AtomicOperation,
        index: PageIndex,
        is_leaf: bool,
        prefix: &[u8],
        entries: &[BucketEntry],
    ) -> Result<Page> {
        let mut page = self.write_page(op, index)?;
        BucketMut::init(&mut page, is_leaf, prefix)
            .limit_entries(self.config.max_bucket_entries)
            .rebuild(prefix, entries)?;
        Ok(page)
    }

    /// Moves both halves of the root to new pages and turns the root into a
    /// branch over them.
    fn split_root(
        &self,
        op: &mut AtomicOperation,
        mut root: Page,
        is_leaf: bool,
        current: &PathLevel,
        plan: SplitPlan,
    ) -> Result<()> {
        let left_index = self.allocate_new_page(op)?;
        let right_index = self.allocate_new_page(op)?;

        let left_prefix = extract_common_prefix(&current.llb, &plan.separator);
        let mut left = self.fill_new_bucket(op, left_index, is_leaf, &left_prefix, &plan.left)?;
        let right_prefix = extract_common_prefix(&plan.separator, &current.sub);
        let mut right = self.fill_new_bucket(op, right_index, is_leaf, &right_prefix, &plan.right)?;
        if is_leaf {
            BucketMut::from_page(&mut left)?.set_right_sibling(Some(right_index));
            BucketMut::from_page(&mut right)?.set_left_sibling(Some(left_index));
        }

        let suffix = &plan.separator[current.prefix.len()..];
        if !BucketMut::init(&mut root, false, &current.prefix).add_branch_entry(
            0,
            suffix,
            left_index,
            right_index,
        ) {
            return Err(Error::Corrupted { reason: "root separator does not fit".to_string() });
        }

        self.release_page(op, left);
        self.release_page(op, right);
        self.release_page(op, root);
        tracing::debug!(index = %self.name, left = left_index, right = right_index, "Split root");
        Ok(())
    }

    /// Keeps the left half in `page` and moves the right half to a new page,
    /// whose index is returned.
    fn split_non_root(
        &self,
        op: &mut AtomicOperation,
        mut page: Page,
        is_leaf: bool,
        current: &PathLevel,
        plan: &SplitPlan,
    ) -> Result<PageIndex> {
        let right_index = self.allocate_new_page(op)?;
        let old_right = BucketRef::from_page(&page)?.right_sibling();

        let left_prefix = extract_common_prefix(&current.llb, &plan.separator);
        {
            let mut bucket = self.bucket_mut(&mut page)?;
            bucket.rebuild(&left_prefix, &plan.left)?;
            if is_leaf {
                bucket.set_right_sibling(Some(right_index));
            }
        }

        let right_prefix = extract_common_prefix(&plan.separator, &current.sub);
        let mut right = self.fill_new_bucket(op, right_index, is_leaf, &right_prefix, &plan.right)?;
        if is_leaf {
            let mut bucket = BucketMut::from_page(&mut right)?;
            bucket.set_left_sibling(Some(current.page));
            bucket.set_right_sibling(old_right);
        }
        self.release_page(op, page);
        self.release_page(op, right);

        if let Some(next) = old_right.filter(|_| is_leaf) {
            let mut next_page = self.write_page(op, next)?;
            BucketMut::from_page(&mut next_page)?.set_left_sibling(Some(right_index));
            self.release_page(op, next_page);
        }
        Ok(right_index)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        backend::MIN_PAGE_SIZE,
        types::{ROOT_LARGEST_LOWER_BOUND, ROOT_SMALLEST_UPPER_BOUND, RecordId, encode_key},
    };

    fn leaf_entry(key: &[u8]) -> BucketEntry {
        BucketEntry { key: encode_key(key), value: EntryValue::Record(RecordId::new(1, 0)) }
    }

    fn branch_entry(key: &[u8], left: PageIndex, right: PageIndex) -> BucketEntry {
        BucketEntry { key: encode_key(key), value: EntryValue::Children { left, right } }
    }

    #[test]
    fn test_leaf_split_prefers_short_separator() {
        let entries = vec![
            leaf_entry(b"apple"),
            leaf_entry(b"apricot"),
            leaf_entry(b"banana"),
            leaf_entry(b"blueberry"),
        ];
        let plan = plan_leaf_split(
            MIN_PAGE_SIZE,
            3,
            0,
            entries,
            ROOT_LARGEST_LOWER_BOUND,
            ROOT_SMALLEST_UPPER_BOUND,
        )
        .unwrap();

        assert_eq!(plan.separator, encode_key(b"b"));
        assert_eq!(plan.left.len(), 2);
        assert_eq!(plan.right.len(), 2);
    }

    #[test]
    fn test_leaf_split_respects_entry_limit() {
        let entries: Vec<_> = [b"a", b"b", b"c"].iter().map(|key| leaf_entry(*key)).collect();
        let plan = plan_leaf_split(
            MIN_PAGE_SIZE,
            2,
            0,
            entries,
            ROOT_LARGEST_LOWER_BOUND,
            ROOT_SMALLEST_UPPER_BOUND,
        )
        .unwrap();

        assert!(plan.left.len() <= 2 && plan.right.len() <= 2);
        assert_eq!(plan.left.len() + plan.right.len(), 3);
        assert!(plan.left.last().unwrap().key < plan.separator);
        assert!(plan.separator <= plan.right[0].key);
    }

    #[test]
    fn test_leaf_split_balances_bytes() {
        // One large key on the left; a count split would leave it with company.
        let large = vec![b'a'; 60];
        let entries = vec![
            leaf_entry(&large),
            leaf_entry(b"b"),
            leaf_entry(b"c"),
            leaf_entry(b"d"),
            leaf_entry(b"e"),
        ];
        let plan = plan_leaf_split(
            MIN_PAGE_SIZE,
            usize::MAX,
            0,
            entries,
            ROOT_LARGEST_LOWER_BOUND,
            ROOT_SMALLEST_UPPER_BOUND,
        )
        .unwrap();

        assert_eq!(plan.left.len(), 1);
        assert_eq!(plan.right.len(), 4);
    }

    #[test]
    fn test_leaf_split_needs_two_entries() {
        let result = plan_leaf_split(
            MIN_PAGE_SIZE,
            2,
            0,
            vec![leaf_entry(b"a")],
            ROOT_LARGEST_LOWER_BOUND,
            ROOT_SMALLEST_UPPER_BOUND,
        );
        assert!(matches!(result, Err(Error::Corrupted { .. })));
    }

    #[test]
    fn test_branch_split_promotes_middle() {
        let entries = vec![
            branch_entry(b"b", 10, 11),
            branch_entry(b"d", 11, 12),
            branch_entry(b"f", 12, 13),
            branch_entry(b"h", 13, 14),
            branch_entry(b"j", 14, 15),
        ];
        let plan = plan_branch_split(
            MIN_PAGE_SIZE,
            usize::MAX,
            0,
            entries,
            ROOT_LARGEST_LOWER_BOUND,
            ROOT_SMALLEST_UPPER_BOUND,
        )
        .unwrap();

        assert_eq!(plan.separator, encode_key(b"f"));
        assert_eq!(plan.left.len(), 2);
        assert_eq!(plan.right.len(), 2);
        // The promoted entry's children stay reachable from the halves.
        assert_eq!(plan.left[1].value, EntryValue::Children { left: 11, right: 12 });
        assert_eq!(plan.right[0].value, EntryValue::Children { left: 13, right: 14 });
    }

    #[test]
    fn test_branch_split_falls_back_to_byte_median() {
        // Three large separators up front: the middle by count would keep all
        // of them on the left, which overflows the page.
        let mut entries: Vec<_> = [b'a', b'b', b'c']
            .iter()
            .zip(10..)
            .map(|(&byte, child)| branch_entry(&[byte; 160], child, child + 1))
            .collect();
        entries.extend(
            [b"d", b"e", b"f", b"g", b"h", b"i"]
                .iter()
                .zip(13..)
                .map(|(key, child)| branch_entry(*key, child, child + 1)),
        );
        assert!(!fits(MIN_PAGE_SIZE, usize::MAX, &[], &entries[..4]));

        let plan = plan_branch_split(
            MIN_PAGE_SIZE,
            usize::MAX,
            0,
            entries,
            ROOT_LARGEST_LOWER_BOUND,
            ROOT_SMALLEST_UPPER_BOUND,
        )
        .unwrap();

        assert_eq!(plan.separator, encode_key(&[b'c'; 160]));
        assert_eq!(plan.left.len(), 2);
        assert_eq!(plan.right.len(), 6);
    }

    #[test]
    fn test_insert_pending_fixes_neighbours() {
        let mut entries = vec![branch_entry(b"b", 10, 11), branch_entry(b"f", 11, 12)];
        insert_pending(&mut entries, 1, branch_entry(b"d", 11, 20));

        assert_eq!(entries[0].value, EntryValue::Children { left: 10, right: 11 });
        assert_eq!(entries[1].value, EntryValue::Children { left: 11, right: 20 });
        assert_eq!(entries[2].value, EntryValue::Children { left: 20, right: 12 });
    }

    #[test]
    fn test_byte_median() {
        let entries: Vec<_> = [b"a", b"b", b"c", b"d"].iter().map(|key| leaf_entry(*key)).collect();
        assert_eq!(byte_median(&entries, 0), 2);
    }
}
