//! Range cursors over the leaf chain.
//!
//! A cursor fetches entries in batches. Each refill takes the tree's shared
//! locks, walks sibling links from where the previous batch stopped, and
//! releases the locks before returning. Nothing is held between refills, so
//! writers are never blocked by an open cursor.
//!
//! To resume, the cursor first re-reads the leaf it stopped on. If the
//! leaf's LSN is unchanged, the leaf (and its sibling links) are as they
//! were and the walk continues from the next item. Otherwise the leaf was
//! rewritten since, and the cursor locates the last key it returned with a
//! fresh descent and continues strictly past it.
//!
//! Isolation is per batch: entries inside one batch are a consistent view,
//! entries across batches are read-committed.

use std::collections::VecDeque;

use super::{BinaryBTree, bucket::BucketRef};
use crate::{
    error::{Error, Result},
    types::{PageIndex, RecordId, decode_key, encode_key},
};

/// Iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending keys.
    Forward,
    /// Descending keys.
    Backward,
}

impl Direction {
    /// Maps an `ascending` flag to a direction.
    pub fn from_ascending(ascending: bool) -> Self {
        if ascending { Direction::Forward } else { Direction::Backward }
    }

    fn step(self) -> isize {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

/// One end of a key range, in stored encoding.
#[derive(Debug, Clone)]
pub(crate) struct KeyBound {
    key: Vec<u8>,
    inclusive: bool,
}

impl KeyBound {
    pub fn new(key: &[u8], inclusive: bool) -> Self {
        Self { key: encode_key(key), inclusive }
    }

    /// True if `key` lies on the allowed side of an upper bound.
    fn admits_below(&self, key: &[u8]) -> bool {
        key < self.key.as_slice() || (self.inclusive && key == self.key.as_slice())
    }

    /// True if `key` lies on the allowed side of a lower bound.
    fn admits_above(&self, key: &[u8]) -> bool {
        key > self.key.as_slice() || (self.inclusive && key == self.key.as_slice())
    }
}

/// Leaf item the last batch ended on, with the LSN the leaf had then.
#[derive(Debug, Clone, Copy)]
struct Position {
    page: PageIndex,
    item: usize,
    lsn: u64,
}

/// Item index meaning "first item" going forward, "last item" going backward.
const EDGE: isize = isize::MIN;

/// Lazy ordered sequence of `(key, record id)` pairs.
///
/// Once exhausted, a cursor stays exhausted.
pub struct EntryCursor<'a> {
    tree: &'a BinaryBTree,
    from: Option<KeyBound>,
    to: Option<KeyBound>,
    direction: Direction,
    batch: VecDeque<(Vec<u8>, RecordId)>,
    position: Option<Position>,
    /// Stored form of the last key fetched.
    last_key: Option<Vec<u8>>,
    exhausted: bool,
}

impl<'a> EntryCursor<'a> {
    pub(crate) fn new(
        tree: &'a BinaryBTree,
        from: Option<KeyBound>,
        to: Option<KeyBound>,
        direction: Direction,
    ) -> Self {
        Self {
            tree,
            from,
            to,
            direction,
            batch: VecDeque::new(),
            position: None,
            last_key: None,
            exhausted: false,
        }
    }

    /// Iteration order of this cursor.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns the next entry, refilling the batch when it runs dry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the leaf chain is broken.
    /// Returns [`Error::IndexIo`] if a page cannot be read.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, RecordId)>> {
        if self.batch.is_empty() && !self.exhausted {
            let tree = self.tree;
            if let Err(err) = tree.read_locked(|| self.fill_batch()) {
                self.exhausted = true;
                return Err(err);
            }
        }
        Ok(self.batch.pop_front())
    }

    /// Where the next batch starts: a leaf and an item index that may lie
    /// outside the leaf, or [`EDGE`].
    fn start(&self) -> Result<Option<(PageIndex, isize)>> {
        let tree = self.tree;
        let step = self.direction.step();

        if let Some(position) = self.position {
            let page = tree.read_page(None, position.page)?;
            let unchanged = page.lsn() == position.lsn
                && BucketRef::from_page(&page).is_ok_and(|bucket| bucket.is_leaf());
            if unchanged {
                return Ok(Some((position.page, position.item as isize + step)));
            }
            tracing::trace!(
                index = %tree.name,
                page = position.page,
                "Cursor page changed, relocating"
            );
        }

        if let Some(last_key) = &self.last_key {
            let (page, search) = tree.find_bucket(None, last_key)?;
            let item = match (self.direction, search) {
                (Direction::Forward, Ok(index)) => index as isize + 1,
                (Direction::Forward, Err(insertion)) => insertion as isize,
                (Direction::Backward, Ok(index) | Err(index)) => index as isize - 1,
            };
            return Ok(Some((page, item)));
        }

        match (self.direction, &self.from, &self.to) {
            (Direction::Forward, Some(from), _) => {
                let (page, search) = tree.find_bucket(None, &from.key)?;
                let item = match search {
                    Ok(index) if from.inclusive => index,
                    Ok(index) => index + 1,
                    Err(insertion) => insertion,
                };
                Ok(Some((page, item as isize)))
            },
            (Direction::Backward, _, Some(to)) => {
                let (page, search) = tree.find_bucket(None, &to.key)?;
                let item = match search {
                    Ok(index) if to.inclusive => index as isize,
                    Ok(index) | Err(index) => index as isize - 1,
                };
                Ok(Some((page, item)))
            },
            (Direction::Forward, None, _) => {
                Ok(tree.first_item(None)?.map(|(page, item)| (page, item as isize)))
            },
            (Direction::Backward, _, None) => {
                Ok(tree.last_item(None)?.map(|(page, item)| (page, item as isize)))
            },
        }
    }

    fn admits(&self, key: &[u8]) -> bool {
        match self.direction {
            Direction::Forward => self.to.as_ref().is_none_or(|to| to.admits_below(key)),
            Direction::Backward => self.from.as_ref().is_none_or(|from| from.admits_above(key)),
        }
    }

    /// Reads up to `cursor_batch_size` entries. Runs under the shared locks.
    fn fill_batch(&mut self) -> Result<()> {
        let Some((mut page_index, mut item)) = self.start()? else {
            self.exhausted = true;
            return Ok(());
        };
        let tree = self.tree;
        let batch_size = tree.config.cursor_batch_size;
        let step = self.direction.step();
        let max_hops = tree.entry_point(None)?.pages_size as usize;
        let mut hops = 0usize;

        'pages: loop {
            let page = tree.read_page(None, page_index)?;
            let bucket = BucketRef::from_page(&page)?;
            if !bucket.is_leaf() {
                return Err(Error::Corrupted {
                    reason: format!("cursor reached branch bucket {page_index}"),
                });
            }

            let size = bucket.size() as isize;
            if item == EDGE {
                item = match self.direction {
                    Direction::Forward => 0,
                    Direction::Backward => size - 1,
                };
            }

            while (0..size).contains(&item) {
                if self.batch.len() >= batch_size {
                    break 'pages;
                }
                let index = item as usize;
                let key = bucket.full_key(index);
                if !self.admits(&key) {
                    self.exhausted = true;
                    break 'pages;
                }
                self.batch.push_back((decode_key(&key)?, bucket.value(index)));
                self.position = Some(Position { page: page_index, item: index, lsn: bucket.lsn() });
                self.last_key = Some(key);
                item += step;
            }

            let next = match self.direction {
                Direction::Forward => bucket.right_sibling(),
                Direction::Backward => bucket.left_sibling(),
            };
            let Some(next) = next else {
                self.exhausted = true;
                break;
            };

            hops += 1;
            if hops > max_hops {
                tracing::warn!(index = %tree.name, page = page_index, "Leaf chain loops");
                return Err(Error::Corrupted { reason: "leaf chain loops".to_string() });
            }
            page_index = next;
            item = EDGE;
        }

        tracing::trace!(
            index = %tree.name,
            entries = self.batch.len(),
            exhausted = self.exhausted,
            "Cursor batch filled"
        );
        Ok(())
    }
}

impl Iterator for EntryCursor<'_> {
    type Item = (Vec<u8>, RecordId);

    /// Yields the next entry. A read failure is logged and ends the sequence;
    /// use [`EntryCursor::next_entry`] to observe it.
    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(index = %self.tree.name, error = %err, "Cursor stopped on error");
                None
            },
        }
    }
}

impl std::fmt::Debug for EntryCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryCursor")
            .field("index", &self.tree.name)
            .field("direction", &self.direction)
            .field("buffered", &self.batch.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let inclusive = KeyBound::new(b"m", true);
        let exclusive = KeyBound::new(b"m", false);
        let m = encode_key(b"m");
        let a = encode_key(b"a");
        let z = encode_key(b"z");

        assert!(inclusive.admits_below(&m));
        assert!(!exclusive.admits_below(&m));
        assert!(exclusive.admits_below(&a));
        assert!(!exclusive.admits_below(&z));

        assert!(inclusive.admits_above(&m));
        assert!(!exclusive.admits_above(&m));
        assert!(exclusive.admits_above(&z));
        assert!(!exclusive.admits_above(&a));
    }

    #[test]
    fn test_direction_from_flag() {
        assert_eq!(Direction::from_ascending(true), Direction::Forward);
        assert_eq!(Direction::from_ascending(false), Direction::Backward);
        assert_eq!(Direction::Forward.step(), 1);
        assert_eq!(Direction::Backward.step(), -1);
    }
}
