//! Bucket page layout.
//!
//! A bucket is one tree node stored in one page. Leaf buckets map key
//! suffixes to record ids; branch buckets hold separator suffixes with a left
//! and right child each, consecutive entries sharing a child.
//!
//! ```text
//! Offset           Size   Field
//! ------           ----   -----
//! 0                16     Page header (type, item count, checksum, LSN)
//! 16               4      Free pointer: start of the entry region
//! 20               4      Left sibling (leaf only, -1 = none)
//! 24               4      Right sibling (leaf only, -1 = none)
//! 28               4      Next free-list page (free pages only, -1 = none)
//! 32               2      Prefix length
//! 34               P      Prefix bytes
//! 34+P             2*N    Entry offsets, in key order
//! ...                     Free space
//! free pointer..end       Entries, growing down from the page end
//!
//! Leaf entry:   [suffix len u16][suffix][cluster id i16][cluster position i64]
//! Branch entry: [left i32][right i32][suffix len u16][suffix]
//! ```
//!
//! Removing an entry compacts the entry region, so free space is always the
//! single gap between the offset array and the free pointer.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use super::boundary::restore_key;
use crate::{
    error::{Error, PageType, Result},
    page::{PAGE_HEADER_SIZE, Page},
    types::{NO_PAGE, PageIndex, RecordId, decode_link, encode_link},
};

const FREE_POINTER_OFFSET: usize = PAGE_HEADER_SIZE;
const LEFT_SIBLING_OFFSET: usize = PAGE_HEADER_SIZE + 4;
const RIGHT_SIBLING_OFFSET: usize = PAGE_HEADER_SIZE + 8;
const NEXT_FREE_LIST_OFFSET: usize = PAGE_HEADER_SIZE + 12;
const PREFIX_LEN_OFFSET: usize = PAGE_HEADER_SIZE + 16;
const PREFIX_OFFSET: usize = PAGE_HEADER_SIZE + BUCKET_HEADER_SIZE;

/// Bucket header size, excluding the prefix bytes.
pub const BUCKET_HEADER_SIZE: usize = 18;

/// Bytes a leaf entry needs besides its suffix, offset slot included.
pub const LEAF_ENTRY_OVERHEAD: usize = 2 + RecordId::SIZE + 2;

/// Bytes a branch entry needs besides its suffix, offset slot included.
pub const BRANCH_ENTRY_OVERHEAD: usize = 4 + 4 + 2 + 2;

/// Bytes available for the prefix and the entries of one bucket.
pub fn capacity(page_size: usize) -> usize {
    page_size.saturating_sub(PAGE_HEADER_SIZE + BUCKET_HEADER_SIZE)
}

/// Largest encoded key a page size supports.
///
/// A bucket must fit four maximal entries next to a maximal prefix.
pub fn max_key_size_for(page_size: usize) -> usize {
    capacity(page_size).saturating_sub(4 * LEAF_ENTRY_OVERHEAD) / 5
}

/// Space one entry occupies, offset slot included.
pub fn entry_size(is_leaf: bool, suffix_len: usize) -> usize {
    suffix_len + if is_leaf { LEAF_ENTRY_OVERHEAD } else { BRANCH_ENTRY_OVERHEAD }
}

/// Payload of a bucket entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryValue {
    /// Leaf payload.
    Record(RecordId),
    /// Branch payload.
    Children {
        /// Subtree with keys below the separator.
        left: PageIndex,
        /// Subtree with keys at or above the separator.
        right: PageIndex,
    },
}

impl EntryValue {
    fn is_leaf(&self) -> bool {
        matches!(self, EntryValue::Record(_))
    }
}

/// A bucket entry with its full (prefix-restored) key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketEntry {
    /// Full stored key.
    pub key: Vec<u8>,
    /// Record id or child pointers.
    pub value: EntryValue,
}

impl BucketEntry {
    /// Space the entry takes in a bucket whose prefix is `prefix_len` bytes long.
    pub fn size_under(&self, prefix_len: usize) -> usize {
        entry_size(self.value.is_leaf(), self.key.len().saturating_sub(prefix_len))
    }
}

/// Returns true if `entries` fit one bucket stored under `prefix`.
pub fn fits(page_size: usize, entry_limit: usize, prefix: &[u8], entries: &[BucketEntry]) -> bool {
    if entries.len() > entry_limit {
        return false;
    }
    let used: usize = entries.iter().map(|entry| entry.size_under(prefix.len())).sum();
    prefix.len() + used <= capacity(page_size)
}

/// Read-only view of a bucket page.
#[derive(Clone, Copy)]
pub struct BucketRef<'a> {
    page: &'a Page,
}

impl<'a> BucketRef<'a> {
    /// Wraps a leaf or branch page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageTypeMismatch`] for any other page type.
    pub fn from_page(page: &'a Page) -> Result<Self> {
        match page.page_type()? {
            PageType::LeafBucket | PageType::BranchBucket => Ok(Self { page }),
            found => Err(Error::PageTypeMismatch { expected: PageType::LeafBucket, found }),
        }
    }

    /// Whether this is a leaf bucket.
    pub fn is_leaf(&self) -> bool {
        self.page.data[0] == PageType::LeafBucket as u8
    }

    /// Number of entries.
    pub fn size(&self) -> usize {
        usize::from(self.page.item_count())
    }

    /// Whether the bucket has no entries.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Version stamp of the page.
    pub fn lsn(&self) -> u64 {
        self.page.lsn()
    }

    /// Prefix omitted from every stored suffix.
    pub fn prefix(&self) -> &'a [u8] {
        let len = usize::from(LittleEndian::read_u16(
            &self.page.data[PREFIX_LEN_OFFSET..PREFIX_LEN_OFFSET + 2],
        ));
        &self.page.data[PREFIX_OFFSET..PREFIX_OFFSET + len]
    }

    /// Left neighbour in the leaf chain.
    pub fn left_sibling(&self) -> Option<PageIndex> {
        decode_link(LittleEndian::read_i32(&self.page.data[LEFT_SIBLING_OFFSET..]))
    }

    /// Right neighbour in the leaf chain.
    pub fn right_sibling(&self) -> Option<PageIndex> {
        decode_link(LittleEndian::read_i32(&self.page.data[RIGHT_SIBLING_OFFSET..]))
    }

    fn free_pointer(&self) -> usize {
        LittleEndian::read_u32(&self.page.data[FREE_POINTER_OFFSET..]) as usize
    }

    fn positions_offset(&self) -> usize {
        PREFIX_OFFSET + self.prefix().len()
    }

    fn entry_offset(&self, index: usize) -> usize {
        let slot = self.positions_offset() + index * 2;
        usize::from(LittleEndian::read_u16(&self.page.data[slot..slot + 2]))
    }

    /// Stored suffix of entry `index`.
    pub fn key(&self, index: usize) -> &'a [u8] {
        let mut offset = self.entry_offset(index);
        if !self.is_leaf() {
            offset += 8;
        }
        let len = usize::from(LittleEndian::read_u16(&self.page.data[offset..offset + 2]));
        &self.page.data[offset + 2..offset + 2 + len]
    }

    /// Full key of entry `index`.
    pub fn full_key(&self, index: usize) -> Vec<u8> {
        restore_key(self.prefix(), self.key(index))
    }

    /// Record id of leaf entry `index`.
    pub fn value(&self, index: usize) -> RecordId {
        let offset = self.entry_offset(index);
        let len = usize::from(LittleEndian::read_u16(&self.page.data[offset..offset + 2]));
        RecordId::read_from(&self.page.data[offset + 2 + len..])
    }

    /// Left child of branch entry `index`.
    pub fn left(&self, index: usize) -> PageIndex {
        let offset = self.entry_offset(index);
        LittleEndian::read_i32(&self.page.data[offset..offset + 4]) as PageIndex
    }

    /// Right child of branch entry `index`.
    pub fn right(&self, index: usize) -> PageIndex {
        let offset = self.entry_offset(index) + 4;
        LittleEndian::read_i32(&self.page.data[offset..offset + 4]) as PageIndex
    }

    /// Payload of entry `index`.
    pub fn entry_value(&self, index: usize) -> EntryValue {
        if self.is_leaf() {
            EntryValue::Record(self.value(index))
        } else {
            EntryValue::Children { left: self.left(index), right: self.right(index) }
        }
    }

    /// Entry `index` with its full key.
    pub fn entry(&self, index: usize) -> BucketEntry {
        BucketEntry { key: self.full_key(index), value: self.entry_value(index) }
    }

    /// All entries with full keys.
    pub fn entries(&self) -> Vec<BucketEntry> {
        (0..self.size()).map(|index| self.entry(index)).collect()
    }

    /// Binary search by suffix: `Ok(index)` on a match, otherwise
    /// `Err(insertion_index)`.
    pub fn find(&self, suffix: &[u8]) -> std::result::Result<usize, usize> {
        let mut low = 0;
        let mut high = self.size();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.key(mid).cmp(suffix) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Ok(mid),
            }
        }
        Err(low)
    }

    /// Unused bytes between the offset array and the entry region.
    pub fn free_space(&self) -> usize {
        let used_front = self.positions_offset() + self.size() * 2;
        self.free_pointer().saturating_sub(used_front)
    }
}

impl std::fmt::Debug for BucketRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("page", &self.page.id)
            .field("leaf", &self.is_leaf())
            .field("size", &self.size())
            .field("prefix", &self.prefix())
            .finish()
    }
}

/// Mutable view of a bucket page.
pub struct BucketMut<'a> {
    page: &'a mut Page,
    entry_limit: usize,
}

impl<'a> BucketMut<'a> {
    /// Formats `page` as an empty bucket stored under `prefix`.
    ///
    /// The LSN survives so cursors can tell the page was rewritten.
    pub fn init(page: &'a mut Page, is_leaf: bool, prefix: &[u8]) -> Self {
        page.reset(if is_leaf { PageType::LeafBucket } else { PageType::BranchBucket });
        let page_size = page.size() as u32;
        let data = &mut page.data;
        LittleEndian::write_u32(&mut data[FREE_POINTER_OFFSET..], page_size);
        LittleEndian::write_i32(&mut data[LEFT_SIBLING_OFFSET..], NO_PAGE);
        LittleEndian::write_i32(&mut data[RIGHT_SIBLING_OFFSET..], NO_PAGE);
        LittleEndian::write_i32(&mut data[NEXT_FREE_LIST_OFFSET..], NO_PAGE);
        LittleEndian::write_u16(&mut data[PREFIX_LEN_OFFSET..], prefix.len() as u16);
        data[PREFIX_OFFSET..PREFIX_OFFSET + prefix.len()].copy_from_slice(prefix);
        Self { page, entry_limit: usize::from(u16::MAX) }
    }

    /// Wraps an existing leaf or branch page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageTypeMismatch`] for any other page type.
    pub fn from_page(page: &'a mut Page) -> Result<Self> {
        BucketRef::from_page(page)?;
        Ok(Self { page, entry_limit: usize::from(u16::MAX) })
    }

    /// Caps the number of entries the bucket accepts.
    pub fn limit_entries(mut self, limit: Option<usize>) -> Self {
        if let Some(limit) = limit {
            self.entry_limit = limit.min(usize::from(u16::MAX));
        }
        self
    }

    /// Read-only view.
    pub fn as_ref(&self) -> BucketRef<'_> {
        BucketRef { page: self.page }
    }

    /// Sets the left neighbour in the leaf chain.
    pub fn set_left_sibling(&mut self, link: Option<PageIndex>) {
        LittleEndian::write_i32(&mut self.page.data[LEFT_SIBLING_OFFSET..], encode_link(link));
        self.page.dirty = true;
    }

    /// Sets the right neighbour in the leaf chain.
    pub fn set_right_sibling(&mut self, link: Option<PageIndex>) {
        LittleEndian::write_i32(&mut self.page.data[RIGHT_SIBLING_OFFSET..], encode_link(link));
        self.page.dirty = true;
    }

    fn set_free_pointer(&mut self, free_pointer: usize) {
        LittleEndian::write_u32(&mut self.page.data[FREE_POINTER_OFFSET..], free_pointer as u32);
    }

    fn has_room_for(&self, is_leaf: bool, suffix_len: usize) -> bool {
        let bucket = self.as_ref();
        bucket.size() < self.entry_limit && bucket.free_space() >= entry_size(is_leaf, suffix_len)
    }

    /// Writes `body` into the entry region and registers it at `index`.
    fn insert_raw(&mut self, index: usize, body: &[u8]) {
        let (free_pointer, positions, size) = {
            let bucket = self.as_ref();
            (bucket.free_pointer(), bucket.positions_offset(), bucket.size())
        };
        let offset = free_pointer - body.len();
        self.page.data[offset..free_pointer].copy_from_slice(body);

        let slot = positions + index * 2;
        let end = positions + size * 2;
        self.page.data.copy_within(slot..end, slot + 2);
        LittleEndian::write_u16(&mut self.page.data[slot..slot + 2], offset as u16);

        self.set_free_pointer(offset);
        self.page.set_item_count((size + 1) as u16);
    }

    /// Inserts a leaf entry at `index`. Returns false if the bucket is full.
    pub fn add_leaf_entry(&mut self, index: usize, suffix: &[u8], value: RecordId) -> bool {
        if !self.has_room_for(true, suffix.len()) {
            return false;
        }
        let mut body = Vec::with_capacity(2 + suffix.len() + RecordId::SIZE);
        body.extend_from_slice(&(suffix.len() as u16).to_le_bytes());
        body.extend_from_slice(suffix);
        body.extend_from_slice(&value.to_bytes());
        self.insert_raw(index, &body);
        true
    }

    /// Inserts a branch entry at `index` without touching its neighbours.
    /// Returns false if the bucket is full.
    pub fn add_branch_entry(
        &mut self,
        index: usize,
        suffix: &[u8],
        left: PageIndex,
        right: PageIndex,
    ) -> bool {
        if !self.has_room_for(false, suffix.len()) {
            return false;
        }
        let mut body = Vec::with_capacity(10 + suffix.len());
        body.extend_from_slice(&encode_link(Some(left)).to_le_bytes());
        body.extend_from_slice(&encode_link(Some(right)).to_le_bytes());
        body.extend_from_slice(&(suffix.len() as u16).to_le_bytes());
        body.extend_from_slice(suffix);
        self.insert_raw(index, &body);
        true
    }

    /// Inserts a separator at `index` and points the neighbouring entries at
    /// its children. Returns false if the bucket is full.
    pub fn add_separator(
        &mut self,
        index: usize,
        suffix: &[u8],
        left: PageIndex,
        right: PageIndex,
    ) -> bool {
        if !self.add_branch_entry(index, suffix, left, right) {
            return false;
        }
        if index > 0 {
            self.set_right(index - 1, left);
        }
        if index + 1 < self.as_ref().size() {
            self.set_left(index + 1, right);
        }
        true
    }

    /// Removes entry `index` and compacts the entry region.
    pub fn remove_entry(&mut self, index: usize) {
        let (free_pointer, positions, size, offset, len) = {
            let bucket = self.as_ref();
            let offset = bucket.entry_offset(index);
            let suffix_len = bucket.key(index).len();
            let body_len = entry_size(bucket.is_leaf(), suffix_len) - 2;
            (bucket.free_pointer(), bucket.positions_offset(), bucket.size(), offset, body_len)
        };

        // Slide everything stored below the entry up over it.
        self.page.data.copy_within(free_pointer..offset, free_pointer + len);
        for i in 0..size {
            let slot = positions + i * 2;
            let current = usize::from(LittleEndian::read_u16(&self.page.data[slot..slot + 2]));
            if current < offset {
                LittleEndian::write_u16(
                    &mut self.page.data[slot..slot + 2],
                    (current + len) as u16,
                );
            }
        }

        let slot = positions + index * 2;
        self.page.data.copy_within(slot + 2..positions + size * 2, slot);
        self.set_free_pointer(free_pointer + len);
        self.page.set_item_count((size - 1) as u16);
    }

    /// Overwrites the record id of leaf entry `index`.
    pub fn update_value(&mut self, index: usize, value: RecordId) {
        let offset = self.as_ref().entry_offset(index);
        let len = usize::from(LittleEndian::read_u16(&self.page.data[offset..offset + 2]));
        value.write_to(&mut self.page.data[offset + 2 + len..]);
        self.page.dirty = true;
    }

    /// Sets the left child of branch entry `index`.
    pub fn set_left(&mut self, index: usize, child: PageIndex) {
        let offset = self.as_ref().entry_offset(index);
        LittleEndian::write_i32(&mut self.page.data[offset..], encode_link(Some(child)));
        self.page.dirty = true;
    }

    /// Sets the right child of branch entry `index`.
    pub fn set_right(&mut self, index: usize, child: PageIndex) {
        let offset = self.as_ref().entry_offset(index) + 4;
        LittleEndian::write_i32(&mut self.page.data[offset..], encode_link(Some(child)));
        self.page.dirty = true;
    }

    /// Reformats the bucket under `prefix` and stores `entries` in order.
    ///
    /// Leaf or branch type and the leaf sibling links are preserved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if a key lies outside `prefix` or the
    /// entries do not fit.
    pub fn rebuild(&mut self, prefix: &[u8], entries: &[BucketEntry]) -> Result<()> {
        let (is_leaf, left, right) = {
            let bucket = self.as_ref();
            (bucket.is_leaf(), bucket.left_sibling(), bucket.right_sibling())
        };
        let entry_limit = self.entry_limit;
        let mut fresh = BucketMut::init(&mut *self.page, is_leaf, prefix);
        fresh.entry_limit = entry_limit;
        fresh.set_left_sibling(left);
        fresh.set_right_sibling(right);

        for (index, entry) in entries.iter().enumerate() {
            let Some(suffix) = entry.key.strip_prefix(prefix) else {
                return Err(Error::Corrupted {
                    reason: format!("Key {:?} does not start with prefix {prefix:?}", entry.key),
                });
            };
            let added = match entry.value {
                EntryValue::Record(value) if is_leaf => fresh.add_leaf_entry(index, suffix, value),
                EntryValue::Children { left, right } if !is_leaf => {
                    fresh.add_branch_entry(index, suffix, left, right)
                },
                _ => {
                    return Err(Error::Corrupted {
                        reason: "Entry kind does not match bucket kind".to_string(),
                    });
                },
            };
            if !added {
                return Err(Error::Corrupted {
                    reason: format!("{} entries do not fit one bucket", entries.len()),
                });
            }
        }
        Ok(())
    }
}

/// Next page of the free list stored in a freed page.
pub fn next_free_list_page(page: &Page) -> Option<PageIndex> {
    decode_link(LittleEndian::read_i32(&page.data[NEXT_FREE_LIST_OFFSET..]))
}

/// Turns `page` into a free page pointing at `next`.
pub fn format_free_page(page: &mut Page, next: Option<PageIndex>) {
    page.reset(PageType::Free);
    LittleEndian::write_i32(&mut page.data[NEXT_FREE_LIST_OFFSET..], encode_link(next));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MIN_PAGE_SIZE;

    fn leaf_page() -> Page {
        Page::new(2, MIN_PAGE_SIZE, PageType::Free)
    }

    fn rid(n: i64) -> RecordId {
        RecordId::new(1, n)
    }

    #[test]
    fn test_key_size_bounds() {
        assert_eq!(max_key_size_for(4096), 801);
        assert_eq!(max_key_size_for(512), 84);
        assert!(5 * max_key_size_for(512) + 4 * LEAF_ENTRY_OVERHEAD <= capacity(512));
    }

    #[test]
    fn test_init_and_header_fields() {
        let mut page = leaf_page();
        page.set_lsn(11);
        let mut bucket = BucketMut::init(&mut page, true, b"\x01ab");
        bucket.set_left_sibling(Some(7));

        let view = bucket.as_ref();
        assert!(view.is_leaf());
        assert!(view.is_empty());
        assert_eq!(view.prefix(), b"\x01ab");
        assert_eq!(view.left_sibling(), Some(7));
        assert_eq!(view.right_sibling(), None);
        assert_eq!(view.lsn(), 11);
        assert_eq!(view.free_space(), capacity(MIN_PAGE_SIZE) - 3);
    }

    #[test]
    fn test_leaf_entries_stay_sorted() {
        let mut page = leaf_page();
        let mut bucket = BucketMut::init(&mut page, true, b"\x01");

        for (n, key) in [b"m", b"c", b"x", b"a"].iter().enumerate() {
            let index = bucket.as_ref().find(*key).unwrap_err();
            assert!(bucket.add_leaf_entry(index, *key, rid(n as i64)));
        }

        let view = bucket.as_ref();
        let keys: Vec<&[u8]> = (0..view.size()).map(|i| view.key(i)).collect();
        assert_eq!(keys, vec![&b"a"[..], &b"c"[..], &b"m"[..], &b"x"[..]]);
        assert_eq!(view.find(b"m"), Ok(2));
        assert_eq!(view.find(b"n"), Err(3));
        assert_eq!(view.value(2), rid(0));
        assert_eq!(view.full_key(3), b"\x01x".to_vec());
    }

    #[test]
    fn test_remove_compacts_space() {
        let mut page = leaf_page();
        let mut bucket = BucketMut::init(&mut page, true, b"");
        let empty_space = bucket.as_ref().free_space();

        assert!(bucket.add_leaf_entry(0, b"aaaa", rid(1)));
        assert!(bucket.add_leaf_entry(1, b"bb", rid(2)));
        assert!(bucket.add_leaf_entry(2, b"cccccc", rid(3)));

        bucket.remove_entry(1);
        let view = bucket.as_ref();
        assert_eq!(view.size(), 2);
        assert_eq!(view.key(0), b"aaaa");
        assert_eq!(view.key(1), b"cccccc");
        assert_eq!(view.value(1), rid(3));

        bucket.remove_entry(0);
        bucket.remove_entry(0);
        assert_eq!(bucket.as_ref().free_space(), empty_space);
    }

    #[test]
    fn test_update_value_in_place() {
        let mut page = leaf_page();
        let mut bucket = BucketMut::init(&mut page, true, b"");
        bucket.add_leaf_entry(0, b"k", rid(1));
        bucket.update_value(0, rid(99));
        assert_eq!(bucket.as_ref().value(0), rid(99));
    }

    #[test]
    fn test_branch_separator_links_neighbours() {
        let mut page = leaf_page();
        let mut bucket = BucketMut::init(&mut page, false, b"\x01");
        assert!(bucket.add_branch_entry(0, b"m", 10, 11));

        // Split of page 10 into 10 | 12 around "f".
        assert!(bucket.add_separator(0, b"f", 10, 12));
        // Split of page 11 into 11 | 13 around "t".
        assert!(bucket.add_separator(2, b"t", 11, 13));

        let view = bucket.as_ref();
        assert_eq!(view.size(), 3);
        assert_eq!((view.left(0), view.right(0)), (10, 12));
        assert_eq!((view.left(1), view.right(1)), (12, 11));
        assert_eq!((view.left(2), view.right(2)), (11, 13));
        assert_eq!(view.key(1), b"m");
    }

    #[test]
    fn test_entry_limit() {
        let mut page = leaf_page();
        let mut bucket = BucketMut::init(&mut page, true, b"").limit_entries(Some(2));
        assert!(bucket.add_leaf_entry(0, b"a", rid(1)));
        assert!(bucket.add_leaf_entry(1, b"b", rid(2)));
        assert!(!bucket.add_leaf_entry(2, b"c", rid(3)));
    }

    #[test]
    fn test_full_bucket_rejects_entry() {
        let mut page = leaf_page();
        let mut bucket = BucketMut::init(&mut page, true, b"");
        let suffix = vec![7u8; 80];
        let mut added = 0;
        while bucket.add_leaf_entry(added, &suffix, rid(added as i64)) {
            added += 1;
        }
        assert_eq!(added, capacity(MIN_PAGE_SIZE) / entry_size(true, 80));
    }

    #[test]
    fn test_rebuild_reencodes_suffixes() {
        let mut page = leaf_page();
        let mut bucket = BucketMut::init(&mut page, true, b"\x01");
        bucket.set_right_sibling(Some(5));
        bucket.add_leaf_entry(0, b"abc", rid(1));
        bucket.add_leaf_entry(1, b"abd", rid(2));

        let entries = bucket.as_ref().entries();
        bucket.rebuild(b"\x01ab", &entries).unwrap();

        let view = bucket.as_ref();
        assert_eq!(view.prefix(), b"\x01ab");
        assert_eq!(view.key(0), b"c");
        assert_eq!(view.full_key(1), b"\x01abd".to_vec());
        assert_eq!(view.right_sibling(), Some(5));

        assert!(bucket.rebuild(b"\x01x", &entries).is_err());
    }

    #[test]
    fn test_fits_matches_capacity() {
        let entry = BucketEntry { key: vec![1; 30], value: EntryValue::Record(rid(0)) };
        let per_entry = entry.size_under(0);
        let count = capacity(MIN_PAGE_SIZE) / per_entry;
        let entries = vec![entry; count];

        assert!(fits(MIN_PAGE_SIZE, usize::MAX, b"", &entries[..count]));
        assert!(!fits(MIN_PAGE_SIZE, count - 1, b"", &entries[..count]));
        let mut more = entries.clone();
        more.push(more[0].clone());
        assert!(!fits(MIN_PAGE_SIZE, usize::MAX, b"", &more));
    }

    #[test]
    fn test_free_page_format() {
        let mut page = leaf_page();
        BucketMut::init(&mut page, true, b"");
        format_free_page(&mut page, Some(9));
        assert_eq!(page.page_type().unwrap(), PageType::Free);
        assert_eq!(next_free_list_page(&page), Some(9));
        assert!(BucketRef::from_page(&page).is_err());
    }
}
