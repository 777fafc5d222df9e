//! Tree metadata page (page 0).
//!
//! ```text
//! Offset  Size   Field
//! ------  ----   -----
//! 0       16     Page header
//! 16      8      Tree size (number of leaf entries)
//! 24      4      Pages size (highest page index in use)
//! 28      4      Free-list head (-1 = empty)
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    error::{Error, PageType, Result},
    page::{PAGE_HEADER_SIZE, Page},
    types::{PageIndex, ROOT_INDEX, decode_link, encode_link},
};

const TREE_SIZE_OFFSET: usize = PAGE_HEADER_SIZE;
const PAGES_SIZE_OFFSET: usize = PAGE_HEADER_SIZE + 8;
const FREE_LIST_HEAD_OFFSET: usize = PAGE_HEADER_SIZE + 12;

/// Decoded contents of the entry point page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    /// Number of entries stored in the tree.
    pub tree_size: i64,
    /// Highest page index in use; pages above it are spare tail pages.
    pub pages_size: PageIndex,
    /// First page of the free list.
    pub free_list_head: Option<PageIndex>,
}

impl EntryPoint {
    /// Metadata of a freshly created tree: an empty root at page 1.
    pub fn new() -> Self {
        Self { tree_size: 0, pages_size: ROOT_INDEX, free_list_head: None }
    }

    /// Decodes the entry point page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageTypeMismatch`] if `page` is not an entry point.
    /// Returns [`Error::Corrupted`] if the counters are negative.
    pub fn read(page: &Page) -> Result<Self> {
        let found = page.page_type()?;
        if found != PageType::EntryPoint {
            return Err(Error::PageTypeMismatch { expected: PageType::EntryPoint, found });
        }

        let tree_size = LittleEndian::read_i64(&page.data[TREE_SIZE_OFFSET..]);
        let pages_size = LittleEndian::read_i32(&page.data[PAGES_SIZE_OFFSET..]);
        if tree_size < 0 || pages_size < ROOT_INDEX as i32 {
            return Err(Error::Corrupted {
                reason: format!("Invalid entry point: size {tree_size}, pages {pages_size}"),
            });
        }

        Ok(Self {
            tree_size,
            pages_size: pages_size as PageIndex,
            free_list_head: decode_link(LittleEndian::read_i32(
                &page.data[FREE_LIST_HEAD_OFFSET..],
            )),
        })
    }

    /// Encodes into `page`, formatting it as the entry point.
    pub fn write(&self, page: &mut Page) {
        if page.page_type().ok() != Some(PageType::EntryPoint) {
            page.reset(PageType::EntryPoint);
        }
        LittleEndian::write_i64(&mut page.data[TREE_SIZE_OFFSET..], self.tree_size);
        LittleEndian::write_i32(&mut page.data[PAGES_SIZE_OFFSET..], self.pages_size as i32);
        LittleEndian::write_i32(
            &mut page.data[FREE_LIST_HEAD_OFFSET..],
            encode_link(self.free_list_head),
        );
        page.dirty = true;
    }
}

impl Default for EntryPoint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MIN_PAGE_SIZE;

    #[test]
    fn test_entry_point_round_trip() {
        let mut page = Page::new(0, MIN_PAGE_SIZE, PageType::Free);
        let entry_point = EntryPoint { tree_size: 42, pages_size: 9, free_list_head: Some(4) };
        entry_point.write(&mut page);

        assert_eq!(page.page_type().unwrap(), PageType::EntryPoint);
        assert_eq!(EntryPoint::read(&page).unwrap(), entry_point);
    }

    #[test]
    fn test_fresh_entry_point() {
        let mut page = Page::new(0, MIN_PAGE_SIZE, PageType::Free);
        EntryPoint::new().write(&mut page);

        let read = EntryPoint::read(&page).unwrap();
        assert_eq!(read.tree_size, 0);
        assert_eq!(read.pages_size, ROOT_INDEX);
        assert_eq!(read.free_list_head, None);
    }

    #[test]
    fn test_rejects_other_pages() {
        let page = Page::new(0, MIN_PAGE_SIZE, PageType::LeafBucket);
        assert!(matches!(EntryPoint::read(&page), Err(Error::PageTypeMismatch { .. })));
    }
}
