//! Page management for the index engine.
//!
//! This module handles:
//! - Page layout and header structure
//! - Page caching (clock eviction)
//! - Checksum computation and verification
//! - Version stamps (LSN) used by cursors to detect rewritten pages

mod cache;

pub use cache::{CacheStats, PageCache};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, PageId, PageType, Result};

/// Page header size in bytes.
pub const PAGE_HEADER_SIZE: usize = 16;

/// Page header structure (16 bytes).
///
/// ```text
/// Offset  Size   Field
/// ------  ----   -----
/// 0       1      Page type (PageType enum)
/// 1       1      Flags (reserved)
/// 2       2      Item count (bucket entries)
/// 4       4      Checksum (XXH3-64 of page content after header, truncated)
/// 8       8      LSN of the atomic operation that last wrote this page
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    /// Page type.
    pub page_type: PageType,
    /// Flags (reserved for future use).
    pub flags: u8,
    /// Number of items in this page.
    pub item_count: u16,
    /// XXH3-64 checksum (truncated to 32 bits) of page content (bytes after header).
    pub checksum: u32,
    /// Version stamp of the last committed write.
    pub lsn: u64,
}

impl PageHeader {
    /// Creates a new page header.
    pub fn new(page_type: PageType) -> Self {
        Self { page_type, flags: 0, item_count: 0, checksum: 0, lsn: 0 }
    }

    /// Serializes header to bytes.
    pub fn to_bytes(&self) -> [u8; PAGE_HEADER_SIZE] {
        let mut buf = [0u8; PAGE_HEADER_SIZE];
        buf[0] = self.page_type as u8;
        buf[1] = self.flags;
        LittleEndian::write_u16(&mut buf[2..4], self.item_count);
        LittleEndian::write_u32(&mut buf[4..8], self.checksum);
        LittleEndian::write_u64(&mut buf[8..16], self.lsn);
        buf
    }

    /// Deserializes header from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the buffer is shorter than [`PAGE_HEADER_SIZE`]
    /// or the page type byte is invalid.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < PAGE_HEADER_SIZE {
            return Err(Error::Corrupted { reason: "Page header too short".to_string() });
        }

        Ok(Self {
            page_type: PageType::try_from(buf[0])?,
            flags: buf[1],
            item_count: LittleEndian::read_u16(&buf[2..4]),
            checksum: LittleEndian::read_u32(&buf[4..8]),
            lsn: LittleEndian::read_u64(&buf[8..16]),
        })
    }
}

/// A page of data with header and content.
#[derive(Clone)]
pub struct Page {
    /// Page ID (position in its file).
    pub id: PageId,
    /// Raw page data including header.
    pub data: Vec<u8>,
    /// Whether this page has been modified since it was loaded.
    pub dirty: bool,
}

impl Page {
    /// Creates a new empty page.
    pub fn new(id: PageId, page_size: usize, page_type: PageType) -> Self {
        let mut data = vec![0u8; page_size];
        let header = PageHeader::new(page_type);
        data[..PAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());

        Self { id, data, dirty: true }
    }

    /// Creates a page from raw bytes read from storage.
    pub fn from_bytes(id: PageId, data: Vec<u8>) -> Self {
        Self { id, data, dirty: false }
    }

    /// Returns the page header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header bytes are corrupted or the page type is invalid.
    pub fn header(&self) -> Result<PageHeader> {
        PageHeader::from_bytes(&self.data)
    }

    /// Returns the page type.
    ///
    /// # Errors
    ///
    /// Returns an error if the page type byte is invalid.
    pub fn page_type(&self) -> Result<PageType> {
        PageType::try_from(self.data[0])
    }

    /// Changes the page type.
    pub fn set_page_type(&mut self, page_type: PageType) {
        self.data[0] = page_type as u8;
        self.dirty = true;
    }

    /// Returns the item count.
    pub fn item_count(&self) -> u16 {
        LittleEndian::read_u16(&self.data[2..4])
    }

    /// Sets the item count.
    pub fn set_item_count(&mut self, count: u16) {
        LittleEndian::write_u16(&mut self.data[2..4], count);
        self.dirty = true;
    }

    /// Returns the version stamp of the last committed write.
    pub fn lsn(&self) -> u64 {
        LittleEndian::read_u64(&self.data[8..16])
    }

    /// Stamps the page with the LSN of the committing operation.
    pub fn set_lsn(&mut self, lsn: u64) {
        LittleEndian::write_u64(&mut self.data[8..16], lsn);
    }

    /// Returns the content portion of the page (after header).
    pub fn content(&self) -> &[u8] {
        &self.data[PAGE_HEADER_SIZE..]
    }

    /// Returns mutable content portion.
    pub fn content_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.data[PAGE_HEADER_SIZE..]
    }

    /// Zeroes the content and resets the header to `page_type`, keeping the LSN.
    pub fn reset(&mut self, page_type: PageType) {
        let lsn = self.lsn();
        self.data.fill(0);
        self.data[..PAGE_HEADER_SIZE].copy_from_slice(&PageHeader::new(page_type).to_bytes());
        self.set_lsn(lsn);
        self.dirty = true;
    }

    /// Computes and updates the checksum using XXH3-64 (truncated to 32 bits).
    pub fn update_checksum(&mut self) {
        let hash64 = xxhash_rust::xxh3::xxh3_64(&self.data[PAGE_HEADER_SIZE..]);
        let checksum = hash64 as u32; // Truncate to 32 bits
        LittleEndian::write_u32(&mut self.data[4..8], checksum);
    }

    /// Verifies the page checksum using XXH3-64 (truncated to 32 bits).
    pub fn verify_checksum(&self) -> bool {
        let stored_checksum = LittleEndian::read_u32(&self.data[4..8]);
        let hash64 = xxhash_rust::xxh3::xxh3_64(&self.data[PAGE_HEADER_SIZE..]);
        stored_checksum == hash64 as u32
    }

    /// Returns the page size.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns the usable content size (total size minus header).
    pub fn content_size(&self) -> usize {
        self.data.len() - PAGE_HEADER_SIZE
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("size", &self.data.len())
            .field("dirty", &self.dirty)
            .field("header", &self.header())
            .finish()
    }
}
