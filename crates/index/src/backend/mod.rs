//! Storage backend abstraction for index files.
//!
//! The backend trait abstracts the underlying storage mechanism,
//! allowing both file-based (production) and in-memory (testing) implementations.
//! Every index file is an independent backend: a fixed-size header followed by
//! an array of equally sized pages addressed by logical page index.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::InMemoryBackend;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, PageId, Result};

/// Default page size power: 12 (meaning 2^12 = 4KB).
pub const DEFAULT_PAGE_SIZE_POWER: u8 = 12;
/// Default page size: 4KB (4096 bytes).
pub const DEFAULT_PAGE_SIZE: usize = 1 << DEFAULT_PAGE_SIZE_POWER;
/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 512;
/// Largest supported page size.
pub const MAX_PAGE_SIZE: usize = 65536;

/// File header size in bytes.
pub const HEADER_SIZE: usize = 64;

/// Magic number for index files.
pub const MAGIC: &[u8; 8] = b"INFIDXBT";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Storage backend trait for abstracting file I/O.
pub trait StorageBackend: Send + Sync {
    /// Reads the file header ([`HEADER_SIZE`] bytes).
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the read fails.
    fn read_header(&self) -> Result<Vec<u8>>;

    /// Writes the file header.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the write fails.
    /// Returns `Error::Corrupted` if the header size is incorrect.
    fn write_header(&self, header: &[u8]) -> Result<()>;

    /// Reads a page by its ID.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the read fails.
    fn read_page(&self, page_id: PageId) -> Result<Vec<u8>>;

    /// Writes a page at the given ID, growing the file when needed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the write fails.
    /// Returns `Error::Corrupted` if the data size does not match the page size.
    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Flushes all writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the sync fails.
    fn sync(&self) -> Result<()>;

    /// Returns the current file size in bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the metadata query fails.
    fn file_size(&self) -> Result<u64>;

    /// Returns the page size for this backend.
    fn page_size(&self) -> usize;

    /// Calculates the byte offset for a page ID.
    fn page_offset(&self, page_id: PageId) -> u64 {
        HEADER_SIZE as u64 + (page_id * self.page_size() as u64)
    }

    /// Number of whole pages stored after the header.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the metadata query fails.
    fn page_count(&self) -> Result<u64> {
        let size = self.file_size()?;
        Ok(size.saturating_sub(HEADER_SIZE as u64) / self.page_size() as u64)
    }
}

/// Validates a page size: power of two in `MIN_PAGE_SIZE..=MAX_PAGE_SIZE`.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] for any other value.
pub fn validate_page_size(page_size: usize) -> Result<()> {
    if !page_size.is_power_of_two() || page_size < MIN_PAGE_SIZE || page_size > MAX_PAGE_SIZE {
        return Err(Error::InvalidConfig { reason: format!("Invalid page size: {page_size}") });
    }
    Ok(())
}

/// Header stored at the start of every index file.
///
/// # Layout (64 bytes total)
///
/// ```text
/// Offset  Size   Field
/// ------  ----   -----
/// 0       8      Magic "INFIDXBT"
/// 8       2      Format version
/// 10      1      Page size as power of two
/// 11      5      Reserved
/// 16      8      XXH3-64 of bytes 0..16
/// 24      40     Reserved
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version.
    pub version: u16,
    /// Page size as power of 2 (default: 12 = 4KB).
    pub page_size_power: u8,
}

impl FileHeader {
    /// Total header size on disk.
    pub const SIZE: usize = HEADER_SIZE;

    const CHECKSUMMED_SIZE: usize = 16;

    /// Creates a header for the given page size power.
    pub fn new(page_size_power: u8) -> Self {
        Self { version: FORMAT_VERSION, page_size_power }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(MAGIC);
        LittleEndian::write_u16(&mut buf[8..10], self.version);
        buf[10] = self.page_size_power;
        let checksum = xxhash_rust::xxh3::xxh3_64(&buf[0..Self::CHECKSUMMED_SIZE]);
        LittleEndian::write_u64(&mut buf[16..24], checksum);
        buf
    }

    /// Deserializes from bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corrupted` if the buffer is too short or the checksum fails.
    /// Returns `Error::InvalidMagic` if the magic number does not match.
    /// Returns `Error::UnsupportedVersion` if the format version is unsupported.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::Corrupted { reason: "File header too short".to_string() });
        }

        if &buf[0..8] != MAGIC {
            return Err(Error::InvalidMagic);
        }

        let checksum = LittleEndian::read_u64(&buf[16..24]);
        if checksum != xxhash_rust::xxh3::xxh3_64(&buf[0..Self::CHECKSUMMED_SIZE]) {
            return Err(Error::Corrupted { reason: "File header checksum mismatch".to_string() });
        }

        let version = LittleEndian::read_u16(&buf[8..10]);
        if version > FORMAT_VERSION {
            return Err(Error::UnsupportedVersion { version });
        }

        let header = Self { version, page_size_power: buf[10] };
        validate_page_size(header.page_size())
            .map_err(|_| Error::Corrupted { reason: "File header page size".to_string() })?;
        Ok(header)
    }

    /// Returns the page size in bytes.
    pub fn page_size(&self) -> usize {
        1usize.checked_shl(u32::from(self.page_size_power)).unwrap_or(0)
    }
}
