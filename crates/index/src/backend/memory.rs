//! In-memory storage backend.
//!
//! Used for memory-located stores and throughout the unit tests. Everything
//! is lost when the backend is dropped.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{DEFAULT_PAGE_SIZE, FileHeader, HEADER_SIZE, StorageBackend, validate_page_size};
use crate::error::{Error, PageId, Result};

/// In-memory storage backend.
pub struct InMemoryBackend {
    header: RwLock<Vec<u8>>,
    pages: RwLock<HashMap<PageId, Vec<u8>>>,
    page_size: usize,
    /// Simulated file size.
    file_size: RwLock<u64>,
}

impl InMemoryBackend {
    /// Creates a backend with the default page size.
    pub fn new() -> Self {
        Self::build(DEFAULT_PAGE_SIZE)
    }

    /// Creates a backend with the given page size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `page_size` is not a supported power of two.
    pub fn with_page_size(page_size: usize) -> Result<Self> {
        validate_page_size(page_size)?;
        Ok(Self::build(page_size))
    }

    fn build(page_size: usize) -> Self {
        let header = FileHeader::new(page_size.trailing_zeros() as u8);
        Self {
            header: RwLock::new(header.to_bytes().to_vec()),
            pages: RwLock::new(HashMap::new()),
            page_size,
            file_size: RwLock::new(HEADER_SIZE as u64),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_header(&self) -> Result<Vec<u8>> {
        Ok(self.header.read().clone())
    }

    fn write_header(&self, header: &[u8]) -> Result<()> {
        if header.len() != HEADER_SIZE {
            return Err(Error::Corrupted {
                reason: format!("Invalid header size: {} (expected {})", header.len(), HEADER_SIZE),
            });
        }

        *self.header.write() = header.to_vec();
        Ok(())
    }

    fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        if self.page_offset(page_id) + self.page_size as u64 > *self.file_size.read() {
            return Err(Error::PageNotFound { page_id });
        }
        let pages = self.pages.read();
        match pages.get(&page_id) {
            Some(data) => Ok(data.clone()),
            None => Ok(vec![0u8; self.page_size]),
        }
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size {
            return Err(Error::Corrupted {
                reason: format!(
                    "Invalid page data size: {} (expected {})",
                    data.len(),
                    self.page_size
                ),
            });
        }

        self.pages.write().insert(page_id, data.to_vec());

        let required_size = self.page_offset(page_id) + self.page_size as u64;
        let mut file_size = self.file_size.write();
        if *file_size < required_size {
            *file_size = required_size;
        }

        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn file_size(&self) -> Result<u64> {
        Ok(*self.file_size.read())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MIN_PAGE_SIZE;

    #[test]
    fn test_in_memory_basic() {
        let backend = InMemoryBackend::new();

        let mut data = vec![0u8; DEFAULT_PAGE_SIZE];
        data[0] = 0x42;
        backend.write_page(0, &data).unwrap();

        assert_eq!(backend.read_page(0).unwrap()[0], 0x42);
        assert!(matches!(backend.read_page(999), Err(Error::PageNotFound { .. })));
    }

    #[test]
    fn test_in_memory_header() {
        let backend = InMemoryBackend::with_page_size(MIN_PAGE_SIZE).unwrap();

        let parsed = FileHeader::from_bytes(&backend.read_header().unwrap()).unwrap();
        assert_eq!(parsed.page_size(), MIN_PAGE_SIZE);
        assert!(InMemoryBackend::with_page_size(100).is_err());
    }

    #[test]
    fn test_in_memory_file_size() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.file_size().unwrap(), HEADER_SIZE as u64);
        assert_eq!(backend.page_count().unwrap(), 0);

        backend.write_page(0, &vec![0u8; DEFAULT_PAGE_SIZE]).unwrap();
        assert_eq!(backend.file_size().unwrap(), HEADER_SIZE as u64 + DEFAULT_PAGE_SIZE as u64);

        // Writing past the end grows the file; the gap reads as zeros.
        backend.write_page(10, &vec![0u8; DEFAULT_PAGE_SIZE]).unwrap();
        assert_eq!(backend.page_count().unwrap(), 11);
        assert!(backend.read_page(5).unwrap().iter().all(|&b| b == 0));
    }
}
