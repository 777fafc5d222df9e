//! File-based storage backend using position-based I/O (`pread`/`pwrite`).
//!
//! On Unix, reads go through [`std::os::unix::fs::FileExt`]: `read_exact_at()`
//! takes `&self` and never moves the file cursor, so concurrent cursor refills
//! read pages without synchronization.
//!
//! Writes are serialized by a unit `Mutex<()>` sentinel. Only a committing
//! atomic operation writes pages, and commits already run one at a time, so
//! the guard only protects file growth from interleaving.

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

use super::{FileHeader, HEADER_SIZE, StorageBackend, validate_page_size};
use crate::error::{Error, PageId, Result};

/// One index file on disk: a [`FileHeader`] followed by fixed-size pages.
///
/// Page data is durable only after [`sync`](StorageBackend::sync).
pub struct FileBackend {
    file: File,
    /// Serializes writes and file growth.
    write_lock: Mutex<()>,
    page_size: usize,
    path: PathBuf,
}

impl FileBackend {
    /// Opens an existing index file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened or the header cannot be read.
    /// Returns [`Error::InvalidMagic`] if the file is not an index file.
    /// Returns [`Error::Corrupted`] if the header is malformed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header_buf = vec![0u8; HEADER_SIZE];
        read_exact_at_offset(&file, &mut header_buf, 0)?;
        let header = FileHeader::from_bytes(&header_buf)?;

        Ok(Self { file, write_lock: Mutex::new(()), page_size: header.page_size(), path })
    }

    /// Creates a new index file, failing if one already exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file exists or cannot be written.
    /// Returns [`Error::InvalidConfig`] if `page_size` is not a supported power of two.
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        validate_page_size(page_size)?;

        let path = path.as_ref().to_path_buf();
        let mut file =
            OpenOptions::new().read(true).write(true).create_new(true).open(&path)?;

        let header = FileHeader::new(page_size.trailing_zeros() as u8);
        file.write_all(&header.to_bytes())?;
        file.sync_all()?;

        Ok(Self { file, write_lock: Mutex::new(()), page_size, path })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl StorageBackend for FileBackend {
    fn read_header(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; HEADER_SIZE];
        read_exact_at_offset(&self.file, &mut buf, 0)?;
        Ok(buf)
    }

    fn write_header(&self, header: &[u8]) -> Result<()> {
        if header.len() != HEADER_SIZE {
            return Err(Error::Corrupted {
                reason: format!("Invalid header size: {} (expected {})", header.len(), HEADER_SIZE),
            });
        }

        let _guard = self.write_lock.lock();
        write_all_at_offset(&self.file, header, 0)
    }

    fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        let offset = self.page_offset(page_id);
        let file_len = self.file.metadata()?.len();
        if offset + self.page_size as u64 > file_len {
            return Err(Error::PageNotFound { page_id });
        }

        let mut buf = vec![0u8; self.page_size];
        read_exact_at_offset(&self.file, &mut buf, offset)?;
        Ok(buf)
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

        let offset = self.page_offset(page_id);
        let _guard = self.write_lock.lock();

        let required_len = offset + self.page_size as u64;
        if self.file.metadata()?.len() < required_len {
            self.file.set_len(required_len)?;
        }

        write_all_at_offset(&self.file, data, offset)
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn file_size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

// ---------------------------------------------------------------------------
// Platform-specific position-based I/O helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    file.read_exact_at(buf, offset)?;
    Ok(())
}

/// `seek_read` moves the file cursor, so Windows readers are not lock-free.
#[cfg(windows)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "unexpected end of file during seek_read",
            )
            .into());
        }
        pos += n;
    }
    Ok(())
}

#[cfg(unix)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    file.write_all_at(data, offset)?;
    Ok(())
}

#[cfg(windows)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        let n = file.seek_write(&data[pos..], offset + pos as u64)?;
        pos += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::backend::{DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE};

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_create_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("people.name.sbt");

        {
            let backend = FileBackend::create(&path, MIN_PAGE_SIZE).unwrap();
            let header = FileHeader::from_bytes(&backend.read_header().unwrap()).unwrap();
            assert_eq!(header.page_size(), MIN_PAGE_SIZE);
            assert_eq!(backend.file_size().unwrap(), HEADER_SIZE as u64);
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.page_size(), MIN_PAGE_SIZE);
        assert_eq!(backend.path(), path.as_path());
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.sbt");
        FileBackend::create(&path, DEFAULT_PAGE_SIZE).unwrap();

        assert!(matches!(FileBackend::create(&path, DEFAULT_PAGE_SIZE), Err(Error::Io { .. })));
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_create_rejects_bad_page_size() {
        let dir = tempdir().unwrap();
        let result = FileBackend::create(dir.path().join("idx.sbt"), 1000);
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign.bin");
        std::fs::write(&path, vec![0x55u8; HEADER_SIZE]).unwrap();

        assert!(matches!(FileBackend::open(&path), Err(Error::InvalidMagic)));
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_page_read_write() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::create(dir.path().join("idx.sbt"), DEFAULT_PAGE_SIZE).unwrap();

        let mut data = vec![0u8; DEFAULT_PAGE_SIZE];
        data[0] = 0xDE;
        data[DEFAULT_PAGE_SIZE - 1] = 0xBE;

        backend.write_page(2, &data).unwrap();
        backend.sync().unwrap();

        let read_data = backend.read_page(2).unwrap();
        assert_eq!(read_data[0], 0xDE);
        assert_eq!(read_data[DEFAULT_PAGE_SIZE - 1], 0xBE);
        assert_eq!(backend.page_count().unwrap(), 3);

        // Page 1 was materialized by growth and reads back as zeros.
        assert!(backend.read_page(1).unwrap().iter().all(|&b| b == 0));
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_read_beyond_file_is_not_found() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::create(dir.path().join("idx.sbt"), DEFAULT_PAGE_SIZE).unwrap();

        assert!(matches!(backend.read_page(999), Err(Error::PageNotFound { page_id: 999 })));
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_write_rejects_wrong_size() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::create(dir.path().join("idx.sbt"), DEFAULT_PAGE_SIZE).unwrap();

        assert!(backend.write_page(0, &[0u8; 10]).is_err());
        assert!(backend.write_header(&[0u8; 10]).is_err());
    }

    /// One thread rewrites page 5 while others read page 1.
    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_concurrent_read_write_different_pages() {
        let dir = tempdir().unwrap();
        let backend =
            Arc::new(FileBackend::create(dir.path().join("idx.sbt"), DEFAULT_PAGE_SIZE).unwrap());

        let mut page1_data = vec![0xAAu8; DEFAULT_PAGE_SIZE];
        page1_data[0] = 0x11;
        backend.write_page(1, &page1_data).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0u8..50 {
                    let mut data = vec![i; DEFAULT_PAGE_SIZE];
                    data[0] = 0xFF;
                    backend.write_page(5, &data).unwrap();
                }
            });
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..50 {
                        let data = backend.read_page(1).unwrap();
                        assert_eq!(data[0], 0x11, "page 1 changed during write to page 5");
                    }
                });
            }
        });

        let final_page5 = backend.read_page(5).unwrap();
        assert_eq!(final_page5[0], 0xFF);
        assert_eq!(final_page5[1], 49);
    }
}
