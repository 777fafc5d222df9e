//! Storage for the value of the null key.
//!
//! Null keys never enter the tree. Their value lives on page 0 of a separate
//! file `<name>.nbt`:
//!
//! ```text
//! Offset  Size   Field
//! ------  ----   -----
//! 0       16     Page header
//! 16      1      1 if a value is present
//! 17      10     Record id
//! ```

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    error::{Error, PageType, Result},
    page::{PAGE_HEADER_SIZE, Page},
    storage::{AtomicOperation, FileId, PageStore},
    types::{PageIndex, RecordId},
};

/// File extension of null bucket files.
pub const NULL_BUCKET_FILE_EXTENSION: &str = "nbt";

const PRESENT_OFFSET: usize = PAGE_HEADER_SIZE;
const VALUE_OFFSET: usize = PAGE_HEADER_SIZE + 1;
const BUCKET_PAGE: PageIndex = 0;

fn read_value(page: &Page) -> Result<Option<RecordId>> {
    let found = page.page_type()?;
    if found != PageType::NullBucket {
        return Err(Error::PageTypeMismatch { expected: PageType::NullBucket, found });
    }
    Ok((page.data[PRESENT_OFFSET] == 1).then(|| RecordId::read_from(&page.data[VALUE_OFFSET..])))
}

fn write_value(page: &mut Page, value: Option<RecordId>) {
    if page.page_type().ok() != Some(PageType::NullBucket) {
        page.reset(PageType::NullBucket);
    }
    match value {
        Some(value) => {
            page.data[PRESENT_OFFSET] = 1;
            value.write_to(&mut page.data[VALUE_OFFSET..]);
        },
        None => {
            page.data[PRESENT_OFFSET] = 0;
            page.data[VALUE_OFFSET..VALUE_OFFSET + RecordId::SIZE].fill(0);
        },
    }
    page.dirty = true;
}

/// Single-slot store for the null key of one index.
pub struct NullBucket {
    name: String,
    store: Arc<PageStore>,
    file: FileId,
    component: Arc<RwLock<()>>,
}

impl NullBucket {
    /// Creates an empty null bucket in a new file `<name>.nbt`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexExists`] if the file exists.
    /// Returns [`Error::Io`] if the file cannot be created.
    pub fn create(store: Arc<PageStore>, name: &str) -> Result<Self> {
        let file = store.add_file(&file_name(name))?;
        let bucket = Self::with_file(store, name, file);

        let created = bucket.write_locked(|op| {
            let index = bucket.store.add_page(op, file)?;
            let mut page = bucket.store.load_page_for_write(op, file, index)?;
            write_value(&mut page, None);
            bucket.store.release_page_from_write(op, file, page);
            Ok(())
        });
        if let Err(err) = created {
            bucket.store.delete_file(file)?;
            return Err(err);
        }
        Ok(bucket)
    }

    /// Opens the existing null bucket `<name>.nbt`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexNotFound`] if the file does not exist.
    /// Returns [`Error::PageTypeMismatch`] if it does not hold a null bucket.
    pub fn load(store: Arc<PageStore>, name: &str) -> Result<Self> {
        let file = store.open_file(&file_name(name))?;
        let bucket = Self::with_file(store, name, file);
        if let Err(err) = bucket.get() {
            bucket.store.close_file(file);
            return Err(err);
        }
        Ok(bucket)
    }

    fn with_file(store: Arc<PageStore>, name: &str, file: FileId) -> Self {
        let component = store.atomic_operations().component_lock(&file_name(name));
        Self { name: name.to_string(), store, file, component }
    }

    /// Value stored under the null key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexIo`] if the page cannot be read.
    pub fn get(&self) -> Result<Option<RecordId>> {
        let _component = self.component.read();
        let page = self
            .store
            .load_page_for_read(None, self.file, BUCKET_PAGE)
            .map_err(|err| err.in_index(&self.name))?;
        read_value(&page)
    }

    /// Stores `value` under the null key, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexIo`] if the page cannot be read or written.
    pub fn set(&self, value: RecordId) -> Result<Option<RecordId>> {
        self.write_locked(|op| self.replace(op, Some(value)))
    }

    /// Stores the value chosen by `decide` from the current one, if any.
    ///
    /// `decide` returns `None` to leave the bucket unchanged.
    pub(crate) fn set_with(
        &self,
        decide: impl FnOnce(Option<RecordId>) -> Result<Option<RecordId>>,
    ) -> Result<bool> {
        self.write_locked(|op| {
            let page = self.store.load_page_for_read(Some(op), self.file, BUCKET_PAGE)?;
            match decide(read_value(&page)?)? {
                Some(value) => self.replace(op, Some(value)).map(|_| true),
                None => Ok(false),
            }
        })
    }

    /// Clears the null key, returning the value it held.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexIo`] if the page cannot be read or written.
    pub fn remove(&self) -> Result<Option<RecordId>> {
        self.write_locked(|op| self.replace(op, None))
    }

    fn replace(
        &self,
        op: &mut AtomicOperation,
        value: Option<RecordId>,
    ) -> Result<Option<RecordId>> {
        let mut page = self.store.load_page_for_write(op, self.file, BUCKET_PAGE)?;
        let previous = read_value(&page)?;
        if previous != value {
            write_value(&mut page, value);
            self.store.release_page_from_write(op, self.file, page);
        }
        Ok(previous)
    }

    /// Removes the null bucket file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be removed.
    pub fn delete(self) -> Result<()> {
        let _component = self.component.write();
        self.store.delete_file(self.file).map_err(|err| err.in_index(&self.name))?;
        self.store.atomic_operations().remove_component(&file_name(&self.name));
        Ok(())
    }

    /// Closes the null bucket, keeping its file.
    pub fn close(self) {
        let _component = self.component.write();
        self.store.close_file(self.file);
    }

    fn write_locked<T>(&self, f: impl FnOnce(&mut AtomicOperation) -> Result<T>) -> Result<T> {
        let _component = self.component.write();
        self.store.calculate_in_atomic_operation(f).map_err(|err| err.in_index(&self.name))
    }
}

impl std::fmt::Debug for NullBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullBucket").field("name", &self.name).field("file", &self.file).finish()
    }
}

fn file_name(name: &str) -> String {
    format!("{name}.{NULL_BUCKET_FILE_EXTENSION}")
}
