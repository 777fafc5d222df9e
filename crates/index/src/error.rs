//! Error types for the index engine.

use std::io;

use snafu::Snafu;

/// Physical page identifier inside one storage file.
pub type PageId = u64;

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during index operations.
///
/// Two channels are kept apart: everything here is either a caller mistake
/// (the operation is aborted and the tree left untouched) or a fatal
/// condition. Expected absence, such as a missing key, is reported through
/// `Option` and never through this type.
#[derive(Debug, Snafu)]
pub enum Error {
    /// I/O error from the underlying storage backend.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The tree structure is broken and the index has to be rebuilt.
    #[snafu(display("Corrupted index: {reason}"))]
    Corrupted {
        /// Description of what was corrupted.
        reason: String,
    },

    /// Page checksum verification failed.
    #[snafu(display("Page {page_id} checksum mismatch"))]
    PageChecksumMismatch {
        /// The page whose checksum failed.
        page_id: PageId,
    },

    /// Invalid magic number in a storage file header.
    #[snafu(display("Invalid index file magic number"))]
    InvalidMagic,

    /// Unsupported storage format version.
    #[snafu(display("Unsupported format version: {version}"))]
    UnsupportedVersion {
        /// The unsupported version number.
        version: u16,
    },

    /// Page type mismatch (expected different type).
    #[snafu(display("Page type mismatch: expected {expected:?}, found {found:?}"))]
    PageTypeMismatch {
        /// The expected page type.
        expected: PageType,
        /// The actual page type found.
        found: PageType,
    },

    /// Page not found.
    #[snafu(display("Page {page_id} not found"))]
    PageNotFound {
        /// The missing page ID.
        page_id: PageId,
    },

    /// Encoded key exceeds the configured maximum key size.
    #[snafu(display("Key too large: {size} bytes (max {max})"))]
    KeyTooLarge {
        /// Actual size of the encoded key in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// Range arguments do not describe a valid range.
    #[snafu(display("Invalid range: {reason}"))]
    InvalidRange {
        /// Why the range was rejected.
        reason: String,
    },

    /// Configuration values are inconsistent.
    #[snafu(display("Invalid configuration: {reason}"))]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// No index file with this name exists.
    #[snafu(display("Index {name} not found"))]
    IndexNotFound {
        /// Index name.
        name: String,
    },

    /// An index file with this name already exists.
    #[snafu(display("Index {name} already exists"))]
    IndexExists {
        /// Index name.
        name: String,
    },

    /// Only empty indexes can be deleted.
    #[snafu(display("Index {name} is not empty ({size} entries)"))]
    NotEmpty {
        /// Index name.
        name: String,
        /// Number of entries still stored.
        size: i64,
    },

    /// A put validator rejected the new value.
    #[snafu(display("Validation failed: {reason}"))]
    ValidationFailed {
        /// Reason given by the validator.
        reason: String,
    },

    /// Storage failure while operating on a named index.
    #[snafu(display("Storage failure in index {name}: {source}"))]
    IndexIo {
        /// Index name.
        name: String,
        /// The underlying storage error.
        source: Box<Error>,
    },
}

// Provide automatic conversion from io::Error to Error::Io for ergonomic ? usage
impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

impl Error {
    /// Attaches the index name to storage failures.
    ///
    /// Only I/O and checksum failures are wrapped; caller errors and
    /// corruption reports pass through unchanged.
    pub fn in_index(self, name: &str) -> Self {
        match self {
            err @ (Error::Io { .. } | Error::PageChecksumMismatch { .. }) => {
                Error::IndexIo { name: name.to_string(), source: Box::new(err) }
            },
            other => other,
        }
    }

    /// Returns true if the error means the tree must be rebuilt.
    pub fn is_corruption(&self) -> bool {
        match self {
            Error::Corrupted { .. }
            | Error::PageChecksumMismatch { .. }
            | Error::PageTypeMismatch { .. } => true,
            Error::IndexIo { source, .. } => source.is_corruption(),
            _ => false,
        }
    }
}

/// Page types stored in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Free/unused page.
    Free = 0,
    /// Tree metadata page (page 0).
    EntryPoint = 1,
    /// Leaf bucket holding key suffixes and record ids.
    LeafBucket = 2,
    /// Non-leaf bucket holding separators and child pointers.
    BranchBucket = 3,
    /// Out-of-tree page holding the value of the null key.
    NullBucket = 4,
}

impl TryFrom<u8> for PageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Free),
            1 => Ok(Self::EntryPoint),
            2 => Ok(Self::LeafBucket),
            3 => Ok(Self::BranchBucket),
            4 => Ok(Self::NullBucket),
            _ => Err(Error::Corrupted { reason: format!("Invalid page type: {}", value) }),
        }
    }
}
