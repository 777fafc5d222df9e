//! Key and value types shared by every layer of the index.
//!
//! Keys are arbitrary byte strings supplied by the caller. Before they reach
//! a bucket they are tagged with [`DATA_PREFIX`] so that every stored key
//! sorts strictly between the root boundary sentinels:
//!
//! ```text
//! ROOT_LARGEST_LOWER_BOUND  = [DATA_PREFIX]            = [0x01]
//! stored key                = [DATA_PREFIX] ++ key     = [0x01, ...]
//! ROOT_SMALLEST_UPPER_BOUND = [ALWAYS_GREATER_PREFIX]  = [0x03]
//! ```
//!
//! The tag preserves byte-lexicographic order, so ordering of stored keys is
//! ordering of user keys.
//!
//! Values are fixed-width [`RecordId`]s.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, PageId, Result};

/// Logical page index inside one tree file.
pub type PageIndex = u32;

/// Page 0 holds the tree metadata.
pub const ENTRY_POINT_INDEX: PageIndex = 0;

/// Page 1 is always the root bucket.
pub const ROOT_INDEX: PageIndex = 1;

/// Tag that sorts before every other key.
pub const ALWAYS_LESS_PREFIX: u8 = 0;
/// Tag of every stored data key.
pub const DATA_PREFIX: u8 = 1;
/// Tag reserved for null keys. Null keys live in the null bucket instead.
pub const NULL_PREFIX: u8 = 2;
/// Tag that sorts after every other key.
pub const ALWAYS_GREATER_PREFIX: u8 = 3;

/// Lower boundary of the root bucket.
pub const ROOT_LARGEST_LOWER_BOUND: &[u8] = &[DATA_PREFIX];
/// Upper boundary of the root bucket.
pub const ROOT_SMALLEST_UPPER_BOUND: &[u8] = &[ALWAYS_GREATER_PREFIX];

/// On-disk encoding of an absent page link.
pub const NO_PAGE: i32 = -1;

/// Encodes an optional page link as stored on disk.
pub fn encode_link(link: Option<PageIndex>) -> i32 {
    match link {
        Some(index) => index as i32,
        None => NO_PAGE,
    }
}

/// Decodes an on-disk page link.
pub fn decode_link(raw: i32) -> Option<PageIndex> {
    if raw < 0 { None } else { Some(raw as PageIndex) }
}

/// Converts a logical page index into a backend page id.
pub fn page_id(index: PageIndex) -> PageId {
    PageId::from(index)
}

/// Tags a user key for storage.
pub fn encode_key(key: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(key.len() + 1);
    encoded.push(DATA_PREFIX);
    encoded.extend_from_slice(key);
    encoded
}

/// Strips the storage tag from a stored key.
///
/// # Errors
///
/// Returns [`Error::Corrupted`] if the key does not carry [`DATA_PREFIX`].
pub fn decode_key(stored: &[u8]) -> Result<Vec<u8>> {
    match stored.split_first() {
        Some((&DATA_PREFIX, rest)) => Ok(rest.to_vec()),
        _ => Err(Error::Corrupted { reason: format!("Stored key without data tag: {stored:?}") }),
    }
}

/// Identifier of a record referenced by the index: cluster plus position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    /// Cluster the record lives in.
    pub cluster_id: i16,
    /// Position of the record inside its cluster.
    pub cluster_position: i64,
}

impl RecordId {
    /// Serialized size in bytes.
    pub const SIZE: usize = 10;

    /// Creates a record id.
    pub const fn new(cluster_id: i16, cluster_position: i64) -> Self {
        Self { cluster_id, cluster_position }
    }

    /// Serializes into the first [`RecordId::SIZE`] bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_i16(&mut buf[0..2], self.cluster_id);
        LittleEndian::write_i64(&mut buf[2..10], self.cluster_position);
    }

    /// Deserializes from the first [`RecordId::SIZE`] bytes of `buf`.
    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            cluster_id: LittleEndian::read_i16(&buf[0..2]),
            cluster_position: LittleEndian::read_i64(&buf[2..10]),
        }
    }

    /// Serializes into a fixed-size array.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        self.write_to(&mut buf);
        buf
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}:{}", self.cluster_id, self.cluster_position)
    }
}
