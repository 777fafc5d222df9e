//! inferadb-ledger-index: a prefix-compressed, on-disk B+ tree index engine.
//!
//! Each index maps byte-string keys to [`RecordId`]s and is stored in its own
//! page file inside a shared [`PageStore`]:
//!
//! - **Prefix compression**: every bucket stores the prefix shared by its key
//!   range once, and entries carry only their suffix
//! - **Shortest separators**: branch keys are the shortest byte strings that
//!   still separate their children
//! - **Stable root**: page 1 is always the root; it is rewritten in place on
//!   splits and merges
//! - **Free-list reuse**: emptied pages are linked through page 0 and handed
//!   out again before the file grows
//! - **Atomic writes**: every insert or removal commits through a single
//!   atomic operation, or not at all
//! - **Batched cursors**: range scans hold no locks between batches
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             SingleValueIndex                │
//! │   (nullable keys, validated puts, ranges)   │
//! └───────────────┬─────────────────┬───────────┘
//!                 │                 │
//! ┌───────────────▼──────────┐ ┌────▼───────────┐
//! │       BinaryBTree        │ │   NullBucket   │
//! │ (descent, split, merge,  │ │ (value of the  │
//! │  free list, cursors)     │ │   null key)    │
//! └───────────────┬──────────┘ └────┬───────────┘
//!                 │                 │
//! ┌───────────────▼─────────────────▼───────────┐
//! │                 PageStore                   │
//! │  (files, page cache, atomic operations)     │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │             Storage Backend                 │
//! │      (FileBackend / InMemoryBackend)        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use inferadb_ledger_index::{
//!     IndexConfig, PageStore, RecordId, SingleValueIndex, StoreConfig,
//! };
//!
//! let store = Arc::new(PageStore::in_memory(StoreConfig::default())?);
//! let index = SingleValueIndex::create(store, "users.email", IndexConfig::default())?;
//!
//! index.put(Some(b"ann@example.com".as_slice()), RecordId::new(12, 7))?;
//! assert_eq!(index.get(Some(b"ann@example.com".as_slice()))?, Some(RecordId::new(12, 7)));
//!
//! for (key, rid) in index.iterate_entries_major(b"a", true, true) {
//!     println!("{key:?} -> {rid}");
//! }
//! # Ok::<(), inferadb_ledger_index::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
// Explicit drops release page buffers before a split re-reads them
#![allow(clippy::drop_non_drop)]
#![cfg_attr(test, allow(clippy::field_reassign_with_default))]
// Page arithmetic uses explicit bounds checking for clarity
#![allow(clippy::manual_range_contains)]

pub mod backend;
pub mod btree;
pub mod config;
pub mod error;
pub mod index;
pub mod page;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use backend::{DEFAULT_PAGE_SIZE, FileBackend, InMemoryBackend, MIN_PAGE_SIZE, StorageBackend};
pub use btree::{BinaryBTree, Direction, EntryCursor, Validation};
pub use config::{IndexConfig, StoreConfig};
pub use error::{Error, PageType, Result};
pub use index::SingleValueIndex;
pub use page::{PAGE_HEADER_SIZE, Page, PageCache};
pub use storage::{AtomicOperation, PageStore};
pub use types::RecordId;

/// Index file format version.
pub const VERSION: u16 = 1;
