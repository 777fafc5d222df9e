//! Proptest strategies for index keys and operation logs.
//!
//! The generators stay independent of the index crate: record ids are plain
//! `(cluster_id, cluster_position)` pairs and operations are described by
//! [`IndexOp`], which tests replay against the index and a model map.
//!
//! # Usage
//!
//! ```no_run
//! use inferadb_ledger_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(ops in strategies::arb_index_ops(200)) {
//!         // replay ops against the index and a BTreeMap
//!     }
//! }
//! ```

use proptest::prelude::*;

/// Longest key produced by [`arb_small_key`].
pub const SMALL_KEY_LEN: usize = 6;

/// Generates an arbitrary key of up to `max_len` random bytes, empty keys included.
pub fn arb_key(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generates a key over the alphabet `a`, `b`, `c` of at most [`SMALL_KEY_LEN`]
/// bytes, so that random operations collide often.
pub fn arb_small_key() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(prop::sample::select(vec![b'a', b'b', b'c']), 0..=SMALL_KEY_LEN)
}

/// Generates `prefix` followed by up to `max_suffix` bytes, for exercising
/// prefix compression.
pub fn arb_prefixed_key(prefix: &'static str, max_suffix: usize) -> impl Strategy<Value = Vec<u8>> {
    arb_key(max_suffix).prop_map(move |suffix| {
        let mut key = prefix.as_bytes().to_vec();
        key.extend_from_slice(&suffix);
        key
    })
}

/// Generates a `(cluster_id, cluster_position)` pair with non-negative parts.
pub fn arb_record_position() -> impl Strategy<Value = (i16, i64)> {
    (0i16..=i16::MAX, 0i64..1_000_000_000)
}

/// One step of a randomized index workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOp {
    /// Store a record position under a key; `None` is the null key.
    Put {
        /// Key to store under.
        key: Option<Vec<u8>>,
        /// `(cluster_id, cluster_position)` of the record.
        position: (i16, i64),
    },
    /// Remove a key.
    Remove {
        /// Key to remove.
        key: Option<Vec<u8>>,
    },
    /// Look a key up.
    Get {
        /// Key to look up.
        key: Option<Vec<u8>>,
    },
}

impl IndexOp {
    /// The non-null key the operation touches, if any.
    pub fn key(&self) -> Option<&[u8]> {
        match self {
            IndexOp::Put { key, .. } | IndexOp::Remove { key } | IndexOp::Get { key } => {
                key.as_deref()
            },
        }
    }
}

/// Generates a single operation over [`arb_small_key`] keys, null key included.
pub fn arb_index_op() -> impl Strategy<Value = IndexOp> {
    let key = prop_oneof![9 => arb_small_key().prop_map(Some), 1 => Just(None)];
    prop_oneof![
        5 => (key.clone(), arb_record_position())
            .prop_map(|(key, position)| IndexOp::Put { key, position }),
        3 => key.clone().prop_map(|key| IndexOp::Remove { key }),
        1 => key.prop_map(|key| IndexOp::Get { key }),
    ]
}

/// Generates up to `max_len` operations.
pub fn arb_index_ops(max_len: usize) -> impl Strategy<Value = Vec<IndexOp>> {
    proptest::collection::vec(arb_index_op(), 0..=max_len)
}
