//! Fuzz target for separator and prefix computation.
//!
//! For any two distinct keys, the separator must sort strictly above the
//! smaller key and no higher than the larger one, and the common prefix of a
//! range `[left, right)` must prefix every key inside it.

#![no_main]

use libfuzzer_sys::fuzz_target;

use inferadb_ledger_index::btree::boundary::{extract_common_prefix, shortest_separator};

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let (a, b) = rest.split_at(usize::from(split).min(rest.len()));
    if a == b {
        return;
    }
    let (left, right) = if a < b { (a, b) } else { (b, a) };

    let separator = shortest_separator(left, right);
    assert!(left < separator.as_slice(), "separator not above left key");
    assert!(separator.as_slice() <= right, "separator above right key");
    assert!(separator.len() <= right.len());

    let prefix = extract_common_prefix(left, right);
    assert!(left.starts_with(&prefix), "prefix does not cover lower bound");
    if separator.as_slice() < right {
        assert!(separator.starts_with(&prefix), "prefix does not cover separator");
    }
});
