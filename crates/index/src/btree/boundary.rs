//! Key boundaries and prefix bookkeeping.
//!
//! Every bucket covers a half-open key range `[llb, sub)`: the largest lower
//! boundary and the smallest upper boundary inherited from its ancestors.
//! All keys in that range share a common prefix, which the bucket omits from
//! the suffixes it stores.
//!
//! ```text
//!                 parent: prefix P, range [LLB, SUB)
//!        ┌──────────┬──────────┬──────────┐
//!        │  key(0)  │  key(1)  │  key(2)  │
//!        └──────────┴──────────┴──────────┘
//!      left(0)   right(0)   right(1)   right(2)
//!    [LLB,P+k0) [P+k0,P+k1) [P+k1,P+k2) [P+k2,SUB)
//! ```

use super::bucket::BucketRef;

/// Computes the prefix shared by every key in `[llb, sub)`.
///
/// This is the longest common prefix of the two boundaries, extended by one
/// byte when `sub` is exactly `llb[..k]` followed by `llb[k] + 1`: no key in
/// the range can then differ from `llb` at position `k`.
pub fn extract_common_prefix(llb: &[u8], sub: &[u8]) -> Vec<u8> {
    let shortest = llb.len().min(sub.len());
    let mut common = llb.iter().zip(sub).take_while(|(a, b)| a == b).count();

    if common < shortest
        && sub.len() == common + 1
        && llb[common].checked_add(1) == Some(sub[common])
    {
        common += 1;
    }

    llb[..common].to_vec()
}

/// Lower boundary of the child reached through entry `index` of `parent`.
///
/// `is_left` selects the left child of the entry, otherwise the right child.
pub fn largest_lower_boundary(
    parent: &BucketRef<'_>,
    index: usize,
    is_left: bool,
    parent_prefix: &[u8],
    parent_llb: &[u8],
) -> Vec<u8> {
    if is_left {
        if index == 0 {
            parent_llb.to_vec()
        } else {
            restore_key(parent_prefix, parent.key(index - 1))
        }
    } else {
        restore_key(parent_prefix, parent.key(index))
    }
}

/// Upper boundary of the child reached through entry `index` of `parent`.
pub fn smallest_upper_boundary(
    parent: &BucketRef<'_>,
    index: usize,
    is_left: bool,
    parent_prefix: &[u8],
    parent_sub: &[u8],
) -> Vec<u8> {
    if is_left {
        restore_key(parent_prefix, parent.key(index))
    } else if index + 1 < parent.size() {
        restore_key(parent_prefix, parent.key(index + 1))
    } else {
        parent_sub.to_vec()
    }
}

/// Rebuilds a full key from a bucket prefix and a stored suffix.
pub fn restore_key(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + suffix.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(suffix);
    key
}

/// Re-encodes a suffix stored under `old_prefix` for a bucket using `new_prefix`.
///
/// The full key must start with `new_prefix`, which holds whenever the key
/// lies in the range the new prefix was derived from.
pub fn extend_key(old_prefix: &[u8], new_prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    let full = restore_key(old_prefix, suffix);
    debug_assert!(full.starts_with(new_prefix), "key {full:?} outside prefix {new_prefix:?}");
    full[new_prefix.len().min(full.len())..].to_vec()
}

/// Shortest key `s` with `left < s <= right`.
///
/// Used as the separator between two adjacent keys after a split or a
/// rotation. Requires `left < right`.
pub fn shortest_separator(left: &[u8], right: &[u8]) -> Vec<u8> {
    debug_assert!(left < right);
    let common = left.iter().zip(right).take_while(|(a, b)| a == b).count();
    right[..(common + 1).min(right.len())].to_vec()
}
