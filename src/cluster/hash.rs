//! Node and lock hashing
//!
//! A 32-bit polynomial rolling hash (seed 7, multiplier 31) over UTF-16 code
//! units, with the same wrapping behaviour as the other blockd clients so that
//! every client routes a given lock to the same node.

/// Hash of a node identity or lock identifier
pub type HashKey = i32;

const SEED: i32 = 7;
const MULTIPLIER: i32 = 31;

/// Hash a string. Always non-negative: a raw hash of `i32::MIN`, which has
/// no positive counterpart, saturates to `i32::MAX`.
pub fn compute_hash(key: &str) -> HashKey {
    let hash = key
        .encode_utf16()
        .fold(SEED, |hash, unit| {
            hash.wrapping_mul(MULTIPLIER).wrapping_add(i32::from(unit))
        });
    hash.saturating_abs()
}

/// Routing key of a node: hash of host and port concatenated
pub fn node_key(host: &str, port: u16) -> HashKey {
    compute_hash(&format!("{}{}", host, port))
}

/// Index of the equal-width bucket that owns `lock_hash`, when `node_count`
/// buckets of width `i32::MAX / node_count` are laid end to end from zero.
///
/// When the width divides `i32::MAX` exactly the last bucket also owns
/// `i32::MAX` itself. Otherwise hashes beyond the last bucket (the truncation
/// remainder) belong to no bucket, and neither do negative hashes.
pub fn bucket_for(lock_hash: HashKey, node_count: usize) -> Option<usize> {
    if node_count == 0 || lock_hash < 0 {
        return None;
    }

    let width = i64::from(i32::MAX) / node_count as i64;
    if width == 0 {
        return None;
    }

    let index = (i64::from(lock_hash) / width) as usize;
    if index < node_count {
        Some(index)
    } else if width * node_count as i64 == i64::from(i32::MAX) {
        Some(node_count - 1)
    } else {
        None
    }
}
