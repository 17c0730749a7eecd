//! Eviction policies for the Bounded Recency Cache.

use super::EvictionPolicy;
use std::cmp::Ordering;

/// Least-recently-used: the access vector is sorted ascending (oldest at
/// index 0) and `Get` moves an entry to the end.
pub struct Lru;

impl EvictionPolicy for Lru {
    fn victim_index(_len: usize) -> usize {
        0
    }

    fn order(a: i64, b: i64) -> Ordering {
        a.cmp(&b)
    }
}

/// Most-recently-used: the access vector is sorted descending (newest at
/// index 0) and the eviction victim is the newest entry.
pub struct Mru;

impl EvictionPolicy for Mru {
    fn victim_index(_len: usize) -> usize {
        0
    }

    fn order(a: i64, b: i64) -> Ordering {
        b.cmp(&a)
    }
}
