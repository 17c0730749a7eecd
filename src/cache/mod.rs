//! Bounded Recency Cache (BRC).
//!
//! A thread-safe, capacity-bounded `K -> V` store with an injectable clock
//! and deterministic eviction. Two policies share one implementation
//! skeleton: [`Lru`] evicts the least recently used entry, [`Mru`] evicts
//! the most recently used one. Both refresh an entry's recency on `Get`.

mod clock;
mod policy;

pub use clock::{Clock, MockClock, SystemClock};
pub use policy::{Lru, Mru};

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

/// A single `(key, last-access timestamp)` pair in the access order.
#[derive(Debug, Clone)]
struct TimestampedEntry<K> {
    key: K,
    timestamp: i64,
}

struct StoreEntry<V> {
    value: V,
    last_access: i64,
}

/// Picks which end of the access vector is the eviction victim and how
/// the vector is kept sorted.
pub trait EvictionPolicy: Send + Sync + 'static {
    /// True if `access` (sorted per this policy) should be reordered so
    /// that entry `idx` (whose timestamp just changed) is back in order.
    /// Returns the index of the victim to evict when the cache is full.
    fn victim_index(len: usize) -> usize;

    /// Comparator used to keep the access vector sorted for this policy.
    fn order(a: i64, b: i64) -> std::cmp::Ordering;
}

/// A capacity-bounded cache. Construct via [`Cache::lru`] or [`Cache::mru`].
pub struct Cache<K, V, P: EvictionPolicy, C: Clock = SystemClock> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    clock: C,
    _policy: std::marker::PhantomData<P>,
}

struct Inner<K, V> {
    store: HashMap<K, StoreEntry<V>>,
    access: Vec<TimestampedEntry<K>>,
}

impl<K, V> Cache<K, V, Lru, SystemClock>
where
    K: Eq + Hash + Clone,
{
    /// A new LRU cache with a real wall clock.
    pub fn lru(capacity: usize) -> Self {
        Cache::with_clock(capacity, SystemClock)
    }
}

impl<K, V> Cache<K, V, Mru, SystemClock>
where
    K: Eq + Hash + Clone,
{
    /// A new MRU cache with a real wall clock.
    pub fn mru(capacity: usize) -> Self {
        Cache::with_clock(capacity, SystemClock)
    }
}

impl<K, V, P: EvictionPolicy, C: Clock> Cache<K, V, P, C>
where
    K: Eq + Hash + Clone,
{
    /// A new cache with a caller-supplied clock (used by tests to inject
    /// a [`MockClock`]). `capacity` must be at least 1.
    pub fn with_clock(capacity: usize, clock: C) -> Self {
        assert!(capacity >= 1, "BRC capacity must be >= 1");
        Cache {
            inner: Mutex::new(Inner { store: HashMap::new(), access: Vec::new() }),
            capacity,
            clock,
            _policy: std::marker::PhantomData,
        }
    }

    /// Insert or replace `k -> v`. If `k` is already present its old
    /// entry is removed first; if the cache is at capacity, one eviction
    /// runs before the insert.
    pub fn store(&self, k: K, v: V) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().expect("BRC mutex poisoned");

        if inner.store.remove(&k).is_some() {
            inner.access.retain(|e| e.key != k);
        }

        if inner.store.len() >= self.capacity {
            evict_one::<K, V, P>(&mut inner);
        }

        inner.store.insert(k.clone(), StoreEntry { value: v, last_access: now });
        insert_sorted::<K, P>(&mut inner.access, TimestampedEntry { key: k, timestamp: now });

        debug_assert_consistent::<K, V, P>(&inner, self.capacity);
    }

    /// Look up `k`, refreshing its recency timestamp on hit.
    pub fn get(&self, k: &K) -> Option<V>
    where
        V: Clone,
    {
        let now = self.clock.now();
        let mut inner = self.inner.lock().expect("BRC mutex poisoned");

        let Some(entry) = inner.store.get_mut(k) else { return None };
        entry.last_access = now;
        let value = entry.value.clone();

        inner.access.retain(|e| &e.key != k);
        insert_sorted::<K, P>(&mut inner.access, TimestampedEntry { key: k.clone(), timestamp: now });

        debug_assert_consistent::<K, V, P>(&inner, self.capacity);
        Some(value)
    }

    /// Non-refreshing membership check.
    pub fn has(&self, k: &K) -> bool {
        let inner = self.inner.lock().expect("BRC mutex poisoned");
        inner.store.contains_key(k)
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("BRC mutex poisoned");
        inner.store.len()
    }

    /// True if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verify every invariant in §3/§4.B. Returns `Err` describing the
    /// first violation found; used by tests, never by production code
    /// paths (a violation discovered inside a public method is instead a
    /// hard `panic!`, per §4.B failure semantics).
    pub fn consistency_check(&self) -> Result<(), String> {
        let inner = self.inner.lock().expect("BRC mutex poisoned");
        check_consistency::<K, V, P>(&inner, self.capacity)
    }
}

fn insert_sorted<K, P: EvictionPolicy>(access: &mut Vec<TimestampedEntry<K>>, entry: TimestampedEntry<K>) {
    let pos = access
        .iter()
        .position(|e| P::order(entry.timestamp, e.timestamp) == std::cmp::Ordering::Less)
        .unwrap_or(access.len());
    access.insert(pos, entry);
}

fn evict_one<K: Eq + Hash + Clone, V, P: EvictionPolicy>(inner: &mut Inner<K, V>) {
    if inner.access.is_empty() {
        return;
    }
    let idx = P::victim_index(inner.access.len());
    let victim = inner.access.remove(idx);
    inner.store.remove(&victim.key);
}

fn debug_assert_consistent<K: Eq + Hash + Clone, V, P: EvictionPolicy>(inner: &Inner<K, V>, capacity: usize) {
    if let Err(msg) = check_consistency::<K, V, P>(inner, capacity) {
        panic!("BRC invariant violated: {msg}");
    }
}

fn check_consistency<K: Eq + Hash + Clone, V, P: EvictionPolicy>(
    inner: &Inner<K, V>,
    capacity: usize,
) -> Result<(), String> {
    if inner.store.len() != inner.access.len() {
        return Err(format!(
            "store/access size mismatch: {} vs {}",
            inner.store.len(),
            inner.access.len()
        ));
    }
    if inner.store.len() > capacity {
        return Err(format!("store exceeds capacity: {} > {}", inner.store.len(), capacity));
    }
    let mut seen = std::collections::HashSet::new();
    for (i, entry) in inner.access.iter().enumerate() {
        if !seen.insert(&entry.key) {
            return Err("duplicate key in access vector".into());
        }
        let Some(stored) = inner.store.get(&entry.key) else {
            return Err("access entry has no matching store entry".into());
        };
        if stored.last_access != entry.timestamp {
            return Err("timestamp mismatch between store and access".into());
        }
        if i > 0 {
            let prev = &inner.access[i - 1];
            if P::order(entry.timestamp, prev.timestamp) == std::cmp::Ordering::Less {
                return Err("access vector is not sorted per policy".into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_eviction_scenario() {
        let clock = MockClock::new();
        let cache: Cache<&str, i32, Lru, _> = Cache::with_clock(2, clock.clone());
        cache.store("raven", 1);
        clock.advance_secs(1);
        cache.store("owl", 2);
        clock.advance_secs(1);
        cache.store("goat", 3);
        clock.advance_secs(1);

        assert_eq!(cache.get(&"raven"), None);
        assert!(cache.has(&"owl"));
        assert!(cache.has(&"goat"));
        cache.consistency_check().unwrap();
    }

    #[test]
    fn mru_eviction_scenario() {
        let clock = MockClock::new();
        let cache: Cache<&str, i32, Mru, _> = Cache::with_clock(2, clock.clone());
        cache.store("raven", 1);
        clock.advance_secs(1);
        cache.store("owl", 2);
        clock.advance_secs(1);
        cache.store("goat", 3);
        clock.advance_secs(1);

        assert_eq!(cache.get(&"owl"), None);
        assert!(cache.has(&"raven"));
        assert!(cache.has(&"goat"));
        cache.consistency_check().unwrap();
    }

    #[test]
    fn cache_survival_under_pressure() {
        let clock = MockClock::new();
        let cache: Cache<&str, i32, Lru, _> = Cache::with_clock(3, clock.clone());
        cache.store("a", 1);
        clock.advance_secs(1);
        cache.store("b", 2);
        clock.advance_secs(1);
        cache.store("c", 3);
        clock.advance_secs(1);

        assert_eq!(cache.get(&"b"), Some(2));
        assert!(cache.len() <= 3);
    }

    #[test]
    fn capacity_never_exceeded() {
        let cache: Cache<i32, i32, Lru, _> = Cache::lru(2);
        for i in 0..10 {
            cache.store(i, i * 10);
            assert!(cache.len() <= 2);
        }
    }

    #[test]
    fn get_refreshes_lru_recency() {
        let clock = MockClock::new();
        let cache: Cache<&str, i32, Lru, _> = Cache::with_clock(2, clock.clone());
        cache.store("a", 1);
        clock.advance_secs(1);
        cache.store("b", 2);
        clock.advance_secs(1);

        // touch "a" so it is no longer the LRU victim
        cache.get(&"a");
        clock.advance_secs(1);
        cache.store("c", 3);

        assert!(cache.has(&"a"));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn store_replaces_existing_key() {
        let cache: Cache<&str, i32, Lru, _> = Cache::lru(2);
        cache.store("a", 1);
        cache.store("a", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a"), Some(2));
    }

    #[test]
    #[should_panic(expected = "capacity must be >= 1")]
    fn zero_capacity_rejected() {
        let _: Cache<&str, i32, Lru, _> = Cache::lru(0);
    }
}
