//! Look-aside cache with TTL expiry.
//!
//! Readers call `get`, and on a miss take `epoch()`, load from the database
//! and `insert_if_fresh`. Writers `invalidate` the key after mutating the
//! underlying rows. Every invalidation bumps the epoch, so a fill that
//! overlapped one is discarded instead of serving stale data until expiry.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    max_entries: usize,
    entries: DashMap<K, CacheEntry<V>>,
    epoch: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: DashMap::new(),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.make_room(&key);
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Current invalidation epoch; take it before loading a value to cache.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Insert unless an invalidation happened since `seen` was taken.
    /// Returns whether the value was stored.
    pub fn insert_if_fresh(&self, key: K, value: V, seen: u64) -> bool {
        self.make_room(&key);
        // Invalidation bumps the epoch before removing, and removal waits on
        // this shard lock, so a stale fill is either skipped here or removed
        // right after.
        let entry = self.entries.entry(key);
        if self.epoch() != seen {
            return false;
        }
        entry.insert(CacheEntry {
            value,
            inserted_at: Instant::now(),
        });
        true
    }

    fn make_room(&self, key: &K) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.inserted_at.elapsed() <= ttl);

        if self.entries.len() >= self.max_entries && !self.entries.contains_key(key) {
            let victim = self
                .entries
                .iter()
                .min_by_key(|e| e.value().inserted_at)
                .map(|e| e.key().clone());
            if let Some(victim) = victim {
                self.entries.remove(&victim);
            }
        }
    }

    pub fn invalidate(&self, key: &K) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
