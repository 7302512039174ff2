//! ARC (adaptive replacement) cache strategy.
//!
//! Two resident lists split capacity between recency (`T1`) and frequency
//! (`T2`); two ghost lists (`B1`, `B2`) remember what was evicted from each.
//! The adaptive target `p` grows on `B1` ghost hits (workload favors
//! recency) and shrinks on `B2` hits (favors frequency), continuously
//! re-balancing without tuning knobs.

use super::{CacheStats, CacheStrategy};
use lru::LruCache;
use std::num::NonZeroUsize;

/// ARC cache with adaptive recency/frequency balancing.
pub struct AdaptiveCache<V> {
    t1: LruCache<String, V>,
    t2: LruCache<String, V>,
    b1: LruCache<String, ()>,
    b2: LruCache<String, ()>,
    /// Adaptive target size for `T1`, in `0..=capacity`.
    p: usize,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl<V> AdaptiveCache<V> {
    /// Creates an ARC cache bounded to `max_size` resident items.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let capacity = max_size.max(1);
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            t1: LruCache::new(cap),
            t2: LruCache::new(cap),
            b1: LruCache::new(cap),
            b2: LruCache::new(cap),
            p: 0,
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    /// Demotes one resident entry to the matching ghost list.
    fn replace(&mut self, ghost_hit_in_b2: bool) {
        let t1_len = self.t1.len();
        let demote_from_t1 =
            t1_len >= 1 && (t1_len > self.p || (ghost_hit_in_b2 && t1_len == self.p));
        if demote_from_t1 {
            if let Some((key, _)) = self.t1.pop_lru() {
                self.b1.put(key, ());
            }
        } else if let Some((key, _)) = self.t2.pop_lru() {
            self.b2.put(key, ());
        } else if let Some((key, _)) = self.t1.pop_lru() {
            self.b1.put(key, ());
        }
    }
}

impl<V: Clone + Send> CacheStrategy<V> for AdaptiveCache<V> {
    fn get(&mut self, key: &str) -> Option<V> {
        // A T1 hit proves reuse: promote to the frequency list
        if let Some(value) = self.t1.pop(key) {
            self.hits += 1;
            let cloned = value.clone();
            self.t2.put(key.to_string(), value);
            return Some(cloned);
        }
        if let Some(value) = self.t2.get(key) {
            self.hits += 1;
            return Some(value.clone());
        }
        self.misses += 1;
        None
    }

    fn set(&mut self, key: String, value: V) {
        if self.t2.contains(&key) {
            self.t2.put(key, value);
            return;
        }
        if self.t1.pop(&key).is_some() {
            self.t2.put(key, value);
            return;
        }

        if self.b1.contains(&key) {
            // Recency ghost hit: grow the T1 target
            let delta = (self.b2.len() / self.b1.len().max(1)).max(1);
            self.p = (self.p + delta).min(self.capacity);
            self.replace(false);
            self.b1.pop(&key);
            self.t2.put(key, value);
            return;
        }
        if self.b2.contains(&key) {
            // Frequency ghost hit: shrink the T1 target
            let delta = (self.b1.len() / self.b2.len().max(1)).max(1);
            self.p = self.p.saturating_sub(delta);
            self.replace(true);
            self.b2.pop(&key);
            self.t2.put(key, value);
            return;
        }

        // Entirely new key
        let l1 = self.t1.len() + self.b1.len();
        if l1 == self.capacity {
            if self.t1.len() < self.capacity {
                self.b1.pop_lru();
                self.replace(false);
            } else {
                self.t1.pop_lru();
            }
        } else {
            let total = l1 + self.t2.len() + self.b2.len();
            if total >= self.capacity {
                if total >= 2 * self.capacity {
                    self.b2.pop_lru();
                }
                self.replace(false);
            }
        }
        self.t1.put(key, value);
    }

    fn has(&self, key: &str) -> bool {
        self.t1.contains(key) || self.t2.contains(key)
    }

    fn delete(&mut self, key: &str) -> bool {
        let mut removed = self.t1.pop(key).is_some();
        removed |= self.t2.pop(key).is_some();
        self.b1.pop(key);
        self.b2.pop(key);
        removed
    }

    fn clear(&mut self) {
        self.t1.clear();
        self.t2.clear();
        self.b1.clear();
        self.b2.clear();
        self.p = 0;
    }

    fn len(&self) -> usize {
        self.t1.len() + self.t2.len()
    }

    fn stats(&self) -> CacheStats {
        CacheStats::new("arc", self.hits, self.misses, self.len(), self.capacity)
            .with_extra("t1_size", self.t1.len())
            .with_extra("t2_size", self.t2.len())
            .with_extra("b1_size", self.b1.len())
            .with_extra("b2_size", self.b2.len())
            .with_extra("p", self.p)
    }
}
