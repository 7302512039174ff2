//! Least-recently-used strategy backed by the `lru` crate.

use super::{CacheStats, CacheStrategy};
use lru::LruCache;
use std::num::NonZeroUsize;

/// O(1) LRU cache: doubly-linked recency list over a hash map.
pub struct LruStrategy<V> {
    inner: LruCache<String, V>,
    max_size: usize,
    hits: u64,
    misses: u64,
}

impl<V> LruStrategy<V> {
    /// Creates an LRU cache bounded to `max_size` items.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let cap = NonZeroUsize::new(max_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: LruCache::new(cap),
            max_size: cap.get(),
            hits: 0,
            misses: 0,
        }
    }
}

impl<V: Clone + Send> CacheStrategy<V> for LruStrategy<V> {
    fn get(&mut self, key: &str) -> Option<V> {
        match self.inner.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            },
            None => {
                self.misses += 1;
                None
            },
        }
    }

    fn set(&mut self, key: String, value: V) {
        self.inner.put(key, value);
    }

    fn has(&self, key: &str) -> bool {
        self.inner.contains(key)
    }

    fn delete(&mut self, key: &str) -> bool {
        self.inner.pop(key).is_some()
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn stats(&self) -> CacheStats {
        CacheStats::new("lru", self.hits, self.misses, self.inner.len(), self.max_size)
    }
}
