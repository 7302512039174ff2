//! Compressed radix-trie cache strategy.
//!
//! Stores string keys in a compressed trie so entity names sharing prefixes
//! ("project-alpha", "project-beta", …) share path storage. Eviction is LRU
//! by a global access counter kept per resident key.

use super::{CacheStats, CacheStrategy};
use std::collections::HashMap;

struct Node<V> {
    /// Edge-labelled children; labels never share a first byte.
    children: Vec<(String, Node<V>)>,
    value: Option<V>,
}

impl<V> Node<V> {
    const fn new() -> Self {
        Self {
            children: Vec::new(),
            value: None,
        }
    }

    fn is_prunable(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }
}

/// Byte length of the shared prefix, aligned to a char boundary.
fn common_prefix_len(a: &str, b: &str) -> usize {
    let mut len = 0;
    for (ca, cb) in a.chars().zip(b.chars()) {
        if ca == cb {
            len += ca.len_utf8();
        } else {
            break;
        }
    }
    len
}

/// Radix-trie cache with access-counter LRU eviction.
pub struct RadixCache<V> {
    root: Node<V>,
    /// Access tick per resident key; the minimum is the eviction victim.
    ticks: HashMap<String, u64>,
    clock: u64,
    max_size: usize,
    hits: u64,
    misses: u64,
}

impl<V> RadixCache<V> {
    /// Creates a radix cache bounded to `max_size` items.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            root: Node::new(),
            ticks: HashMap::new(),
            clock: 0,
            max_size: max_size.max(1),
            hits: 0,
            misses: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn find<'a>(node: &'a Node<V>, key: &str) -> Option<&'a Node<V>> {
        if key.is_empty() {
            return Some(node);
        }
        for (label, child) in &node.children {
            if let Some(rest) = key.strip_prefix(label.as_str()) {
                return Self::find(child, rest);
            }
        }
        None
    }

    fn insert(node: &mut Node<V>, key: &str, value: V) {
        if key.is_empty() {
            node.value = Some(value);
            return;
        }
        for index in 0..node.children.len() {
            let shared = common_prefix_len(&node.children[index].0, key);
            if shared == 0 {
                continue;
            }
            let label_len = node.children[index].0.len();
            if shared == label_len {
                // Edge fully matched: descend with the remainder
                Self::insert(&mut node.children[index].1, &key[shared..], value);
                return;
            }
            // Partial match: split the edge at the shared prefix
            let (label, old_child) = node.children.swap_remove(index);
            let mut junction = Node::new();
            junction.children.push((label[shared..].to_string(), old_child));
            Self::insert(&mut junction, &key[shared..], value);
            node.children.push((label[..shared].to_string(), junction));
            return;
        }
        let mut leaf = Node::new();
        leaf.value = Some(value);
        node.children.push((key.to_string(), leaf));
    }

    fn remove(node: &mut Node<V>, key: &str) -> bool {
        if key.is_empty() {
            return node.value.take().is_some();
        }
        for index in 0..node.children.len() {
            let matched = key.strip_prefix(node.children[index].0.as_str()).map(str::to_string);
            if let Some(rest) = matched {
                let removed = Self::remove(&mut node.children[index].1, &rest);
                if removed && node.children[index].1.is_prunable() {
                    node.children.swap_remove(index);
                }
                return removed;
            }
        }
        false
    }

    fn evict_coldest(&mut self) {
        let victim = self
            .ticks
            .iter()
            .min_by_key(|(_, tick)| **tick)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            Self::remove(&mut self.root, &key);
            self.ticks.remove(&key);
        }
    }
}

impl<V: Clone + Send> CacheStrategy<V> for RadixCache<V> {
    fn get(&mut self, key: &str) -> Option<V> {
        let value = Self::find(&self.root, key).and_then(|node| node.value.clone());
        match value {
            Some(value) => {
                self.hits += 1;
                let tick = self.tick();
                self.ticks.insert(key.to_string(), tick);
                Some(value)
            },
            None => {
                self.misses += 1;
                None
            },
        }
    }

    fn set(&mut self, key: String, value: V) {
        let resident = self.ticks.contains_key(&key);
        if !resident && self.ticks.len() >= self.max_size {
            self.evict_coldest();
        }
        Self::insert(&mut self.root, &key, value);
        let tick = self.tick();
        self.ticks.insert(key, tick);
    }

    fn has(&self, key: &str) -> bool {
        Self::find(&self.root, key).is_some_and(|node| node.value.is_some())
    }

    fn delete(&mut self, key: &str) -> bool {
        let removed = Self::remove(&mut self.root, key);
        self.ticks.remove(key);
        removed
    }

    fn clear(&mut self) {
        self.root = Node::new();
        self.ticks.clear();
    }

    fn len(&self) -> usize {
        self.ticks.len()
    }

    fn stats(&self) -> CacheStats {
        CacheStats::new("radix", self.hits, self.misses, self.ticks.len(), self.max_size)
            .with_extra("clock", self.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_prefixes_split_correctly() {
        let mut cache = RadixCache::new(16);
        cache.set("project-alpha".to_string(), 1);
        cache.set("project-beta".to_string(), 2);
        cache.set("project".to_string(), 3);
        cache.set("queue".to_string(), 4);

        assert_eq!(cache.get("project-alpha"), Some(1));
        assert_eq!(cache.get("project-beta"), Some(2));
        assert_eq!(cache.get("project"), Some(3));
        assert_eq!(cache.get("queue"), Some(4));
        assert_eq!(cache.get("project-"), None);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_delete_prunes_and_preserves_siblings() {
        let mut cache = RadixCache::new(16);
        cache.set("team-core".to_string(), 1);
        cache.set("team-cache".to_string(), 2);

        assert!(cache.delete("team-core"));
        assert!(!cache.has("team-core"));
        assert_eq!(cache.get("team-cache"), Some(2));
        assert!(!cache.delete("team-core"));
    }

    #[test]
    fn test_eviction_picks_coldest_key() {
        let mut cache = RadixCache::new(2);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        let _ = cache.get("a"); // "b" is now coldest
        cache.set("c".to_string(), 3);

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut cache = RadixCache::new(2);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        cache.set("a".to_string(), 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }
}
