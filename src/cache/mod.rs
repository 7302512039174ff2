//! Pluggable cache strategies, the existence Bloom filter, and warming.
//!
//! Every strategy exposes the same contract — `get`, `set`, `has`, `delete`,
//! `clear`, `stats` — behind [`CacheStrategy`], so contexts can swap policies
//! by configuration without touching call sites. Eviction is strictly
//! size-bounded in item count.

mod arc;
mod bloom;
mod lru;
mod radix;
mod two_q;
pub mod warmer;

pub use arc::AdaptiveCache;
pub use bloom::CountingBloomFilter;

/// Default Bloom sizing re-exported for configuration defaults.
pub mod bloom_defaults {
    /// Default expected item count.
    pub const EXPECTED_ITEMS: usize = super::bloom::DEFAULT_EXPECTED_ITEMS;
    /// Default target false-positive rate.
    pub const FPR: f64 = super::bloom::DEFAULT_FPR;
}
pub use lru::LruStrategy;
pub use radix::RadixCache;
pub use two_q::TwoQueueCache;

use serde::Serialize;

/// The polymorphic cache contract.
///
/// `get` may reorder internal recency state, so it takes `&mut self`; `has`
/// is a pure membership probe that must not perturb eviction order.
pub trait CacheStrategy<V>: Send {
    /// Looks up a key, updating recency state and hit/miss counters.
    fn get(&mut self, key: &str) -> Option<V>;

    /// Inserts or replaces a value, evicting if the cache is full.
    fn set(&mut self, key: String, value: V);

    /// Membership probe without side effects on eviction order.
    fn has(&self, key: &str) -> bool;

    /// Removes a key. Returns whether it was resident.
    fn delete(&mut self, key: &str) -> bool;

    /// Drops all entries (counters survive).
    fn clear(&mut self);

    /// Number of resident entries.
    fn len(&self) -> usize;

    /// Whether the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit/miss counters plus strategy-specific gauges.
    fn stats(&self) -> CacheStats;
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Lookup hits since creation.
    pub hits: u64,
    /// Lookup misses since creation.
    pub misses: u64,
    /// hits / (hits + misses), 0.0 when untouched.
    pub hit_rate: f64,
    /// Resident entries.
    pub size: usize,
    /// Configured capacity.
    pub max_size: usize,
    /// Strategy identifier.
    pub strategy: &'static str,
    /// Strategy-specific gauges (ghost sizes, adaptive targets, …).
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CacheStats {
    pub(crate) fn new(strategy: &'static str, hits: u64, misses: u64, size: usize, max_size: usize) -> Self {
        let total = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        Self {
            hits,
            misses,
            hit_rate,
            size,
            max_size,
            strategy,
            extra: serde_json::Map::new(),
        }
    }

    pub(crate) fn with_extra(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Selectable cache strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStrategyKind {
    /// Plain least-recently-used.
    #[default]
    Lru,
    /// 2Q: FIFO admission queue plus hot main queue with a ghost list.
    TwoQueue,
    /// ARC: adaptive replacement with recency/frequency balancing.
    Arc,
    /// Compressed radix trie keyed by entity-name prefixes.
    Radix,
}

impl CacheStrategyKind {
    /// Parses a strategy name as configured via `CACHE_STRATEGY`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "lru" => Some(Self::Lru),
            "2q" | "two_queue" | "twoqueue" => Some(Self::TwoQueue),
            "arc" => Some(Self::Arc),
            "radix" => Some(Self::Radix),
            _ => None,
        }
    }

    /// Strategy identifier used in stats and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::TwoQueue => "2q",
            Self::Arc => "arc",
            Self::Radix => "radix",
        }
    }
}

/// Builds a boxed strategy of the configured kind.
#[must_use]
pub fn build_strategy<V: Clone + Send + 'static>(
    kind: CacheStrategyKind,
    max_size: usize,
) -> Box<dyn CacheStrategy<V>> {
    match kind {
        CacheStrategyKind::Lru => Box::new(LruStrategy::new(max_size)),
        CacheStrategyKind::TwoQueue => Box::new(TwoQueueCache::new(max_size)),
        CacheStrategyKind::Arc => Box::new(AdaptiveCache::new(max_size)),
        CacheStrategyKind::Radix => Box::new(RadixCache::new(max_size)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!(CacheStrategyKind::parse("lru"), Some(CacheStrategyKind::Lru));
        assert_eq!(CacheStrategyKind::parse("2Q"), Some(CacheStrategyKind::TwoQueue));
        assert_eq!(CacheStrategyKind::parse("ARC"), Some(CacheStrategyKind::Arc));
        assert_eq!(CacheStrategyKind::parse("radix"), Some(CacheStrategyKind::Radix));
        assert_eq!(CacheStrategyKind::parse("fifo"), None);
    }

    /// Shared contract checks run against every strategy.
    fn exercise_contract(mut cache: Box<dyn CacheStrategy<String>>) {
        assert!(cache.is_empty());
        cache.set("alpha".to_string(), "1".to_string());
        cache.set("beta".to_string(), "2".to_string());

        assert_eq!(cache.get("alpha"), Some("1".to_string()));
        assert!(cache.has("beta"));
        assert!(!cache.has("gamma"));
        assert_eq!(cache.get("gamma"), None);

        assert!(cache.delete("alpha"));
        assert!(!cache.delete("alpha"));
        assert!(!cache.has("alpha"));

        cache.set("beta".to_string(), "3".to_string());
        assert_eq!(cache.get("beta"), Some("3".to_string()));

        cache.clear();
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert!(stats.hits >= 2);
        assert!(stats.misses >= 1);
        assert!(stats.hit_rate > 0.0);
    }

    #[test]
    fn test_all_strategies_honor_contract() {
        for kind in [
            CacheStrategyKind::Lru,
            CacheStrategyKind::TwoQueue,
            CacheStrategyKind::Arc,
            CacheStrategyKind::Radix,
        ] {
            exercise_contract(build_strategy::<String>(kind, 8));
        }
    }

    #[test]
    fn test_all_strategies_are_size_bounded() {
        for kind in [
            CacheStrategyKind::Lru,
            CacheStrategyKind::TwoQueue,
            CacheStrategyKind::Arc,
            CacheStrategyKind::Radix,
        ] {
            let mut cache = build_strategy::<u32>(kind, 4);
            for i in 0..64_u32 {
                cache.set(format!("key-{i}"), i);
                assert!(
                    cache.len() <= 4,
                    "{} exceeded its bound at insert {i}",
                    kind.as_str()
                );
            }
        }
    }
}
