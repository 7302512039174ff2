//! Context-aware search engine.
//!
//! Pipeline: parse → plan → execute FTS → rank → filter → highlight →
//! cache. The per-context result cache is fingerprinted over the normalized
//! query, filters, and context set, with a TTL; any write in the context
//! clears it wholesale (coarse invalidation is fine, stale hits are not).

mod highlight;
mod intent;
mod parser;
mod ranking;

pub use highlight::build_highlights;
pub use intent::{
    analyze_intent, ComplexityClass, ContextHint, IntentAnalysis, SearchIntentKind,
};
pub use parser::{
    COMPLEX_QUERY_LIMIT, ParsedQuery, QueryComplexity, QueryTerm, SIMPLE_QUERY_LIMIT,
    build_match_expression, parse_query,
};
pub use ranking::{
    MAX_SCORE, RankingInputs, SearchContext, UserContextKind, score_entity, sort_results,
};

use crate::aging::AgingConfig;
use crate::models::Entity;
use crate::storage::EntityStore;
use crate::{Error, Result, current_timestamp, normalize_name};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default search-cache TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default search-cache capacity.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// A search request against one context.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    /// Raw query string.
    pub query: String,
    /// Maximum results to return.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Conversational context for boosting.
    #[serde(default)]
    pub search_context: Option<SearchContext>,
    /// Caller-pinned intent; detected from the query when absent.
    #[serde(default)]
    pub intent: Option<SearchIntentKind>,
    /// Restrict boosting to entities carrying this content type.
    #[serde(default)]
    pub content_type: Option<String>,
}

/// One scored search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// The matched entity.
    pub entity: Entity,
    /// Final clamped relevance score.
    pub score: f64,
    /// Field snippets.
    pub highlights: Vec<String>,
}

/// A completed search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// Ranked results, best first.
    pub results: Vec<SearchResult>,
    /// Matches before the limit was applied.
    pub total_matches: usize,
    /// Complexity the planner classified the query as.
    pub complexity: &'static str,
    /// Whether this response came from the result cache.
    pub from_cache: bool,
}

struct CachedSearch {
    response: SearchResponse,
    expires_at: Instant,
}

/// TTL'd LRU over finished searches.
pub struct SearchCache {
    inner: LruCache<String, CachedSearch>,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

impl SearchCache {
    /// Creates a cache with the given capacity and TTL.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: LruCache::new(cap),
            ttl,
            hits: 0,
            misses: 0,
        }
    }

    fn get(&mut self, fingerprint: &str) -> Option<SearchResponse> {
        match self.inner.get(fingerprint) {
            Some(cached) if cached.expires_at > Instant::now() => {
                self.hits += 1;
                let mut response = cached.response.clone();
                response.from_cache = true;
                Some(response)
            },
            Some(_) => {
                self.inner.pop(fingerprint);
                self.misses += 1;
                None
            },
            None => {
                self.misses += 1;
                None
            },
        }
    }

    fn put(&mut self, fingerprint: String, response: SearchResponse) {
        self.inner.put(
            fingerprint,
            CachedSearch {
                response,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    /// (hits, misses, resident entries).
    #[must_use]
    pub fn stats(&self) -> (u64, u64, usize) {
        (self.hits, self.misses, self.inner.len())
    }
}

/// Per-context search engine.
pub struct SearchEngine {
    cache: Mutex<SearchCache>,
}

impl SearchEngine {
    /// Creates an engine with the given cache sizing.
    #[must_use]
    pub fn new(cache_capacity: usize, cache_ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(SearchCache::new(cache_capacity, cache_ttl)),
        }
    }

    /// Creates an engine with default cache sizing.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }

    /// Runs the full search pipeline against one context's store.
    pub fn search(
        &self,
        store: &EntityStore,
        aging: &AgingConfig,
        context_name: &str,
        request: &SearchRequest,
    ) -> Result<SearchResponse> {
        let normalized_query = normalize_name(&request.query);
        if normalized_query.is_empty() {
            return Err(Error::InvalidInput("search query must not be empty".to_string()));
        }

        let fingerprint = fingerprint(context_name, &normalized_query, request);
        {
            let mut cache = lock(&self.cache);
            if let Some(cached) = cache.get(&fingerprint) {
                metrics::counter!("search_cache_hits_total").increment(1);
                return Ok(cached);
            }
        }

        let parsed = parse_query(&request.query);
        let Some(match_expr) = build_match_expression(&parsed) else {
            return Err(Error::InvalidInput(
                "search query contains no searchable terms".to_string(),
            ));
        };

        let intent = request
            .intent
            .or_else(|| Some(analyze_intent(&request.query, &[]).intent));

        let candidates = store.fts_search(&match_expr, parsed.recommended_limit())?;
        let total_matches = candidates.len();

        let inputs = RankingInputs {
            query: &normalized_query,
            search_context: request.search_context.as_ref(),
            intent,
            content_type: request.content_type.as_deref(),
            aging,
            now: current_timestamp(),
        };

        let mut scored: Vec<(Entity, f64)> = candidates
            .into_iter()
            .enumerate()
            .map(|(position, entity)| {
                let score = score_entity(&entity, position, &inputs);
                (entity, score)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();

        sort_results(&mut scored, |entity| entity.name.as_str());

        let limit = request.limit.unwrap_or(20).max(1);
        let results: Vec<SearchResult> = scored
            .into_iter()
            .take(limit)
            .map(|(entity, score)| {
                let highlights = build_highlights(
                    &entity,
                    &request.query,
                    request.search_context.as_ref(),
                );
                SearchResult {
                    entity,
                    score,
                    highlights,
                }
            })
            .collect();

        let response = SearchResponse {
            results,
            total_matches,
            complexity: parsed.complexity.as_str(),
            from_cache: false,
        };

        lock(&self.cache).put(fingerprint, response.clone());
        Ok(response)
    }

    /// Drops every cached result. Called on any write in the context.
    pub fn invalidate(&self) {
        lock(&self.cache).clear();
    }

    /// Cache statistics: (hits, misses, resident entries).
    #[must_use]
    pub fn cache_stats(&self) -> (u64, u64, usize) {
        lock(&self.cache).stats()
    }
}

fn lock(mutex: &Mutex<SearchCache>) -> std::sync::MutexGuard<'_, SearchCache> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Cache fingerprint: normalized query + filter set + context set.
fn fingerprint(context_name: &str, normalized_query: &str, request: &SearchRequest) -> String {
    let intent = request.intent.map_or("auto", SearchIntentKind::as_str);
    let content_type = request.content_type.as_deref().unwrap_or("-");
    let limit = request.limit.unwrap_or(20);
    let context_fields = request.search_context.as_ref().map_or_else(String::new, |c| {
        format!(
            "{}|{}|{}|{}",
            c.current_entity.as_deref().unwrap_or("-"),
            c.user_context
                .map_or("-", |u| match u {
                    UserContextKind::Work => "work",
                    UserContextKind::Personal => "personal",
                    UserContextKind::Neutral => "neutral",
                }),
            c.conversation_context.as_deref().unwrap_or("-"),
            c.recent_searches.join(",")
        )
    });
    format!("{context_name}\u{1}{normalized_query}\u{1}{intent}\u{1}{content_type}\u{1}{limit}\u{1}{context_fields}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityInput;

    fn store_with_entities() -> EntityStore {
        let store = EntityStore::in_memory(AgingConfig::default()).unwrap();
        store
            .create_entities(vec![
                EntityInput::new("Alpha Project", "project")
                    .with_text("kickoff meeting with Bob about Alpha"),
                EntityInput::new("Beta Project", "project").with_text("beta testing schedule"),
                EntityInput::new("Bob", "person").with_text("works on Alpha"),
            ])
            .unwrap();
        store
    }

    fn request(query: &str) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            ..SearchRequest::default()
        }
    }

    #[test]
    fn test_search_finds_and_ranks() {
        let store = store_with_entities();
        let engine = SearchEngine::with_defaults();
        let aging = AgingConfig::default();

        let response = engine
            .search(&store, &aging, "personal", &request("Alpha"))
            .unwrap();
        assert!(!response.from_cache);
        assert!(response.results.len() >= 2);
        // Name match outranks observation-only match
        assert_eq!(response.results[0].entity.name, "Alpha Project");
    }

    #[test]
    fn test_cache_hit_and_invalidation() {
        let store = store_with_entities();
        let engine = SearchEngine::with_defaults();
        let aging = AgingConfig::default();

        let first = engine
            .search(&store, &aging, "personal", &request("Alpha"))
            .unwrap();
        assert!(!first.from_cache);
        let second = engine
            .search(&store, &aging, "personal", &request("Alpha"))
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(first.results.len(), second.results.len());

        engine.invalidate();
        let third = engine
            .search(&store, &aging, "personal", &request("Alpha"))
            .unwrap();
        assert!(!third.from_cache);
    }

    #[test]
    fn test_empty_query_rejected() {
        let store = store_with_entities();
        let engine = SearchEngine::with_defaults();
        let err = engine
            .search(&store, &AgingConfig::default(), "personal", &request("   "))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn test_deterministic_ordering() {
        let store = store_with_entities();
        let engine = SearchEngine::with_defaults();
        let aging = AgingConfig::default();

        let a = engine
            .search(&store, &aging, "personal", &request("project"))
            .unwrap();
        engine.invalidate();
        let b = engine
            .search(&store, &aging, "personal", &request("project"))
            .unwrap();
        let names_a: Vec<_> = a.results.iter().map(|r| r.entity.name.clone()).collect();
        let names_b: Vec<_> = b.results.iter().map(|r| r.entity.name.clone()).collect();
        assert_eq!(names_a, names_b);
    }

    #[test]
    fn test_limit_applies_after_ranking() {
        let store = store_with_entities();
        let engine = SearchEngine::with_defaults();
        let mut req = request("project");
        req.limit = Some(1);

        let response = engine
            .search(&store, &AgingConfig::default(), "personal", &req)
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert!(response.total_matches >= 2);
    }

    #[test]
    fn test_diacritic_folding_matches() {
        let store = EntityStore::in_memory(AgingConfig::default()).unwrap();
        store
            .create_entities(vec![
                EntityInput::new("Café Notes", "note").with_text("espresso order"),
            ])
            .unwrap();
        let engine = SearchEngine::with_defaults();
        let response = engine
            .search(&store, &AgingConfig::default(), "personal", &request("cafe"))
            .unwrap();
        assert_eq!(response.results.len(), 1);
    }
}
