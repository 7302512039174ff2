//! Context registry: named, isolated knowledge graphs.
//!
//! A [`Context`] bundles one store with its caches, Bloom filter, search
//! engine, write aggregator, and resilience state. The [`ContextRegistry`]
//! owns the contexts, the process-wide current-context fallback, and
//! resolution from explicit names or free-text hints. Nothing is ever shared
//! between contexts: a write in one can never invalidate another's caches.

use crate::aggregator::{AggregatorConfig, ScheduleMode, WriteAggregator};
use crate::cache::{
    CacheStats, CacheStrategy, CountingBloomFilter, build_strategy, warmer,
};
use crate::config::ServerConfig;
use crate::models::{
    AddObservationsResult, DeleteObservationsRequest, Entity, EntityInput, GraphPage,
    KnowledgeGraph, PathResult, Relation, RelationInput, UpsertResult,
};
use crate::resilience::{ResilienceConfig, ResilienceLayer};
use crate::search::{SearchEngine, SearchRequest, SearchResponse};
use crate::storage::{EntityStore, StoreConfig, WriteOp, WriteOpResult};
use crate::{Error, Result, current_timestamp, normalize_name};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

static CONTEXT_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[a-z0-9_-]+$").unwrap()
});

/// Default warming queries replayed at startup.
const WARMING_QUERIES: &[&str] = &["meeting", "project", "todo"];

/// Metadata record describing a context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMetadata {
    /// Context name.
    pub name: String,
    /// Hint-detection patterns (lowercased tokens).
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Entity types typically stored here.
    #[serde(default)]
    pub entity_types: Vec<String>,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Registration timestamp (Unix epoch seconds).
    pub registered_at: i64,
}

/// A live statistics snapshot for one context.
#[derive(Debug, Clone, Serialize)]
pub struct ContextStats {
    /// Context name.
    pub name: String,
    /// Entity count.
    pub entities: usize,
    /// Relation count.
    pub relations: usize,
    /// Observation count.
    pub observations: usize,
    /// Entity-cache statistics.
    pub entity_cache: CacheStats,
    /// Search-cache hits, misses, resident entries.
    pub search_cache: (u64, u64, usize),
    /// Bloom filter items and fill ratio, when enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bloom: Option<(u64, f64)>,
}

type SharedEntityCache = Arc<Mutex<Box<dyn CacheStrategy<Arc<Entity>>>>>;

/// One isolated named graph and its machinery.
pub struct Context {
    metadata: Mutex<ContextMetadata>,
    store: Arc<EntityStore>,
    entity_cache: SharedEntityCache,
    search: Arc<SearchEngine>,
    bloom: Option<Arc<Mutex<CountingBloomFilter>>>,
    bloom_path: Option<PathBuf>,
    aggregator: WriteAggregator,
    resilience: Arc<ResilienceLayer>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl Context {
    fn build(
        name: &str,
        store: EntityStore,
        config: &ServerConfig,
        metadata: ContextMetadata,
    ) -> Arc<Self> {
        let store = Arc::new(store);
        let entity_cache: SharedEntityCache = Arc::new(Mutex::new(build_strategy(
            config.cache_strategy,
            config.entity_cache_size,
        )));
        let search = Arc::new(SearchEngine::new(
            config.search_cache_size,
            crate::search::DEFAULT_CACHE_TTL,
        ));

        let bloom_path = store
            .db_path()
            .map(|path| path.with_extension("bloom"));
        let bloom = if config.bloom_enabled {
            Some(Arc::new(Mutex::new(load_or_rebuild_bloom(
                &store,
                bloom_path.as_deref(),
                config.bloom_expected_items,
                config.bloom_fpr,
            ))))
        } else {
            None
        };

        let resilience = Arc::new(ResilienceLayer::new(ResilienceConfig::default()));

        let mode = if config.write_batch_delay.is_zero() {
            ScheduleMode::ZeroDelay
        } else {
            ScheduleMode::Debounced {
                delay: config.write_batch_delay,
                max_batch: config.write_batch_max_size,
            }
        };

        let hook_cache = Arc::clone(&entity_cache);
        let hook_search = Arc::clone(&search);
        let hook_bloom = bloom.clone();
        let aggregator = WriteAggregator::spawn(
            Arc::clone(&store),
            Arc::clone(&resilience),
            AggregatorConfig { mode },
            Box::new(move |ops| {
                apply_commit_invalidation(&hook_cache, &hook_search, hook_bloom.as_ref(), ops);
            }),
        );

        tracing::info!(context = name, "context opened");
        Arc::new(Self {
            metadata: Mutex::new(metadata),
            store,
            entity_cache,
            search,
            bloom,
            bloom_path,
            aggregator,
            resilience,
        })
    }

    /// Context name.
    #[must_use]
    pub fn name(&self) -> String {
        lock(&self.metadata).name.clone()
    }

    /// Metadata snapshot.
    #[must_use]
    pub fn metadata(&self) -> ContextMetadata {
        lock(&self.metadata).clone()
    }

    /// The underlying store. Bulk import/export path.
    #[must_use]
    pub const fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// The resilience layer (journal inspection, manual rollback).
    #[must_use]
    pub const fn resilience(&self) -> &Arc<ResilienceLayer> {
        &self.resilience
    }

    // ------------------------------------------------------------------
    // Writes (aggregated)
    // ------------------------------------------------------------------

    /// Upserts entities through the aggregator.
    pub async fn create_entities(&self, batch: Vec<EntityInput>) -> Result<Vec<UpsertResult>> {
        match self
            .aggregator
            .submit(WriteOp::CreateEntities(batch))
            .await?
        {
            WriteOpResult::EntitiesUpserted(results) => Ok(results),
            _ => Err(Error::Internal("unexpected write outcome".to_string())),
        }
    }

    /// Creates relations through the aggregator.
    pub async fn create_relations(&self, batch: Vec<RelationInput>) -> Result<Vec<Relation>> {
        match self
            .aggregator
            .submit(WriteOp::CreateRelations(batch))
            .await
            .map_err(|e| e.with_context_name(&self.name()))?
        {
            WriteOpResult::RelationsCreated(results) => Ok(results),
            _ => Err(Error::Internal("unexpected write outcome".to_string())),
        }
    }

    /// Appends observations through the aggregator.
    pub async fn add_observations(
        &self,
        batch: Vec<crate::models::ObservationAdd>,
    ) -> Result<Vec<AddObservationsResult>> {
        match self
            .aggregator
            .submit(WriteOp::AddObservations(batch))
            .await
            .map_err(|e| e.with_context_name(&self.name()))?
        {
            WriteOpResult::ObservationsAdded(results) => Ok(results),
            _ => Err(Error::Internal("unexpected write outcome".to_string())),
        }
    }

    /// Deletes entities (cascading to relations) through the aggregator.
    pub async fn delete_entities(&self, names: Vec<String>) -> Result<usize> {
        match self
            .aggregator
            .submit(WriteOp::DeleteEntities(names))
            .await?
        {
            WriteOpResult::EntitiesDeleted(count) => Ok(count),
            _ => Err(Error::Internal("unexpected write outcome".to_string())),
        }
    }

    /// Blocking write submission for synchronous callers (CLI, import).
    pub fn submit_blocking(&self, op: WriteOp) -> Result<WriteOpResult> {
        self.aggregator.submit_blocking(op)
    }

    // ------------------------------------------------------------------
    // Writes (direct, still resilience-wrapped)
    // ------------------------------------------------------------------

    /// Removes matching relation triples. Missing triples are not an error.
    pub fn delete_relations(&self, batch: &[RelationInput]) -> Result<usize> {
        let removed = self
            .resilience
            .execute("delete_relations", None, None, || {
                self.store.delete_relations(batch)
            })?;
        self.search.invalidate();
        Ok(removed)
    }

    /// Removes observation blocks (first match each).
    pub fn delete_observations(
        &self,
        batch: &[DeleteObservationsRequest],
    ) -> Result<Vec<(String, usize)>> {
        let outcomes = self
            .resilience
            .execute("delete_observations", None, None, || {
                self.store.delete_observations(batch)
            })?;
        let mut cache = lock_cache(&self.entity_cache);
        for request in batch {
            cache.delete(&normalize_name(&request.entity_name));
        }
        drop(cache);
        self.search.invalidate();
        Ok(outcomes)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetches an entity, recording the access.
    ///
    /// The Bloom filter short-circuits definite misses; the cache entry is
    /// refreshed with the post-touch state so a subsequent write
    /// invalidation never leaves a stale copy behind.
    pub fn get_entity(&self, name: &str) -> Result<Option<Arc<Entity>>> {
        let norm = normalize_name(name);
        if let Some(bloom) = &self.bloom
            && !lock_bloom(bloom).contains(&norm)
        {
            metrics::counter!("bloom_short_circuits_total").increment(1);
            return Ok(None);
        }

        let Some(entity) = self.store.get_entity(&norm)? else {
            return Ok(None);
        };
        let entity = Arc::new(entity);
        lock_cache(&self.entity_cache).set(norm, Arc::clone(&entity));
        Ok(Some(entity))
    }

    /// Cache-first lookup that does not count as an access.
    pub fn peek_entity(&self, name: &str) -> Result<Option<Arc<Entity>>> {
        let norm = normalize_name(name);
        if let Some(cached) = lock_cache(&self.entity_cache).get(&norm) {
            return Ok(Some(cached));
        }
        let Some(entity) = self.store.peek_entity(&norm)? else {
            return Ok(None);
        };
        let entity = Arc::new(entity);
        lock_cache(&self.entity_cache).set(norm, Arc::clone(&entity));
        Ok(Some(entity))
    }

    /// Whether an entity exists, Bloom-gated.
    pub fn entity_exists(&self, name: &str) -> Result<bool> {
        let norm = normalize_name(name);
        if let Some(bloom) = &self.bloom
            && !lock_bloom(bloom).contains(&norm)
        {
            return Ok(false);
        }
        if lock_cache(&self.entity_cache).has(&norm) {
            return Ok(true);
        }
        self.store.entity_exists(&norm)
    }

    /// Paginated graph read.
    pub fn read_graph(&self, limit: Option<usize>, offset: Option<usize>) -> Result<GraphPage> {
        self.store.read_graph(limit, offset)
    }

    /// Bounded neighborhood expansion.
    pub fn neighbors(&self, name: &str, depth: usize) -> Result<KnowledgeGraph> {
        self.store
            .neighbors(name, depth)
            .map_err(|e| e.with_context_name(&self.name()))
    }

    /// Bounded directed shortest path.
    pub fn shortest_path(&self, from: &str, to: &str, max_depth: usize) -> Result<PathResult> {
        self.store
            .shortest_path(from, to, max_depth)
            .map_err(|e| e.with_context_name(&self.name()))
    }

    /// Full search pipeline against this context.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.search
            .search(&self.store, self.store.aging(), &self.name(), request)
    }

    /// Live statistics snapshot.
    pub fn stats(&self) -> Result<ContextStats> {
        let bloom = self
            .bloom
            .as_ref()
            .map(|bloom| {
                let bloom = lock_bloom(bloom);
                (bloom.items(), bloom.fill_ratio())
            });
        Ok(ContextStats {
            name: self.name(),
            entities: self.store.entity_count()?,
            relations: self.store.relation_count()?,
            observations: self.store.observation_count()?,
            entity_cache: lock_cache(&self.entity_cache).stats(),
            search_cache: self.search.cache_stats(),
            bloom,
        })
    }

    /// Best-effort startup warming.
    pub fn warm(&self, entity_count: usize) -> warmer::WarmingReport {
        let queries: Vec<String> = WARMING_QUERIES.iter().map(|q| (*q).to_string()).collect();
        let mut cache = lock_cache(&self.entity_cache);
        warmer::warm(&self.store, cache.as_mut(), entity_count, &queries, |q| {
            let request = SearchRequest {
                query: q.to_string(),
                ..SearchRequest::default()
            };
            self.search
                .search(&self.store, self.store.aging(), &self.name(), &request)
                .map(|_| ())
        })
    }

    /// Runs one aging sweep over this context.
    pub fn run_aging_sweep(&self) -> Result<crate::aging::SweepStats> {
        let stats = crate::aging::run_sweep(&self.store, self.store.aging())?;
        // Sweeps rewrite prominence; cached copies are stale now
        lock_cache(&self.entity_cache).clear();
        self.search.invalidate();
        Ok(stats)
    }

    /// Whether any entities exist (context-deletion guard).
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.store.entity_count()? == 0)
    }

    /// Deletes everything in the context. Import `replace` mode.
    pub fn clear_all(&self) -> Result<()> {
        self.resilience
            .execute("clear_context", None, None, || self.store.clear_all())?;
        lock_cache(&self.entity_cache).clear();
        self.search.invalidate();
        if let Some(bloom) = &self.bloom {
            lock_bloom(bloom).clear();
        }
        Ok(())
    }

    /// Shuts the context down: drain writes, roll back in-flight
    /// transactions, persist the Bloom filter.
    pub fn shutdown(&self) {
        self.aggregator.shutdown();
        self.resilience.shutdown();
        if let (Some(bloom), Some(path)) = (&self.bloom, &self.bloom_path)
            && let Err(e) = lock_bloom(bloom).save(path)
        {
            tracing::warn!(error = %e, "failed to persist bloom filter");
        }
        tracing::info!(context = self.name(), "context closed");
    }
}

impl Error {
    /// Fills the empty context field some store errors are raised with.
    fn with_context_name(self, context: &str) -> Self {
        match self {
            Self::EntityNotFound { name, context: c } if c.is_empty() => Self::EntityNotFound {
                name,
                context: context.to_string(),
            },
            other => other,
        }
    }
}

fn apply_commit_invalidation(
    entity_cache: &SharedEntityCache,
    search: &Arc<SearchEngine>,
    bloom: Option<&Arc<Mutex<CountingBloomFilter>>>,
    ops: &[WriteOp],
) {
    // Any write invalidates the whole search cache of this context
    search.invalidate();
    let mut cache = lock_cache(entity_cache);
    for op in ops {
        match op {
            WriteOp::CreateEntities(inputs) => {
                for input in inputs {
                    let norm = normalize_name(&input.name);
                    cache.delete(&norm);
                    if let Some(bloom) = bloom {
                        lock_bloom(bloom).insert(&norm);
                    }
                }
            },
            WriteOp::AddObservations(adds) => {
                for add in adds {
                    cache.delete(&normalize_name(&add.entity_name));
                }
            },
            WriteOp::DeleteEntities(names) => {
                for name in names {
                    let norm = normalize_name(name);
                    cache.delete(&norm);
                    if let Some(bloom) = bloom {
                        lock_bloom(bloom).remove(&norm);
                    }
                }
            },
            WriteOp::CreateRelations(_) => {},
        }
    }
}

fn load_or_rebuild_bloom(
    store: &EntityStore,
    path: Option<&std::path::Path>,
    expected_items: usize,
    fpr: f64,
) -> CountingBloomFilter {
    if let Some(path) = path
        && path.exists()
        && let Ok(filter) = CountingBloomFilter::load(path)
    {
        tracing::debug!(path = %path.display(), "bloom filter loaded from blob");
        return filter;
    }
    let mut filter = CountingBloomFilter::new(expected_items, fpr);
    match store.all_entity_names() {
        Ok(names) => {
            for name in names {
                filter.insert(&name);
            }
        },
        Err(e) => tracing::warn!(error = %e, "bloom rebuild failed, starting empty"),
    }
    filter
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn lock_cache(
    cache: &SharedEntityCache,
) -> std::sync::MutexGuard<'_, Box<dyn CacheStrategy<Arc<Entity>>>> {
    cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn lock_bloom(
    bloom: &Arc<Mutex<CountingBloomFilter>>,
) -> std::sync::MutexGuard<'_, CountingBloomFilter> {
    bloom.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ============================================================================
// Registry
// ============================================================================

/// Owns every context plus the process-wide current-context fallback.
pub struct ContextRegistry {
    contexts: RwLock<Vec<Arc<Context>>>,
    current: Mutex<String>,
    config: ServerConfig,
    in_memory: bool,
}

impl ContextRegistry {
    /// Opens the registry with on-disk stores under the configured paths.
    ///
    /// Bootstraps `personal` and `work` contexts when none are configured,
    /// matching the default dual-context layout.
    pub fn open(config: ServerConfig) -> Result<Self> {
        let registry = Self {
            contexts: RwLock::new(Vec::new()),
            current: Mutex::new(String::new()),
            config,
            in_memory: false,
        };
        registry.bootstrap()?;
        Ok(registry)
    }

    /// Opens the registry with in-memory stores (tests, dry runs).
    pub fn in_memory(config: ServerConfig) -> Result<Self> {
        let registry = Self {
            contexts: RwLock::new(Vec::new()),
            current: Mutex::new(String::new()),
            config,
            in_memory: true,
        };
        registry.bootstrap()?;
        Ok(registry)
    }

    fn bootstrap(&self) -> Result<()> {
        let mut seeds: Vec<(String, Option<PathBuf>)> = self
            .config
            .context_db_paths
            .iter()
            .map(|(name, path)| (name.clone(), Some(path.clone())))
            .collect();
        if seeds.is_empty() {
            seeds.push(("personal".to_string(), None));
            seeds.push(("work".to_string(), None));
        }
        for (name, path) in seeds {
            let patterns = default_patterns(&name);
            self.create_context(&name, path, patterns, Vec::new(), None)?;
        }
        let first = self
            .contexts_snapshot()
            .first()
            .map(|c| c.name())
            .unwrap_or_default();
        let preferred = if self.get("personal").is_some() {
            "personal".to_string()
        } else {
            first
        };
        *lock(&self.current) = preferred;
        Ok(())
    }

    /// Creates and registers a context.
    pub fn create_context(
        &self,
        name: &str,
        path: Option<PathBuf>,
        patterns: Vec<String>,
        entity_types: Vec<String>,
        description: Option<String>,
    ) -> Result<Arc<Context>> {
        if !CONTEXT_NAME_RE.is_match(name) {
            return Err(Error::InvalidContext(format!(
                "invalid context name '{name}': must match [a-z0-9_-]+"
            )));
        }
        if self.get(name).is_some() {
            return Err(Error::InvalidContext(format!(
                "context '{name}' already exists"
            )));
        }

        let metadata = ContextMetadata {
            name: name.to_string(),
            patterns: patterns.iter().map(|p| p.to_lowercase()).collect(),
            entity_types,
            description,
            registered_at: current_timestamp(),
        };

        let store_config = StoreConfig {
            read_pool_size: self.config.read_pool_size,
            acquire_timeout: self.config.acquire_timeout,
            ..StoreConfig::default()
        };
        let store = if self.in_memory {
            EntityStore::in_memory(self.config.aging.clone())?
        } else {
            let path = path.unwrap_or_else(|| self.config.data_dir.join(format!("{name}.db")));
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                    operation: "create_data_dir".to_string(),
                    cause: e.to_string(),
                })?;
            }
            EntityStore::open(path, self.config.aging.clone(), &store_config)?
        };

        let context = Context::build(name, store, &self.config, metadata);
        self.contexts_mut().push(Arc::clone(&context));
        Ok(context)
    }

    /// Deletes a context. Refuses non-empty contexts unless `force`.
    pub fn delete_context(&self, name: &str, force: bool) -> Result<()> {
        let context = self
            .get(name)
            .ok_or_else(|| Error::InvalidContext(format!("unknown context '{name}'")))?;
        if !force && !context.is_empty()? {
            return Err(Error::ContextNotEmpty(name.to_string()));
        }

        context.shutdown();
        let db_path = context.store().db_path().cloned();
        self.contexts_mut().retain(|c| c.name() != name);

        if let Some(path) = db_path {
            let _ = std::fs::remove_file(&path);
            let _ = std::fs::remove_file(path.with_extension("bloom"));
        }

        let mut current = lock(&self.current);
        if *current == name {
            *current = self
                .contexts_snapshot()
                .first()
                .map(|c| c.name())
                .unwrap_or_default();
        }
        Ok(())
    }

    /// Looks up a context by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Context>> {
        self.contexts_snapshot()
            .into_iter()
            .find(|c| c.name() == name)
    }

    /// Sets the process-wide default context.
    pub fn set_current(&self, name: &str) -> Result<()> {
        if self.get(name).is_none() {
            return Err(Error::InvalidContext(format!("unknown context '{name}'")));
        }
        *lock(&self.current) = name.to_string();
        Ok(())
    }

    /// The process-wide default context name.
    #[must_use]
    pub fn current(&self) -> String {
        lock(&self.current).clone()
    }

    /// Resolves a context: explicit name wins, then hint patterns, then the
    /// current default. Ties on hint score break toward the
    /// earlier-registered context.
    pub fn resolve(&self, explicit: Option<&str>, hint: Option<&str>) -> Result<Arc<Context>> {
        if let Some(name) = explicit {
            return self
                .get(name)
                .ok_or_else(|| Error::InvalidContext(format!("unknown context '{name}'")));
        }

        if let Some(hint) = hint {
            let tokens: Vec<String> = hint
                .to_lowercase()
                .split_whitespace()
                .map(ToString::to_string)
                .collect();
            let mut best: Option<(usize, Arc<Context>)> = None;
            for context in self.contexts_snapshot() {
                let patterns = context.metadata().patterns;
                let score = tokens
                    .iter()
                    .filter(|token| {
                        patterns
                            .iter()
                            .any(|p| p.as_str() == token.as_str() || token.contains(p.as_str()))
                    })
                    .count();
                // Strictly-greater keeps the earlier-registered winner on ties
                if score > 0 && best.as_ref().is_none_or(|(s, _)| score > *s) {
                    best = Some((score, context));
                }
            }
            if let Some((_, context)) = best {
                return Ok(context);
            }
        }

        let current = self.current();
        self.get(&current)
            .ok_or_else(|| Error::InvalidContext("no contexts registered".to_string()))
    }

    /// Metadata for every registered context, in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<ContextMetadata> {
        self.contexts_snapshot()
            .iter()
            .map(|c| c.metadata())
            .collect()
    }

    /// Warms every context. Best-effort.
    pub fn warm_all(&self, entity_count: usize) {
        for context in self.contexts_snapshot() {
            let report = context.warm(entity_count);
            tracing::debug!(
                context = context.name(),
                entities = report.entities_loaded,
                "warmed context"
            );
        }
    }

    /// Runs an aging sweep over every context.
    pub fn sweep_all(&self) {
        for context in self.contexts_snapshot() {
            if let Err(e) = context.run_aging_sweep() {
                tracing::warn!(context = context.name(), error = %e, "aging sweep failed");
            }
        }
    }

    /// Repairs stale transactions in every context.
    pub fn repair_all(&self) {
        for context in self.contexts_snapshot() {
            let repaired = context.resilience().repair_stale();
            if !repaired.is_empty() {
                tracing::warn!(
                    context = context.name(),
                    count = repaired.len(),
                    "repaired stale transactions"
                );
            }
        }
    }

    /// Shuts every context down.
    pub fn shutdown(&self) {
        for context in self.contexts_snapshot() {
            context.shutdown();
        }
    }

    fn contexts_snapshot(&self) -> Vec<Arc<Context>> {
        self.contexts
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn contexts_mut(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<Context>>> {
        self.contexts
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn default_patterns(name: &str) -> Vec<String> {
    match name {
        "personal" => vec![
            "family".to_string(),
            "home".to_string(),
            "friend".to_string(),
            "hobby".to_string(),
        ],
        "work" => vec![
            "meeting".to_string(),
            "project".to_string(),
            "deadline".to_string(),
            "client".to_string(),
        ],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ContextRegistry {
        ContextRegistry::in_memory(ServerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_creates_default_contexts() {
        let registry = registry();
        assert!(registry.get("personal").is_some());
        assert!(registry.get("work").is_some());
        assert_eq!(registry.current(), "personal");
    }

    #[test]
    fn test_create_context_validates_name() {
        let registry = registry();
        let err = registry
            .create_context("Bad Name!", None, Vec::new(), Vec::new(), None)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_context");

        let err = registry
            .create_context("personal", None, Vec::new(), Vec::new(), None)
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_delete_context_requires_force_when_nonempty() {
        let registry = registry();
        let ctx = registry.get("work").unwrap();
        ctx.create_entities(vec![EntityInput::new("Item", "t")])
            .await
            .unwrap();

        let err = registry.delete_context("work", false).unwrap_err();
        assert_eq!(err.kind(), "context_not_empty");

        registry.delete_context("work", true).unwrap();
        assert!(registry.get("work").is_none());
    }

    #[tokio::test]
    async fn test_context_isolation() {
        let registry = registry();
        let personal = registry.get("personal").unwrap();
        let work = registry.get("work").unwrap();

        personal
            .create_entities(vec![EntityInput::new("WorkItem", "t").with_text("item one")])
            .await
            .unwrap();
        work.create_entities(vec![EntityInput::new("PersonalItem", "t").with_text("item two")])
            .await
            .unwrap();

        let request = SearchRequest {
            query: "Item".to_string(),
            ..SearchRequest::default()
        };
        let personal_hits = personal.search(&request).unwrap();
        assert_eq!(personal_hits.results.len(), 1);
        assert_eq!(personal_hits.results[0].entity.name, "WorkItem");

        let work_hits = work.search(&request).unwrap();
        assert_eq!(work_hits.results.len(), 1);
        assert_eq!(work_hits.results[0].entity.name, "PersonalItem");
    }

    #[tokio::test]
    async fn test_resolve_explicit_hint_current() {
        let registry = registry();
        // Explicit wins
        let ctx = registry.resolve(Some("work"), None).unwrap();
        assert_eq!(ctx.name(), "work");
        // Unknown explicit fails
        assert!(registry.resolve(Some("nope"), None).is_err());
        // Hint matches work patterns
        let ctx = registry
            .resolve(None, Some("the project deadline meeting"))
            .unwrap();
        assert_eq!(ctx.name(), "work");
        // No signal falls back to current
        let ctx = registry.resolve(None, Some("zzz")).unwrap();
        assert_eq!(ctx.name(), "personal");
    }

    #[tokio::test]
    async fn test_write_invalidates_caches_and_bloom() {
        let registry = registry();
        let ctx = registry.get("personal").unwrap();

        ctx.create_entities(vec![EntityInput::new("Alice", "person")])
            .await
            .unwrap();
        assert!(ctx.entity_exists("Alice").unwrap());

        // Populate the entity cache
        let _ = ctx.get_entity("Alice").unwrap().unwrap();

        ctx.delete_entities(vec!["Alice".to_string()]).await.unwrap();
        assert!(!ctx.entity_exists("Alice").unwrap());
        assert!(ctx.get_entity("Alice").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_entity_counts_accesses() {
        let registry = registry();
        let ctx = registry.get("personal").unwrap();
        ctx.create_entities(vec![EntityInput::new("Alice", "person")])
            .await
            .unwrap();

        let first = ctx.get_entity("Alice").unwrap().unwrap();
        let second = ctx.get_entity("Alice").unwrap().unwrap();
        assert!(second.access_count > first.access_count - 1);
        assert_eq!(second.access_count, 2);
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let registry = registry();
        let ctx = registry.get("personal").unwrap();
        ctx.create_entities(vec![
            EntityInput::new("A", "t").with_text("x"),
            EntityInput::new("B", "t"),
        ])
        .await
        .unwrap();
        ctx.create_relations(vec![RelationInput::new("A", "B", "knows")])
            .await
            .unwrap();

        let stats = ctx.stats().unwrap();
        assert_eq!(stats.entities, 2);
        assert_eq!(stats.relations, 1);
        assert_eq!(stats.observations, 1);
        assert!(stats.bloom.is_some());
    }
}
